//! End-to-End Integration Tests for PairLink Session Roles
//!
//! These tests exercise the complete flow on both sides of a pairing:
//! 1. Permission and readiness pre-flight
//! 2. Initiator discovery with the acceptance policy
//! 3. Responder advertising and single-peer admission
//! 4. Connection establishment under the single-connection slot
//! 5. Framed data exchange at the negotiated transport unit size
//!
//! Run with: cargo test --test integration_session_roles

use pairlink_core::{
    decode, AdvertiseSettings, AdvertisingEvent, AdvertisingSession, Chunker, ConnectionEvent,
    ConnectionSlot, ConnectionState, DiscoveredDevice, DiscoveryEvent, DiscoverySession,
    FrameCeiling, Gatekeeper, MessageType, PairLinkConfig, PeerConnection, Permission,
    PermissionOracle, PlatformTier, RadioBridge, RadioError, RadioEvent, ReadinessMonitor,
    Reassembler, RegistryConfig, ResourceRegistry, Role, ScanMode, ScanPolicy, ScanSettings,
    SearchState, SessionError, StartOutcome, SystemState, SystemStateSource,
};
use parking_lot::Mutex;
use std::sync::Arc;

const INITIATOR_PEER: &str = "AA:BB:CC:DD:EE:FF";

/// Grants everything, or nothing
struct StubOracle {
    granted: bool,
}

impl PermissionOracle for StubOracle {
    fn is_granted(&self, _permission: Permission) -> bool {
        self.granted
    }

    fn is_discoverability_service_enabled(&self) -> bool {
        true
    }

    fn request_remediation(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Serves a fixed readiness snapshot
struct StubSource {
    state: SystemState,
}

impl SystemStateSource for StubSource {
    fn current_state(&self) -> SystemState {
        self.state
    }

    fn subscribe(&self) -> Result<(), String> {
        Ok(())
    }

    fn unsubscribe(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Records every call made into the radio stack
#[derive(Default)]
struct RecordingBridge {
    calls: Mutex<Vec<String>>,
}

impl RecordingBridge {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().push(call.into());
    }
}

impl RadioBridge for RecordingBridge {
    fn start_scan(&self, _settings: &ScanSettings) -> Result<(), RadioError> {
        self.record("start_scan");
        Ok(())
    }

    fn stop_scan(&self) -> Result<(), RadioError> {
        self.record("stop_scan");
        Ok(())
    }

    fn start_advertise(&self, _settings: &AdvertiseSettings) -> Result<(), RadioError> {
        self.record("start_advertise");
        Ok(())
    }

    fn stop_advertise(&self) -> Result<(), RadioError> {
        self.record("stop_advertise");
        Ok(())
    }

    fn connect(&self, address: &str) -> Result<(), RadioError> {
        self.record(format!("connect:{}", address));
        Ok(())
    }

    fn disconnect(&self, address: &str) -> Result<(), RadioError> {
        self.record(format!("disconnect:{}", address));
        Ok(())
    }

    fn cancel_connection(&self, address: &str) -> Result<(), RadioError> {
        self.record(format!("cancel:{}", address));
        Ok(())
    }

    fn open_server(&self) -> Result<(), RadioError> {
        self.record("open_server");
        Ok(())
    }

    fn close_server(&self) -> Result<(), RadioError> {
        self.record("close_server");
        Ok(())
    }
}

fn gatekeeper(granted: bool) -> Arc<Gatekeeper> {
    Arc::new(Gatekeeper::new(
        PlatformTier::FineGrained,
        Arc::new(StubOracle { granted }),
    ))
}

fn monitor() -> Arc<ReadinessMonitor> {
    Arc::new(ReadinessMonitor::new(
        Arc::new(StubSource {
            state: SystemState::ready(),
        }),
        PlatformTier::FineGrained,
    ))
}

fn registry() -> Arc<ResourceRegistry> {
    Arc::new(ResourceRegistry::new(RegistryConfig::default()))
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter("debug")
        .try_init()
        .ok();
}

#[test]
fn test_initiator_end_to_end() {
    init_tracing();

    let config = PairLinkConfig::default();
    config.validate().expect("default config valid");

    let bridge = Arc::new(RecordingBridge::default());
    let reg = registry();
    let (discovery, mut discovery_rx) = DiscoverySession::new(
        gatekeeper(true),
        monitor(),
        reg.clone(),
        bridge.clone(),
        ScanPolicy::default(),
    );

    // Start searching
    let outcome = discovery
        .start(ScanMode::ConnectOnMatch, ScanSettings::default())
        .expect("start");
    assert_eq!(outcome, StartOutcome::Started);

    // A weak sighting is filtered; a good one matches and stops the scan
    discovery.handle_event(RadioEvent::DeviceSighted(DiscoveredDevice::new(
        INITIATOR_PEER,
        Some("Peer".to_string()),
        -95,
        true,
    )));
    discovery.handle_event(RadioEvent::DeviceSighted(DiscoveredDevice::new(
        INITIATOR_PEER,
        Some("Peer".to_string()),
        -60,
        true,
    )));

    let matched = loop {
        match discovery_rx.try_recv().expect("match event") {
            DiscoveryEvent::Match(device) => break device,
            _ => continue,
        }
    };
    assert_eq!(matched.address, INITIATOR_PEER);
    assert_eq!(discovery.state(), SearchState::Found);
    assert!(bridge.calls().contains(&"stop_scan".to_string()));

    // Connect to the matched peer
    let slot = Arc::new(ConnectionSlot::new());
    let (connection, mut connection_rx) = PeerConnection::new(
        matched.address.clone(),
        matched.name.clone(),
        slot.clone(),
        reg.clone(),
        bridge.clone(),
    );
    connection.connect().expect("connect");
    connection.handle_event(RadioEvent::ConnectionStateChanged {
        peer_address: INITIATOR_PEER.to_string(),
        state: ConnectionState::Connected,
    });
    assert!(matches!(
        connection_rx.try_recv().expect("connected"),
        ConnectionEvent::Connected
    ));

    // Negotiate a larger transport unit, then exchange a framed payload
    connection.handle_event(RadioEvent::MtuChanged { mtu: 64 });
    let mtu = connection.snapshot().mtu;
    assert_eq!(mtu, 64);

    let ceiling = FrameCeiling::from_mtu(mtu).expect("ceiling");
    let payload = vec![0xAB; 200];
    let frames =
        Chunker::split(MessageType::Text.as_u8(), &payload, ceiling).expect("chunk");
    assert!(frames.len() > 1);

    let mut reassembler = Reassembler::new();
    for frame in &frames {
        reassembler.push_bytes(frame);
    }
    let mut received = Vec::new();
    while let Some(frame) = reassembler.next_frame() {
        assert_eq!(frame.message_type(), Some(MessageType::Text));
        received.extend_from_slice(&frame.payload);
    }
    assert_eq!(received, payload);

    // Orderly teardown releases the slot
    connection.disconnect();
    connection.handle_event(RadioEvent::ConnectionStateChanged {
        peer_address: INITIATOR_PEER.to_string(),
        state: ConnectionState::Disconnected,
    });
    assert!(slot.is_free());
    assert!(bridge
        .calls()
        .contains(&format!("disconnect:{}", INITIATOR_PEER)));
}

#[test]
fn test_responder_admits_exactly_one_peer() {
    init_tracing();

    let bridge = Arc::new(RecordingBridge::default());
    let (advertising, mut rx) = AdvertisingSession::new(
        gatekeeper(true),
        monitor(),
        registry(),
        bridge.clone(),
    );

    advertising
        .start(AdvertiseSettings::default())
        .expect("start");
    advertising.handle_event(RadioEvent::AdvertiseStarted);

    // Server opened before the advertisement aired
    let calls = bridge.calls();
    let server = calls.iter().position(|c| c == "open_server").expect("server opened");
    let advertise = calls
        .iter()
        .position(|c| c == "start_advertise")
        .expect("advertise started");
    assert!(server < advertise);

    // First peer is admitted; the second is cancelled at the radio layer
    advertising.handle_event(RadioEvent::InboundConnection {
        peer_address: "CC:00:00:00:00:01".to_string(),
        peer_name: Some("First".to_string()),
    });
    advertising.handle_event(RadioEvent::InboundConnection {
        peer_address: "CC:00:00:00:00:02".to_string(),
        peer_name: Some("Second".to_string()),
    });

    let mut admitted = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let AdvertisingEvent::PeerAccepted { peer_address, .. } = event {
            admitted.push(peer_address);
        }
    }
    assert_eq!(admitted, vec!["CC:00:00:00:00:01".to_string()]);
    assert!(bridge
        .calls()
        .contains(&"cancel:CC:00:00:00:00:02".to_string()));
    // Advertising stopped the moment the first peer was admitted
    assert!(bridge.calls().contains(&"stop_advertise".to_string()));
}

#[test]
fn test_single_connection_slot_across_sessions() {
    init_tracing();

    let bridge = Arc::new(RecordingBridge::default());
    let slot = Arc::new(ConnectionSlot::new());
    let reg = registry();

    let (first, _rx1) = PeerConnection::new(
        "AA:00:00:00:00:01",
        None,
        slot.clone(),
        reg.clone(),
        bridge.clone(),
    );
    let (second, _rx2) = PeerConnection::new(
        "AA:00:00:00:00:02",
        None,
        slot.clone(),
        reg.clone(),
        bridge.clone(),
    );

    first.connect().expect("first connects");
    assert!(matches!(
        second.connect(),
        Err(SessionError::ConnectionSlotBusy)
    ));

    // Once the first link closes, the second may proceed
    first.handle_event(RadioEvent::ConnectionStateChanged {
        peer_address: "AA:00:00:00:00:01".to_string(),
        state: ConnectionState::Disconnected,
    });
    second.connect().expect("second connects after release");
    assert_eq!(slot.holder(), Some(second.id()));
}

#[test]
fn test_denied_permissions_block_both_roles() {
    init_tracing();

    let bridge = Arc::new(RecordingBridge::default());

    let (discovery, _rx) = DiscoverySession::new(
        gatekeeper(false),
        monitor(),
        registry(),
        bridge.clone(),
        ScanPolicy::default(),
    );
    assert!(matches!(
        discovery.start(ScanMode::ConnectOnMatch, ScanSettings::default()),
        Err(SessionError::Permission(_))
    ));

    let (advertising, _rx) = AdvertisingSession::new(
        gatekeeper(false),
        monitor(),
        registry(),
        bridge.clone(),
    );
    assert!(matches!(
        advertising.start(AdvertiseSettings::default()),
        Err(SessionError::Permission(_))
    ));

    // The radio stack was never touched
    assert!(bridge.calls().is_empty());
}

#[test]
fn test_gatekeeper_role_requirements() {
    // A responder on the fine-grained tier never needs the scan grant
    let required = pairlink_core::permissions::required_permissions(
        Role::Responder,
        PlatformTier::FineGrained,
    );
    assert!(!required.contains(&Permission::BluetoothScan));
    assert!(required.contains(&Permission::BluetoothAdvertise));
    assert!(required.contains(&Permission::BluetoothConnect));

    // Legacy tier collapses everything to the single control grant
    let legacy =
        pairlink_core::permissions::required_permissions(Role::Dual, PlatformTier::Legacy);
    assert_eq!(legacy, vec![Permission::BluetoothControl]);
}

#[test]
fn test_wire_frame_shape() {
    // [type:1][len:2 little-endian][payload]
    let ceiling = FrameCeiling::from_mtu(23).expect("ceiling");
    let bytes = pairlink_core::encode(MessageType::Ack.as_u8(), b"hi", ceiling).expect("encode");
    assert_eq!(bytes[1..3], [0x02, 0x00]);

    let frame = decode(&bytes).expect("decode");
    assert_eq!(frame.payload, b"hi");
    assert_eq!(frame.length, 2);
}
