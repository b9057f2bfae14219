/// Advertising session — the responder-side state machine
///
/// {Idle} -> {Advertising} -> {Accepted} -> {Idle}. Starting opens the
/// server endpoint and begins advertising; the first inbound connection is
/// accepted and advertising stops immediately, so exactly one peer is ever
/// admitted per session. Later inbound attempts are rejected at the radio
/// layer and never surface to the caller.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::permissions::{Gatekeeper, Role};
use crate::readiness::ReadinessMonitor;
use crate::registry::{ReleasableHandle, ResourceId, ResourceKind, ResourceRegistry, ResourceState};
use crate::session::radio::{AdvertiseSettings, RadioBridge, RadioEvent, RadioFailure};
use crate::session::SessionError;

/// Responder state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdvertiseState {
    Idle,
    /// Server open, advertisement pending or running
    Advertising,
    /// An inbound peer was admitted; advertising is stopped
    Accepted,
}

/// Events surfaced to the advertising caller
#[derive(Debug, Clone)]
pub enum AdvertisingEvent {
    /// The advertisement is on the air
    Started,
    /// An inbound peer was admitted; advertising is already stopped
    PeerAccepted {
        peer_address: String,
        peer_name: Option<String>,
    },
    /// Advertising could not start or aborted; the session is back in Idle
    Failed(RadioFailure),
    Stopped,
}

/// Handle registered with the resource registry; releasing it tears down
/// the advertisement and the server endpoint
struct AdvertiseHandle {
    bridge: Arc<dyn RadioBridge>,
}

impl ReleasableHandle for AdvertiseHandle {
    fn release(&self) -> Result<(), String> {
        let advertise = self.bridge.stop_advertise();
        let server = self.bridge.close_server();
        advertise.and(server).map_err(|e| e.to_string())
    }
}

struct AdvertisingInner {
    state: AdvertiseState,
    settings: AdvertiseSettings,
    handle: Option<Arc<AdvertiseHandle>>,
    resource: Option<ResourceId>,
    accepted_peer: Option<String>,
    paused: bool,
}

/// The responder-side session
pub struct AdvertisingSession {
    gatekeeper: Arc<Gatekeeper>,
    monitor: Arc<ReadinessMonitor>,
    registry: Arc<ResourceRegistry>,
    bridge: Arc<dyn RadioBridge>,
    inner: Mutex<AdvertisingInner>,
    events: mpsc::UnboundedSender<AdvertisingEvent>,
}

impl AdvertisingSession {
    pub fn new(
        gatekeeper: Arc<Gatekeeper>,
        monitor: Arc<ReadinessMonitor>,
        registry: Arc<ResourceRegistry>,
        bridge: Arc<dyn RadioBridge>,
    ) -> (Self, mpsc::UnboundedReceiver<AdvertisingEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let session = Self {
            gatekeeper,
            monitor,
            registry,
            bridge,
            inner: Mutex::new(AdvertisingInner {
                state: AdvertiseState::Idle,
                settings: AdvertiseSettings::default(),
                handle: None,
                resource: None,
                accepted_peer: None,
                paused: false,
            }),
            events,
        };
        (session, receiver)
    }

    pub fn state(&self) -> AdvertiseState {
        self.inner.lock().state
    }

    /// Address of the admitted peer, once one has been accepted
    pub fn accepted_peer(&self) -> Option<String> {
        self.inner.lock().accepted_peer.clone()
    }

    /// Open the server endpoint and begin advertising
    ///
    /// Fails fast with a permission or readiness error before touching the
    /// radio. Starting while already advertising is a safe no-op.
    pub fn start(&self, settings: AdvertiseSettings) -> Result<(), SessionError> {
        self.gatekeeper.check(Role::Responder)?;
        self.monitor.check_readiness(Role::Responder)?;

        {
            let mut inner = self.inner.lock();
            if inner.state != AdvertiseState::Idle {
                tracing::debug!(state = ?inner.state, "advertise start ignored");
                return Ok(());
            }
            inner.state = AdvertiseState::Advertising;
            inner.settings = settings.clone();
            inner.accepted_peer = None;
            inner.paused = false;
        }

        // Server first; a peer that connects the instant the advertisement
        // airs must find the endpoint ready
        if let Err(e) = self.bridge.open_server() {
            self.inner.lock().state = AdvertiseState::Idle;
            tracing::warn!(error = %e, "server endpoint rejected");
            return Err(SessionError::AdvertiseFailed(e.failure));
        }
        if let Err(e) = self.bridge.start_advertise(&settings) {
            let _ = self.bridge.close_server();
            self.inner.lock().state = AdvertiseState::Idle;
            tracing::warn!(error = %e, "advertise rejected by radio stack");
            return Err(SessionError::AdvertiseFailed(e.failure));
        }

        let handle = Arc::new(AdvertiseHandle {
            bridge: self.bridge.clone(),
        });
        let releasable: Arc<dyn ReleasableHandle> = handle.clone();
        let resource = self.registry.register(&releasable, ResourceKind::Advertise);
        let _ = self.registry.transition(resource, ResourceState::Active);

        let mut inner = self.inner.lock();
        inner.handle = Some(handle);
        inner.resource = Some(resource);
        tracing::info!("advertising started");
        Ok(())
    }

    /// Stop advertising and close the server; safe from any state, idempotent
    pub fn stop(&self) {
        // The strong handle must outlive the disposal so release can fire
        let (handle, resource) = {
            let mut inner = self.inner.lock();
            if inner.state == AdvertiseState::Idle {
                return;
            }
            inner.state = AdvertiseState::Idle;
            inner.paused = false;
            (inner.handle.take(), inner.resource.take())
        };

        if let Some(resource) = resource {
            let _ = self.registry.transition(resource, ResourceState::Disposing);
        }
        drop(handle);
        let _ = self.events.send(AdvertisingEvent::Stopped);
        tracing::info!("advertising stopped");
    }

    /// Apply a radio callback under a current-state guard
    pub fn handle_event(&self, event: RadioEvent) {
        match event {
            RadioEvent::AdvertiseStarted => self.on_advertise_started(),
            RadioEvent::AdvertiseFailed { vendor_code } => self.on_advertise_failed(vendor_code),
            RadioEvent::InboundConnection {
                peer_address,
                peer_name,
            } => self.on_inbound(peer_address, peer_name),
            _ => {}
        }
    }

    fn on_advertise_started(&self) {
        let inner = self.inner.lock();
        if inner.state != AdvertiseState::Advertising {
            return;
        }
        drop(inner);
        let _ = self.events.send(AdvertisingEvent::Started);
    }

    fn on_advertise_failed(&self, vendor_code: i32) {
        let (handle, resource) = {
            let mut inner = self.inner.lock();
            if inner.state != AdvertiseState::Advertising {
                return;
            }
            inner.state = AdvertiseState::Idle;
            (inner.handle.take(), inner.resource.take())
        };

        if let Some(resource) = resource {
            let _ = self.registry.transition(resource, ResourceState::Disposing);
        }
        drop(handle);
        let failure = RadioFailure::from_vendor_code(vendor_code);
        tracing::warn!(%failure, vendor_code, "advertise failed");
        let _ = self.events.send(AdvertisingEvent::Failed(failure));
    }

    fn on_inbound(&self, peer_address: String, peer_name: Option<String>) {
        enum Verdict {
            Accept,
            Reject,
            Discard,
        }

        let verdict = {
            let mut inner = self.inner.lock();
            match inner.state {
                AdvertiseState::Advertising if !inner.paused => {
                    // First peer wins; advertising stops, the server stays
                    // open for the admitted link
                    inner.state = AdvertiseState::Accepted;
                    inner.accepted_peer = Some(peer_address.clone());
                    Verdict::Accept
                }
                // Already occupied: reject at the radio layer, silently
                AdvertiseState::Accepted => Verdict::Reject,
                _ => Verdict::Discard,
            }
        };

        match verdict {
            Verdict::Accept => {
                if let Err(e) = self.bridge.stop_advertise() {
                    tracing::warn!(error = %e, "stopping advertisement after accept failed");
                }
                tracing::info!(peer = %peer_address, "inbound peer accepted; advertising stopped");
                let _ = self.events.send(AdvertisingEvent::PeerAccepted {
                    peer_address,
                    peer_name,
                });
            }
            Verdict::Reject => {
                tracing::debug!(peer = %peer_address, "inbound rejected; session occupied");
                if let Err(e) = self.bridge.cancel_connection(&peer_address) {
                    tracing::warn!(error = %e, "inbound rejection failed");
                }
            }
            Verdict::Discard => {}
        }
    }
}

impl crate::lifecycle::LifecycleAware for AdvertisingSession {
    /// Take the advertisement off the air without losing session state
    fn pause(&self) -> Result<(), String> {
        let resource = {
            let mut inner = self.inner.lock();
            if inner.state != AdvertiseState::Advertising || inner.paused {
                return Ok(());
            }
            inner.paused = true;
            inner.resource
        };

        if let Some(resource) = resource {
            let _ = self.registry.transition(resource, ResourceState::Paused);
        }
        self.bridge.stop_advertise().map_err(|e| e.to_string())
    }

    fn resume(&self) -> Result<(), String> {
        let (settings, resource) = {
            let mut inner = self.inner.lock();
            if !inner.paused {
                return Ok(());
            }
            inner.paused = false;
            (inner.settings.clone(), inner.resource)
        };

        if let Some(resource) = resource {
            let _ = self.registry.transition(resource, ResourceState::Active);
        }
        self.bridge.start_advertise(&settings).map_err(|e| e.to_string())
    }

    fn shutdown(&self) -> Result<(), String> {
        self.stop();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::{MockPermissionOracle, PlatformTier};
    use crate::readiness::{MockSystemStateSource, SystemState};
    use crate::registry::RegistryConfig;
    use crate::session::radio::{MockRadioBridge, RadioError};

    fn permissive_gatekeeper() -> Arc<Gatekeeper> {
        let mut oracle = MockPermissionOracle::new();
        oracle.expect_is_granted().return_const(true);
        oracle
            .expect_is_discoverability_service_enabled()
            .return_const(true);
        Arc::new(Gatekeeper::new(PlatformTier::FineGrained, Arc::new(oracle)))
    }

    fn ready_monitor() -> Arc<ReadinessMonitor> {
        let mut source = MockSystemStateSource::new();
        source.expect_current_state().return_const(SystemState::ready());
        source.expect_subscribe().returning(|| Ok(()));
        source.expect_unsubscribe().returning(|| Ok(()));
        Arc::new(ReadinessMonitor::new(
            Arc::new(source),
            PlatformTier::FineGrained,
        ))
    }

    fn registry() -> Arc<ResourceRegistry> {
        Arc::new(ResourceRegistry::new(RegistryConfig::default()))
    }

    fn session_with_bridge(
        bridge: MockRadioBridge,
    ) -> (AdvertisingSession, mpsc::UnboundedReceiver<AdvertisingEvent>) {
        AdvertisingSession::new(
            permissive_gatekeeper(),
            ready_monitor(),
            registry(),
            Arc::new(bridge),
        )
    }

    fn quiet_bridge() -> MockRadioBridge {
        let mut bridge = MockRadioBridge::new();
        bridge.expect_open_server().returning(|| Ok(()));
        bridge.expect_start_advertise().returning(|_| Ok(()));
        bridge.expect_stop_advertise().returning(|| Ok(()));
        bridge.expect_close_server().returning(|| Ok(()));
        bridge
    }

    #[test]
    fn test_start_opens_server_then_advertises() {
        let mut bridge = MockRadioBridge::new();
        let mut order = mockall::Sequence::new();
        bridge
            .expect_open_server()
            .times(1)
            .in_sequence(&mut order)
            .returning(|| Ok(()));
        bridge
            .expect_start_advertise()
            .times(1)
            .in_sequence(&mut order)
            .returning(|_| Ok(()));
        let (session, _rx) = session_with_bridge(bridge);

        session.start(AdvertiseSettings::default()).expect("start");
        assert_eq!(session.state(), AdvertiseState::Advertising);
    }

    #[test]
    fn test_start_while_advertising_is_noop() {
        let mut bridge = MockRadioBridge::new();
        bridge.expect_open_server().times(1).returning(|| Ok(()));
        bridge.expect_start_advertise().times(1).returning(|_| Ok(()));
        let (session, _rx) = session_with_bridge(bridge);

        session.start(AdvertiseSettings::default()).expect("first");
        session.start(AdvertiseSettings::default()).expect("second is a no-op");
    }

    #[test]
    fn test_start_fails_fast_on_permissions() {
        let mut oracle = MockPermissionOracle::new();
        oracle.expect_is_granted().return_const(false);
        oracle
            .expect_is_discoverability_service_enabled()
            .return_const(true);
        let gatekeeper = Arc::new(Gatekeeper::new(PlatformTier::FineGrained, Arc::new(oracle)));

        let bridge = MockRadioBridge::new(); // never touched
        let (session, _rx) = AdvertisingSession::new(
            gatekeeper,
            ready_monitor(),
            registry(),
            Arc::new(bridge),
        );

        let result = session.start(AdvertiseSettings::default());
        assert!(matches!(result, Err(SessionError::Permission(_))));
        assert_eq!(session.state(), AdvertiseState::Idle);
    }

    #[test]
    fn test_advertise_rejection_closes_server() {
        let mut bridge = MockRadioBridge::new();
        bridge.expect_open_server().returning(|| Ok(()));
        bridge.expect_start_advertise().returning(|_| {
            Err(RadioError::new(RadioFailure::TooManyInstances, "vendor code 5"))
        });
        bridge.expect_close_server().times(1).returning(|| Ok(()));
        let (session, _rx) = session_with_bridge(bridge);

        let result = session.start(AdvertiseSettings::default());
        assert!(matches!(
            result,
            Err(SessionError::AdvertiseFailed(RadioFailure::TooManyInstances))
        ));
        assert_eq!(session.state(), AdvertiseState::Idle);
    }

    #[test]
    fn test_first_inbound_accepted_and_advertising_stopped() {
        let (session, mut rx) = session_with_bridge(quiet_bridge());
        session.start(AdvertiseSettings::default()).expect("start");

        session.handle_event(RadioEvent::InboundConnection {
            peer_address: "AA:BB:CC:DD:EE:FF".to_string(),
            peer_name: Some("Peer".to_string()),
        });

        assert_eq!(session.state(), AdvertiseState::Accepted);
        assert_eq!(session.accepted_peer().as_deref(), Some("AA:BB:CC:DD:EE:FF"));
        match rx.try_recv().expect("accept event") {
            AdvertisingEvent::PeerAccepted { peer_address, .. } => {
                assert_eq!(peer_address, "AA:BB:CC:DD:EE:FF");
            }
            other => panic!("Expected PeerAccepted, got {:?}", other),
        }
    }

    #[test]
    fn test_second_inbound_rejected_silently() {
        let mut bridge = quiet_bridge();
        bridge
            .expect_cancel_connection()
            .with(mockall::predicate::eq("BB:00:00:00:00:02"))
            .times(1)
            .returning(|_| Ok(()));
        let (session, mut rx) = session_with_bridge(bridge);
        session.start(AdvertiseSettings::default()).expect("start");

        session.handle_event(RadioEvent::InboundConnection {
            peer_address: "AA:00:00:00:00:01".to_string(),
            peer_name: None,
        });
        session.handle_event(RadioEvent::InboundConnection {
            peer_address: "BB:00:00:00:00:02".to_string(),
            peer_name: None,
        });

        // Only the first peer ever surfaced
        let mut accepted = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let AdvertisingEvent::PeerAccepted { peer_address, .. } = event {
                accepted.push(peer_address);
            }
        }
        assert_eq!(accepted, vec!["AA:00:00:00:00:01".to_string()]);
        assert_eq!(session.accepted_peer().as_deref(), Some("AA:00:00:00:00:01"));
    }

    #[test]
    fn test_advertise_failure_callback_returns_to_idle() {
        let (session, mut rx) = session_with_bridge(quiet_bridge());
        session.start(AdvertiseSettings::default()).expect("start");

        session.handle_event(RadioEvent::AdvertiseFailed { vendor_code: 1 });

        assert_eq!(session.state(), AdvertiseState::Idle);
        assert!(matches!(
            rx.try_recv().expect("failure event"),
            AdvertisingEvent::Failed(RadioFailure::AlreadyStarted)
        ));
    }

    #[test]
    fn test_late_inbound_after_stop_discarded() {
        let (session, mut rx) = session_with_bridge(quiet_bridge());
        session.start(AdvertiseSettings::default()).expect("start");
        session.stop();
        while rx.try_recv().is_ok() {}

        session.handle_event(RadioEvent::InboundConnection {
            peer_address: "AA:BB:CC:DD:EE:FF".to_string(),
            peer_name: None,
        });

        assert_eq!(session.state(), AdvertiseState::Idle);
        assert!(session.accepted_peer().is_none());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (session, _rx) = session_with_bridge(quiet_bridge());
        session.start(AdvertiseSettings::default()).expect("start");
        session.stop();
        session.stop();
        assert_eq!(session.state(), AdvertiseState::Idle);
    }

    #[test]
    fn test_release_tears_down_advertisement_and_server() {
        let mut bridge = MockRadioBridge::new();
        bridge.expect_open_server().returning(|| Ok(()));
        bridge.expect_start_advertise().returning(|_| Ok(()));
        bridge.expect_stop_advertise().times(1).returning(|| Ok(()));
        bridge.expect_close_server().times(1).returning(|| Ok(()));

        let reg = registry();
        let (session, _rx) = AdvertisingSession::new(
            permissive_gatekeeper(),
            ready_monitor(),
            reg.clone(),
            Arc::new(bridge),
        );
        session.start(AdvertiseSettings::default()).expect("start");

        session.stop();
    }

    #[test]
    fn test_pause_resume_cycle() {
        use crate::lifecycle::LifecycleAware;

        let mut bridge = MockRadioBridge::new();
        bridge.expect_open_server().returning(|| Ok(()));
        bridge.expect_start_advertise().times(2).returning(|_| Ok(()));
        bridge.expect_stop_advertise().times(1).returning(|| Ok(()));
        let (session, _rx) = session_with_bridge(bridge);

        session.start(AdvertiseSettings::default()).expect("start");
        session.pause().expect("pause");

        // Inbound while paused is discarded, not accepted
        session.handle_event(RadioEvent::InboundConnection {
            peer_address: "AA:BB:CC:DD:EE:FF".to_string(),
            peer_name: None,
        });
        assert!(session.accepted_peer().is_none());

        session.resume().expect("resume");
        assert_eq!(session.state(), AdvertiseState::Advertising);
    }
}
