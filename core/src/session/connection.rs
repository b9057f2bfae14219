/// Peer connection — owns one session snapshot and drives the link state
/// machine against the radio collaborator
///
/// The connection claims the system-wide slot before entering Connecting
/// and releases it when it returns to Disconnected, so at most one live
/// link exists at a time. Attempts are bounded per session; radio
/// callbacks are applied under a current-state guard.

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::registry::{ReleasableHandle, ResourceId, ResourceKind, ResourceRegistry, ResourceState};
use crate::session::radio::{RadioBridge, RadioEvent};
use crate::session::types::{ConnectionSlot, ConnectionState, RemoteService, SessionId, SessionSnapshot};
use crate::session::SessionError;

/// Events surfaced to the connection caller
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    Connected,
    /// The link dropped or a connect attempt failed
    Disconnected { reason: Option<String> },
    /// Transport unit size renegotiated
    MtuChanged(usize),
    /// One remote service discovered
    ServiceDiscovered(RemoteService),
}

/// Handle registered with the resource registry; releasing it drops the link
struct LinkHandle {
    bridge: Arc<dyn RadioBridge>,
    peer_address: String,
}

impl ReleasableHandle for LinkHandle {
    fn release(&self) -> Result<(), String> {
        self.bridge
            .disconnect(&self.peer_address)
            .map_err(|e| e.to_string())
    }
}

/// One logical session with a single peer
pub struct PeerConnection {
    slot: Arc<ConnectionSlot>,
    registry: Arc<ResourceRegistry>,
    bridge: Arc<dyn RadioBridge>,
    snapshot: RwLock<SessionSnapshot>,
    // Strong handle kept while the link is live; the registry only holds a
    // weak reference
    link: Mutex<Option<(ResourceId, Arc<dyn ReleasableHandle>)>>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
}

impl PeerConnection {
    pub fn new(
        peer_address: impl Into<String>,
        peer_name: Option<String>,
        slot: Arc<ConnectionSlot>,
        registry: Arc<ResourceRegistry>,
        bridge: Arc<dyn RadioBridge>,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let connection = Self {
            slot,
            registry,
            bridge,
            snapshot: RwLock::new(SessionSnapshot::new(peer_address, peer_name)),
            link: Mutex::new(None),
            events,
        };
        (connection, receiver)
    }

    /// Current session snapshot (immutable copy)
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.read().clone()
    }

    pub fn id(&self) -> SessionId {
        self.snapshot.read().id
    }

    pub fn state(&self) -> ConnectionState {
        self.snapshot.read().state
    }

    /// Attempt to connect to the peer
    ///
    /// No-op while a connect is already in flight or the link is up. Fails
    /// when the attempt budget is spent or another session holds the
    /// connection slot.
    pub fn connect(&self) -> Result<(), SessionError> {
        let (id, address) = {
            let mut snapshot = self.snapshot.write();
            if snapshot.state.is_live() {
                tracing::debug!(session = %snapshot.id, "connect ignored; link already live");
                return Ok(());
            }
            if snapshot.attempts_exhausted() {
                return Err(SessionError::AttemptsExhausted(snapshot.max_attempts));
            }
            if !self.slot.try_claim(snapshot.id) {
                return Err(SessionError::ConnectionSlotBusy);
            }
            *snapshot = snapshot.with_attempt().with_state(ConnectionState::Connecting);
            (snapshot.id, snapshot.peer_address.clone())
        };

        tracing::info!(session = %id, peer = %address, "connecting");
        if let Err(e) = self.bridge.connect(&address) {
            let mut snapshot = self.snapshot.write();
            *snapshot = snapshot
                .with_state(ConnectionState::Disconnected)
                .with_error(e.to_string());
            self.slot.release(id);
            tracing::warn!(session = %id, error = %e, "connect rejected");
            return Err(SessionError::ConnectFailed(e.failure));
        }

        let handle: Arc<dyn ReleasableHandle> = Arc::new(LinkHandle {
            bridge: self.bridge.clone(),
            peer_address: address,
        });
        let resource = self.registry.register(&handle, ResourceKind::Connection);
        let _ = self.registry.transition(resource, ResourceState::Active);
        *self.link.lock() = Some((resource, handle));
        Ok(())
    }

    /// Begin an orderly teardown; the terminal Disconnected arrives via the
    /// radio callback. Safe no-op when no link is live.
    pub fn disconnect(&self) {
        let address = {
            let mut snapshot = self.snapshot.write();
            if !snapshot.state.is_live() {
                return;
            }
            *snapshot = snapshot.with_state(ConnectionState::Disconnecting);
            snapshot.peer_address.clone()
        };

        tracing::info!(peer = %address, "disconnecting");
        if let Err(e) = self.bridge.disconnect(&address) {
            // The stack refused; force the terminal state locally
            tracing::warn!(error = %e, "disconnect rejected; forcing teardown");
            self.finish_teardown(Some(e.to_string()));
        }
    }

    /// Drop all link state without radio calls (the radio turned off, so
    /// the stack's callbacks will never arrive)
    pub fn reset(&self) {
        self.finish_teardown(Some("radio powered off".to_string()));
    }

    /// Apply a radio callback under a current-state guard
    pub fn handle_event(&self, event: RadioEvent) {
        match event {
            RadioEvent::ConnectionStateChanged {
                peer_address,
                state,
            } => {
                if peer_address != self.snapshot.read().peer_address {
                    return;
                }
                self.on_link_state(state);
            }
            RadioEvent::MtuChanged { mtu } => self.on_mtu_changed(mtu),
            RadioEvent::ServiceAdded { service } => self.on_service_added(service),
            _ => {}
        }
    }

    fn on_link_state(&self, state: ConnectionState) {
        match state {
            ConnectionState::Connected => {
                let mut snapshot = self.snapshot.write();
                // Only a pending connect can complete
                if snapshot.state != ConnectionState::Connecting {
                    return;
                }
                *snapshot = snapshot.with_state(ConnectionState::Connected);
                drop(snapshot);
                tracing::info!("link established");
                let _ = self.events.send(ConnectionEvent::Connected);
            }
            ConnectionState::Disconnected => {
                let reason = {
                    let snapshot = self.snapshot.read();
                    if snapshot.state == ConnectionState::Disconnected {
                        return;
                    }
                    (snapshot.state == ConnectionState::Connecting)
                        .then(|| "connect attempt failed".to_string())
                };
                self.finish_teardown(reason);
            }
            // Intermediate states are driven locally, not from callbacks
            ConnectionState::Connecting | ConnectionState::Disconnecting => {}
        }
    }

    fn on_mtu_changed(&self, mtu: usize) {
        let mut snapshot = self.snapshot.write();
        if !snapshot.state.is_live() {
            return;
        }
        *snapshot = snapshot.with_mtu(mtu);
        drop(snapshot);
        tracing::debug!(mtu, "transport unit renegotiated");
        let _ = self.events.send(ConnectionEvent::MtuChanged(mtu));
    }

    fn on_service_added(&self, service: RemoteService) {
        let mut snapshot = self.snapshot.write();
        if snapshot.state != ConnectionState::Connected {
            return;
        }
        *snapshot = snapshot.with_service(service.clone());
        drop(snapshot);
        let _ = self.events.send(ConnectionEvent::ServiceDiscovered(service));
    }

    /// Terminal transition: release the slot, retire the registry entry,
    /// and reset the snapshot. Idempotent.
    fn finish_teardown(&self, reason: Option<String>) {
        let id = {
            let mut snapshot = self.snapshot.write();
            if snapshot.state == ConnectionState::Disconnected {
                return;
            }
            let mut next = snapshot.reset();
            if let Some(reason) = &reason {
                next = next.with_error(reason.clone());
            }
            *snapshot = next;
            snapshot.id
        };

        self.slot.release(id);
        let link = self.link.lock().take();
        if let Some((resource, handle)) = link {
            let _ = self.registry.transition(resource, ResourceState::Disposing);
            drop(handle);
        }
        tracing::info!(session = %id, "link closed");
        let _ = self.events.send(ConnectionEvent::Disconnected { reason });
    }
}

impl crate::lifecycle::LifecycleAware for PeerConnection {
    /// An established link survives backgrounding; nothing to stop here
    fn pause(&self) -> Result<(), String> {
        Ok(())
    }

    fn resume(&self) -> Result<(), String> {
        Ok(())
    }

    fn shutdown(&self) -> Result<(), String> {
        if self.state().is_live() {
            let address = self.snapshot.read().peer_address.clone();
            let _ = self.bridge.disconnect(&address);
        }
        self.finish_teardown(Some("shutdown".to_string()));
        Ok(())
    }
}
