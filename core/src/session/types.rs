/// Session value types — connection state, immutable snapshots, and the
/// system-wide single-connection slot

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

use crate::device::now_ms;
use crate::protocol::frame::DEFAULT_MTU;

/// Default bound on connection attempts per session
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Link state of a peer session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl ConnectionState {
    /// States counted against the system-wide single-connection invariant
    pub fn is_live(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Disconnecting => write!(f, "Disconnecting"),
        }
    }
}

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Monotonically unique session identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(u64);

impl SessionId {
    pub fn next() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// A descriptor on a remote characteristic
pub type RemoteDescriptor = Uuid;

/// A characteristic on a remote service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCharacteristic {
    pub uuid: Uuid,
    pub descriptors: Vec<RemoteDescriptor>,
}

/// One service discovered on the connected peer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteService {
    pub uuid: Uuid,
    pub characteristics: Vec<RemoteCharacteristic>,
}

/// Immutable session snapshot; mutations produce a new value that is
/// swapped atomically, keeping listener observations consistent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub peer_address: String,
    pub peer_name: Option<String>,
    pub state: ConnectionState,
    pub created_at: u64,
    pub updated_at: u64,
    /// Connect attempts made so far, bounded by `max_attempts`
    pub attempts: u32,
    pub max_attempts: u32,
    /// Negotiated transport unit size
    pub mtu: usize,
    /// Discovered remote service tree
    pub services: Vec<RemoteService>,
    pub last_error: Option<String>,
}

impl SessionSnapshot {
    pub fn new(peer_address: impl Into<String>, peer_name: Option<String>) -> Self {
        let now = now_ms();
        Self {
            id: SessionId::next(),
            peer_address: peer_address.into(),
            peer_name,
            state: ConnectionState::Disconnected,
            created_at: now,
            updated_at: now,
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            mtu: DEFAULT_MTU,
            services: Vec::new(),
            last_error: None,
        }
    }

    /// Copy with a new link state
    pub fn with_state(&self, state: ConnectionState) -> Self {
        Self {
            state,
            updated_at: now_ms(),
            ..self.clone()
        }
    }

    /// Copy with a renegotiated transport unit size
    pub fn with_mtu(&self, mtu: usize) -> Self {
        Self {
            mtu,
            updated_at: now_ms(),
            ..self.clone()
        }
    }

    /// Copy with one more discovered service
    pub fn with_service(&self, service: RemoteService) -> Self {
        let mut services = self.services.clone();
        services.push(service);
        Self {
            services,
            updated_at: now_ms(),
            ..self.clone()
        }
    }

    /// Copy with an attempt consumed
    pub fn with_attempt(&self) -> Self {
        Self {
            attempts: self.attempts + 1,
            updated_at: now_ms(),
            ..self.clone()
        }
    }

    /// Copy with a recorded error
    pub fn with_error(&self, error: impl Into<String>) -> Self {
        Self {
            last_error: Some(error.into()),
            updated_at: now_ms(),
            ..self.clone()
        }
    }

    /// Reset to Disconnected with services cleared (disconnect, dispose,
    /// or radio-off); identity and attempt history are retained
    pub fn reset(&self) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            services: Vec::new(),
            mtu: DEFAULT_MTU,
            updated_at: now_ms(),
            ..self.clone()
        }
    }

    pub fn attempts_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

/// System-wide at-most-one guard for live connections
///
/// A session claims the slot before entering Connecting and releases it on
/// returning to Disconnected. While claimed, every competing claim fails
/// deterministically.
#[derive(Debug, Default)]
pub struct ConnectionSlot {
    holder: Mutex<Option<SessionId>>,
}

impl ConnectionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot; fails if another session holds it. Re-claiming by
    /// the current holder succeeds (idempotent).
    pub fn try_claim(&self, id: SessionId) -> bool {
        let mut holder = self.holder.lock();
        match *holder {
            None => {
                *holder = Some(id);
                true
            }
            Some(current) => current == id,
        }
    }

    /// Release the slot; only the holder may release it
    pub fn release(&self, id: SessionId) -> bool {
        let mut holder = self.holder.lock();
        if *holder == Some(id) {
            *holder = None;
            true
        } else {
            false
        }
    }

    pub fn holder(&self) -> Option<SessionId> {
        *self.holder.lock()
    }

    pub fn is_free(&self) -> bool {
        self.holder.lock().is_none()
    }
}
