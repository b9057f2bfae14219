/// Point-to-point session layer
///
/// Discovery (initiator) and advertising (responder) state machines over
/// the radio collaborator, plus the single peer connection both roles
/// converge on. Every session registers its radio resources with the
/// lifecycle registry and honors app-phase pause/resume.

use thiserror::Error;

use crate::permissions::PermissionError;
use crate::readiness::ReadinessError;

pub mod advertising;
pub mod connection;
pub mod discovery;
pub mod radio;
pub mod types;

pub use advertising::{AdvertiseState, AdvertisingEvent, AdvertisingSession};
pub use connection::{ConnectionEvent, PeerConnection};
pub use discovery::{
    DiscoveryEvent, DiscoverySession, ScanMode, ScanPolicy, SearchState, StartOutcome,
    DEFAULT_RSSI_FLOOR_DBM,
};
pub use radio::{
    AdvertiseSettings, RadioBridge, RadioError, RadioEvent, RadioFailure, ScanSettings,
};
pub use types::{
    ConnectionSlot, ConnectionState, RemoteCharacteristic, RemoteService, SessionId,
    SessionSnapshot, DEFAULT_MAX_ATTEMPTS,
};

/// Session-layer errors; each maps to a distinct caller remediation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error(transparent)]
    Permission(#[from] PermissionError),

    #[error(transparent)]
    Readiness(#[from] ReadinessError),

    #[error("Scan could not start: {0}")]
    ScanFailed(RadioFailure),

    #[error("Advertising could not start: {0}")]
    AdvertiseFailed(RadioFailure),

    #[error("Connect attempt rejected: {0}")]
    ConnectFailed(RadioFailure),

    #[error("Another session already holds the connection slot")]
    ConnectionSlotBusy,

    #[error("Connect attempt budget exhausted ({0} attempts)")]
    AttemptsExhausted(u32),

    #[error("Invalid session state: {0}")]
    InvalidState(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::Permission;

    #[test]
    fn test_permission_error_converts_transparently() {
        let err: SessionError = PermissionError::Missing(Permission::BluetoothScan).into();
        assert_eq!(err.to_string(), "Missing permission: bluetooth.scan");
    }

    #[test]
    fn test_readiness_error_converts_transparently() {
        let err: SessionError = ReadinessError::RadioOff.into();
        assert!(err.to_string().contains("Radio is off"));
    }

    #[test]
    fn test_radio_failure_embedded_in_message() {
        let err = SessionError::ScanFailed(RadioFailure::TooManyInstances);
        assert!(err.to_string().contains("too many scanners"));
    }
}
