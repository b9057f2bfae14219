/// Radio stack collaborator surface
///
/// Every call into the collaborator is fallible and every callback arrives
/// asynchronously, at most once per logical operation (scan results repeat
/// per observation). The session layer translates vendor failure codes into
/// a closed cause set before anything reaches a caller.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::device::DiscoveredDevice;
use crate::session::types::ConnectionState;

/// Closed set of radio-operation failure causes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RadioFailure {
    /// The operation was already running
    AlreadyStarted,
    /// The stack refused to register the client
    RegistrationFailed,
    /// The feature is unsupported on this hardware
    Unsupported,
    /// Internal stack error
    Internal,
    /// Too many concurrent scanners/advertisers
    TooManyInstances,
}

impl RadioFailure {
    /// Map a vendor error code onto the closed cause set
    pub fn from_vendor_code(code: i32) -> Self {
        match code {
            1 => RadioFailure::AlreadyStarted,
            2 => RadioFailure::RegistrationFailed,
            3 => RadioFailure::Internal,
            4 => RadioFailure::Unsupported,
            5 => RadioFailure::TooManyInstances,
            _ => RadioFailure::Internal,
        }
    }
}

impl fmt::Display for RadioFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RadioFailure::AlreadyStarted => write!(f, "operation already started"),
            RadioFailure::RegistrationFailed => write!(f, "client registration failed"),
            RadioFailure::Unsupported => write!(f, "feature unsupported"),
            RadioFailure::Internal => write!(f, "internal radio error"),
            RadioFailure::TooManyInstances => write!(f, "too many scanners or advertisers"),
        }
    }
}

/// A failed call into the radio collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Radio operation failed: {failure} ({detail})")]
pub struct RadioError {
    pub failure: RadioFailure,
    pub detail: String,
}

impl RadioError {
    pub fn new(failure: RadioFailure, detail: impl Into<String>) -> Self {
        Self {
            failure,
            detail: detail.into(),
        }
    }
}

/// Scan parameters forwarded to the collaborator
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSettings {
    /// Restrict results to devices advertising this service
    pub service_filter: Option<Uuid>,
}

/// Advertise parameters forwarded to the collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertiseSettings {
    /// The one fixed custom service this system advertises
    pub service_uuid: Uuid,
    pub local_name: Option<String>,
    pub connectable: bool,
}

impl Default for AdvertiseSettings {
    fn default() -> Self {
        Self {
            service_uuid: Uuid::from_u128(0x7A19_0000_0000_1000_8000_00805F9B34FB),
            local_name: None,
            connectable: true,
        }
    }
}

/// Calls this core makes into the radio stack
#[cfg_attr(test, mockall::automock)]
pub trait RadioBridge: Send + Sync {
    fn start_scan(&self, settings: &ScanSettings) -> Result<(), RadioError>;
    fn stop_scan(&self) -> Result<(), RadioError>;
    fn start_advertise(&self, settings: &AdvertiseSettings) -> Result<(), RadioError>;
    fn stop_advertise(&self) -> Result<(), RadioError>;
    fn connect(&self, address: &str) -> Result<(), RadioError>;
    fn disconnect(&self, address: &str) -> Result<(), RadioError>;
    /// Reject an inbound connection before it surfaces to the caller
    fn cancel_connection(&self, address: &str) -> Result<(), RadioError>;
    fn open_server(&self) -> Result<(), RadioError>;
    fn close_server(&self) -> Result<(), RadioError>;
}

/// Callbacks the radio stack produces
///
/// Sessions apply each event under a current-state guard: a late event
/// after a logical stop is discarded, never applied.
#[derive(Debug, Clone)]
pub enum RadioEvent {
    /// One observation of a remote device (repeats per sighting)
    DeviceSighted(DiscoveredDevice),
    /// The scan could not start or aborted, with a vendor code
    ScanFailed { vendor_code: i32 },
    /// Advertising started successfully
    AdvertiseStarted,
    /// Advertising could not start, with a vendor code
    AdvertiseFailed { vendor_code: i32 },
    /// A peer initiated a connection to our server
    InboundConnection {
        peer_address: String,
        peer_name: Option<String>,
    },
    /// Link-state change for a peer
    ConnectionStateChanged {
        peer_address: String,
        state: ConnectionState,
    },
    /// One remote service discovered on the connected peer
    ServiceAdded {
        service: crate::session::types::RemoteService,
    },
    /// Transport unit size renegotiated
    MtuChanged { mtu: usize },
}
