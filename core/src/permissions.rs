/// Capability gatekeeper — maps roles to required permission grants
///
/// The required set is a pure function of (role, platform tier). Three tiers
/// exist: the newest exposes fine-grained scan/advertise/connect grants, the
/// middle one coarse Bluetooth control plus location (location only for
/// initiator-capable roles), the oldest coarse Bluetooth control alone. The
/// gatekeeper only detects and reports; it never elevates privilege itself.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Which side of the session this node plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Scans for and connects to a peer
    Initiator,
    /// Advertises and accepts one inbound connection
    Responder,
    /// Both at once
    Dual,
}

impl Role {
    /// Initiator-capable roles carry the scan-side requirements
    pub fn is_initiator_capable(&self) -> bool {
        matches!(self, Role::Initiator | Role::Dual)
    }

    pub fn is_responder_capable(&self) -> bool {
        matches!(self, Role::Responder | Role::Dual)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Initiator => write!(f, "Initiator"),
            Role::Responder => write!(f, "Responder"),
            Role::Dual => write!(f, "Dual"),
        }
    }
}

/// Platform-version tier for permission mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlatformTier {
    /// Oldest: coarse Bluetooth control only
    Legacy,
    /// Middle: coarse control + location for initiator-capable roles
    LocationBound,
    /// Newest: fine-grained scan/advertise/connect grants
    FineGrained,
}

impl PlatformTier {
    /// Tiers that still gate scanning behind the system discoverability
    /// (location) service
    pub fn requires_discoverability_service(&self) -> bool {
        matches!(self, PlatformTier::Legacy | PlatformTier::LocationBound)
    }
}

/// Permission identifiers across all tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    BluetoothScan,
    BluetoothAdvertise,
    BluetoothConnect,
    BluetoothControl,
    Location,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Permission::BluetoothScan => write!(f, "bluetooth.scan"),
            Permission::BluetoothAdvertise => write!(f, "bluetooth.advertise"),
            Permission::BluetoothConnect => write!(f, "bluetooth.connect"),
            Permission::BluetoothControl => write!(f, "bluetooth.control"),
            Permission::Location => write!(f, "location"),
        }
    }
}

/// Minimal ordered permission set for a role on a tier
pub fn required_permissions(role: Role, tier: PlatformTier) -> Vec<Permission> {
    match tier {
        PlatformTier::FineGrained => {
            let mut required = Vec::new();
            if role.is_initiator_capable() {
                required.push(Permission::BluetoothScan);
            }
            if role.is_responder_capable() {
                required.push(Permission::BluetoothAdvertise);
            }
            required.push(Permission::BluetoothConnect);
            required
        }
        PlatformTier::LocationBound => {
            let mut required = vec![Permission::BluetoothControl];
            if role.is_initiator_capable() {
                required.push(Permission::Location);
            }
            required
        }
        PlatformTier::Legacy => vec![Permission::BluetoothControl],
    }
}

/// Grant-state collaborator (the OS permission mechanism)
///
/// This core never requests grants itself; `request_remediation` only
/// forwards the "open the settings screen" intent.
#[cfg_attr(test, mockall::automock)]
pub trait PermissionOracle: Send + Sync {
    /// Whether the given permission is currently granted
    fn is_granted(&self, permission: Permission) -> bool;
    /// Whether the system discoverability service is enabled
    fn is_discoverability_service_enabled(&self) -> bool;
    /// Ask the platform to surface its remediation UI
    fn request_remediation(&self) -> Result<(), String>;
}

/// Snapshot of grant state for a requested role; computed on demand
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionStatus {
    pub all_granted: bool,
    /// Missing permissions in required-list order
    pub missing: Vec<Permission>,
    pub service_required: bool,
    pub service_enabled: bool,
    /// Human-readable remedial action, when one applies
    pub suggested_action: Option<String>,
}

impl PermissionStatus {
    fn has_service_issue(&self) -> bool {
        self.service_required && !self.service_enabled
    }
}

/// Permission-layer errors; recoverable by user action
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PermissionError {
    #[error("Missing permission: {0}")]
    Missing(Permission),
    #[error("Missing {} permissions", .0.len())]
    MissingMultiple(Vec<Permission>),
    #[error("Discoverability service is disabled; enable it in system settings")]
    DiscoverabilityServiceDisabled,
}

/// Validates a requested role against the platform's actual grants
pub struct Gatekeeper {
    tier: PlatformTier,
    oracle: Arc<dyn PermissionOracle>,
}

impl fmt::Debug for Gatekeeper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gatekeeper").field("tier", &self.tier).finish()
    }
}

impl Gatekeeper {
    pub fn new(tier: PlatformTier, oracle: Arc<dyn PermissionOracle>) -> Self {
        Self { tier, oracle }
    }

    pub fn tier(&self) -> PlatformTier {
        self.tier
    }

    /// Compute grant state for the requested role
    pub fn check_status(&self, role: Role) -> PermissionStatus {
        let required = required_permissions(role, self.tier);
        let missing: Vec<Permission> = required
            .into_iter()
            .filter(|p| !self.oracle.is_granted(*p))
            .collect();

        let service_required =
            role.is_initiator_capable() && self.tier.requires_discoverability_service();
        let service_enabled = self.oracle.is_discoverability_service_enabled();

        let all_granted = missing.is_empty() && (!service_required || service_enabled);

        let suggested_action = if !missing.is_empty() {
            let names: Vec<String> = missing.iter().map(|p| p.to_string()).collect();
            Some(format!(
                "Grant the following in system settings: {}",
                names.join(", ")
            ))
        } else if service_required && !service_enabled {
            Some("Enable the discoverability service".to_string())
        } else {
            None
        };

        if !all_granted {
            tracing::debug!(
                role = %role,
                missing = missing.len(),
                service_required,
                service_enabled,
                "permission check failed"
            );
        }

        PermissionStatus {
            all_granted,
            missing,
            service_required,
            service_enabled,
            suggested_action,
        }
    }

    /// Convenience wrapper returning a typed error when not all granted
    pub fn check(&self, role: Role) -> Result<(), PermissionError> {
        let status = self.check_status(role);
        match synthesize_error(&status) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Forward the remediation intent to the platform
    pub fn request_remediation(&self) -> Result<(), String> {
        self.oracle.request_remediation()
    }
}

/// Map a non-granted status onto a single typed error
///
/// The single-permission mapping applies only when exactly one permission is
/// missing and no service issue exists; otherwise multiple missing grants
/// aggregate, and a pure service problem maps to the service error.
pub fn synthesize_error(status: &PermissionStatus) -> Option<PermissionError> {
    if status.all_granted {
        return None;
    }

    if status.missing.len() == 1 && !status.has_service_issue() {
        return Some(PermissionError::Missing(status.missing[0]));
    }

    if status.missing.is_empty() {
        return Some(PermissionError::DiscoverabilityServiceDisabled);
    }

    Some(PermissionError::MissingMultiple(status.missing.clone()))
}
