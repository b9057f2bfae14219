/// Top-level configuration
///
/// Aggregates the per-subsystem tunables and validates them together so a
/// bad combination is rejected before any session starts.

use serde::{Deserialize, Serialize};

use crate::device::DeviceCacheConfig;
use crate::lifecycle::LifecycleConfig;
use crate::protocol::frame::{FRAME_HEADER_SIZE, DEFAULT_MTU};
use crate::registry::RegistryConfig;
use crate::session::discovery::ScanPolicy;

/// Configuration for the whole session core
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PairLinkConfig {
    /// Initial transport unit size, before any negotiation
    pub initial_mtu: Option<usize>,
    pub scan_policy: ScanPolicy,
    pub device_cache: DeviceCacheConfig,
    pub registry: RegistryConfig,
    pub lifecycle: LifecycleConfig,
}

impl PairLinkConfig {
    /// Validate all tunables; returns the first problem found
    pub fn validate(&self) -> Result<(), String> {
        let mtu = self.initial_mtu.unwrap_or(DEFAULT_MTU);
        if mtu <= FRAME_HEADER_SIZE {
            return Err(format!(
                "initial_mtu must exceed the {}-byte frame header, got {}",
                FRAME_HEADER_SIZE, mtu
            ));
        }
        if self.scan_policy.rssi_floor_dbm > 0 {
            return Err(format!(
                "rssi_floor_dbm must be non-positive, got {}",
                self.scan_policy.rssi_floor_dbm
            ));
        }
        if self.device_cache.staleness_ms == 0 {
            return Err("device cache staleness_ms must be positive".to_string());
        }
        self.registry.validate()?;
        Ok(())
    }
}
