/// Discovered-device model and the session-scoped observation cache

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Default staleness window for cached observations (30 seconds)
pub const DEFAULT_STALENESS_MS: u64 = 30_000;

/// Advertisement payload as observed over the air
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advertisement {
    /// Advertised service identifiers
    pub service_uuids: Vec<Uuid>,
    /// Opaque service-data blocks keyed by service identifier
    pub service_data: HashMap<Uuid, Vec<u8>>,
    /// Opaque blocks keyed by manufacturer id
    pub manufacturer_data: HashMap<u16, Vec<u8>>,
    /// Transmit-power hint in dBm, when advertised
    pub tx_power: Option<i8>,
    /// Discoverability flags octet, when advertised
    pub flags: Option<u8>,
    /// Raw advertisement bytes
    pub raw: Vec<u8>,
}

/// One observation of a remote device during a discovery session
///
/// Repeat sightings of the same address supersede the previous observation
/// wholesale; observations are never merged and never persisted beyond
/// session memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    /// Device address (platform-formatted, e.g. "AA:BB:CC:DD:EE:FF")
    pub address: String,
    /// Display name, when advertised
    pub name: Option<String>,
    /// Signal strength in dBm
    pub rssi: i16,
    /// Whether the device accepts connections
    pub connectable: bool,
    /// Advertisement payload
    pub advertisement: Advertisement,
    /// When this observation was made (unix millis)
    pub last_seen: u64,
}

impl DiscoveredDevice {
    /// Create an observation stamped with the current time
    pub fn new(address: impl Into<String>, name: Option<String>, rssi: i16, connectable: bool) -> Self {
        Self::observed_at(address, name, rssi, connectable, now_ms())
    }

    /// Create an observation with an explicit timestamp
    pub fn observed_at(
        address: impl Into<String>,
        name: Option<String>,
        rssi: i16,
        connectable: bool,
        last_seen: u64,
    ) -> Self {
        Self {
            address: address.into(),
            name,
            rssi,
            connectable,
            advertisement: Advertisement::default(),
            last_seen,
        }
    }

    pub fn with_advertisement(mut self, advertisement: Advertisement) -> Self {
        self.advertisement = advertisement;
        self
    }
}

/// Configuration for the observation cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceCacheConfig {
    /// Observations older than this are evicted
    pub staleness_ms: u64,
}

impl Default for DeviceCacheConfig {
    fn default() -> Self {
        Self {
            staleness_ms: DEFAULT_STALENESS_MS,
        }
    }
}

/// Session-memory cache of device observations, keyed by address
#[derive(Debug, Default)]
pub struct DeviceCache {
    config: DeviceCacheConfig,
    devices: HashMap<String, DiscoveredDevice>,
}

impl DeviceCache {
    pub fn new(config: DeviceCacheConfig) -> Self {
        Self {
            config,
            devices: HashMap::new(),
        }
    }

    /// Record an observation, superseding any prior sighting of the address
    pub fn observe(&mut self, device: DiscoveredDevice) {
        self.devices.insert(device.address.clone(), device);
    }

    pub fn get(&self, address: &str) -> Option<&DiscoveredDevice> {
        self.devices.get(address)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Drop observations older than the staleness window. Returns the number
    /// of evicted entries.
    pub fn evict_stale(&mut self) -> usize {
        self.evict_stale_at(now_ms())
    }

    /// Staleness eviction against an explicit clock value
    pub fn evict_stale_at(&mut self, now_ms: u64) -> usize {
        let staleness = self.config.staleness_ms;
        let before = self.devices.len();
        self.devices
            .retain(|_, d| now_ms.saturating_sub(d.last_seen) <= staleness);
        before - self.devices.len()
    }

    /// Clear all observations (session teardown)
    pub fn clear(&mut self) {
        self.devices.clear();
    }
}

/// Current unix time in milliseconds
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
