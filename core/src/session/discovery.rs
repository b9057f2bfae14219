/// Discovery session — the initiator-side search state machine
///
/// {Idle} -> {Searching} -> {Found} -> {Idle}. A start request passes the
/// gatekeeper and readiness monitor before issuing exactly one underlying
/// scan; acceptance in connect-on-match mode stops the scan before the
/// match is surfaced, so one request can never report two matches.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::device::{DeviceCache, DeviceCacheConfig, DiscoveredDevice};
use crate::permissions::{Gatekeeper, Role};
use crate::readiness::ReadinessMonitor;
use crate::registry::{ReleasableHandle, ResourceId, ResourceKind, ResourceRegistry, ResourceState};
use crate::session::radio::{RadioBridge, RadioEvent, RadioFailure, ScanSettings};
use crate::session::SessionError;

/// Default acceptance floor for signal strength (dBm)
pub const DEFAULT_RSSI_FLOOR_DBM: i16 = -90;

/// Search state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchState {
    Idle,
    Searching,
    Found,
}

/// Whether observations are filtered and matched, or surfaced raw
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanMode {
    /// Apply the acceptance policy; stop and surface the first match
    ConnectOnMatch,
    /// Surface every observation; the acceptance policy is bypassed
    Observe,
}

/// Result of a start request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// A search was already running; the request is a no-op
    AlreadyInProgress,
}

/// Acceptance policy for connect-on-match discovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanPolicy {
    /// Devices weaker than this are never surfaced
    pub rssi_floor_dbm: i16,
    /// Case-insensitive substring match on the device name, when set
    pub name_filter: Option<String>,
}

impl Default for ScanPolicy {
    fn default() -> Self {
        Self {
            rssi_floor_dbm: DEFAULT_RSSI_FLOOR_DBM,
            name_filter: None,
        }
    }
}

impl ScanPolicy {
    /// The acceptance predicate applied to each observation
    pub fn accepts(&self, device: &DiscoveredDevice) -> bool {
        if device.address.trim().is_empty() {
            return false;
        }
        if !device.connectable {
            return false;
        }
        if device.rssi < self.rssi_floor_dbm {
            return false;
        }
        if let Some(filter) = &self.name_filter {
            let Some(name) = &device.name else {
                return false;
            };
            if !name.to_lowercase().contains(&filter.to_lowercase()) {
                return false;
            }
        }
        true
    }
}

/// Events surfaced to the discovery caller
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    /// Raw observation (Observe mode)
    Observation(DiscoveredDevice),
    /// Accepted match (ConnectOnMatch mode); the scan is already stopped
    Match(DiscoveredDevice),
    /// The underlying scan failed; the session is back in Idle
    Failed(RadioFailure),
    Stopped,
}

/// Scan handle registered with the resource registry; releasing it stops
/// the underlying scan
struct ScanHandle {
    bridge: Arc<dyn RadioBridge>,
}

impl ReleasableHandle for ScanHandle {
    fn release(&self) -> Result<(), String> {
        self.bridge.stop_scan().map_err(|e| e.to_string())
    }
}

struct DiscoveryInner {
    state: SearchState,
    mode: ScanMode,
    settings: ScanSettings,
    cache: DeviceCache,
    scan_handle: Option<Arc<ScanHandle>>,
    scan_resource: Option<ResourceId>,
    paused: bool,
}

/// The initiator-side session
pub struct DiscoverySession {
    gatekeeper: Arc<Gatekeeper>,
    monitor: Arc<ReadinessMonitor>,
    registry: Arc<ResourceRegistry>,
    bridge: Arc<dyn RadioBridge>,
    policy: ScanPolicy,
    inner: Mutex<DiscoveryInner>,
    events: mpsc::UnboundedSender<DiscoveryEvent>,
}

impl DiscoverySession {
    pub fn new(
        gatekeeper: Arc<Gatekeeper>,
        monitor: Arc<ReadinessMonitor>,
        registry: Arc<ResourceRegistry>,
        bridge: Arc<dyn RadioBridge>,
        policy: ScanPolicy,
    ) -> (Self, mpsc::UnboundedReceiver<DiscoveryEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let session = Self {
            gatekeeper,
            monitor,
            registry,
            bridge,
            policy,
            inner: Mutex::new(DiscoveryInner {
                state: SearchState::Idle,
                mode: ScanMode::ConnectOnMatch,
                settings: ScanSettings::default(),
                cache: DeviceCache::new(DeviceCacheConfig::default()),
                scan_handle: None,
                scan_resource: None,
                paused: false,
            }),
            events,
        };
        (session, receiver)
    }

    pub fn state(&self) -> SearchState {
        self.inner.lock().state
    }

    pub fn policy(&self) -> &ScanPolicy {
        &self.policy
    }

    /// Cached observation for an address, if still fresh
    pub fn cached(&self, address: &str) -> Option<DiscoveredDevice> {
        self.inner.lock().cache.get(address).cloned()
    }

    /// Begin searching
    ///
    /// Fails fast with a permission or readiness error before touching the
    /// radio; a second start while already Searching reports
    /// `AlreadyInProgress` instead of erroring.
    pub fn start(&self, mode: ScanMode, settings: ScanSettings) -> Result<StartOutcome, SessionError> {
        self.gatekeeper.check(Role::Initiator)?;
        self.monitor.check_readiness(Role::Initiator)?;

        {
            let mut inner = self.inner.lock();
            if inner.state == SearchState::Searching {
                tracing::debug!("scan already in progress");
                return Ok(StartOutcome::AlreadyInProgress);
            }
            inner.state = SearchState::Searching;
            inner.mode = mode;
            inner.settings = settings.clone();
            inner.paused = false;
            inner.cache.clear();
        }

        // Exactly one underlying scan per successful start
        if let Err(e) = self.bridge.start_scan(&settings) {
            let mut inner = self.inner.lock();
            inner.state = SearchState::Idle;
            tracing::warn!(error = %e, "scan start rejected by radio stack");
            return Err(SessionError::ScanFailed(e.failure));
        }

        let handle: Arc<ScanHandle> = Arc::new(ScanHandle {
            bridge: self.bridge.clone(),
        });
        let releasable: Arc<dyn ReleasableHandle> = handle.clone();
        let resource = self.registry.register(&releasable, ResourceKind::Scan);
        let _ = self.registry.transition(resource, ResourceState::Active);

        let mut inner = self.inner.lock();
        inner.scan_handle = Some(handle);
        inner.scan_resource = Some(resource);
        tracing::info!(?mode, "discovery started");
        Ok(StartOutcome::Started)
    }

    /// Stop searching; safe to call from any state, idempotent
    pub fn stop(&self) {
        // The strong handle must outlive the disposal so release can fire
        let (handle, resource) = {
            let mut inner = self.inner.lock();
            if inner.state == SearchState::Idle {
                return;
            }
            inner.state = SearchState::Idle;
            inner.paused = false;
            (inner.scan_handle.take(), inner.scan_resource.take())
        };

        if let Some(resource) = resource {
            // Release stops the underlying scan
            let _ = self.registry.transition(resource, ResourceState::Disposing);
        }
        drop(handle);
        let _ = self.events.send(DiscoveryEvent::Stopped);
        tracing::info!("discovery stopped");
    }

    /// Apply a radio callback
    ///
    /// Every event is guarded by the current state: a result arriving after
    /// a logical stop is discarded rather than applied.
    pub fn handle_event(&self, event: RadioEvent) {
        match event {
            RadioEvent::DeviceSighted(device) => self.on_device_sighted(device),
            RadioEvent::ScanFailed { vendor_code } => self.on_scan_failed(vendor_code),
            _ => {}
        }
    }

    fn on_device_sighted(&self, device: DiscoveredDevice) {
        let surfaced = {
            let mut inner = self.inner.lock();
            if inner.state != SearchState::Searching || inner.paused {
                return;
            }

            inner.cache.observe(device.clone());
            inner.cache.evict_stale();

            match inner.mode {
                ScanMode::Observe => Some((DiscoveryEvent::Observation(device), None, None)),
                ScanMode::ConnectOnMatch => {
                    if self.policy.accepts(&device) {
                        // Stop searching before surfacing: one request can
                        // never produce two matches
                        inner.state = SearchState::Found;
                        let handle = inner.scan_handle.take();
                        let resource = inner.scan_resource.take();
                        Some((DiscoveryEvent::Match(device), resource, handle))
                    } else {
                        None
                    }
                }
            }
        };

        if let Some((event, resource, handle)) = surfaced {
            if let Some(resource) = resource {
                let _ = self.registry.transition(resource, ResourceState::Disposing);
            }
            drop(handle);
            if matches!(event, DiscoveryEvent::Match(_)) {
                tracing::info!("device matched; scan stopped");
            }
            let _ = self.events.send(event);
        }
    }

    fn on_scan_failed(&self, vendor_code: i32) {
        let (handle, resource) = {
            let mut inner = self.inner.lock();
            if inner.state != SearchState::Searching {
                return;
            }
            inner.state = SearchState::Idle;
            (inner.scan_handle.take(), inner.scan_resource.take())
        };

        if let Some(resource) = resource {
            let _ = self.registry.transition(resource, ResourceState::Disposing);
        }
        drop(handle);
        let failure = RadioFailure::from_vendor_code(vendor_code);
        tracing::warn!(%failure, vendor_code, "scan failed");
        let _ = self.events.send(DiscoveryEvent::Failed(failure));
    }
}

impl crate::lifecycle::LifecycleAware for DiscoverySession {
    /// Stop the radio scan without losing session state; a resumed session
    /// picks the search back up
    fn pause(&self) -> Result<(), String> {
        let resource = {
            let mut inner = self.inner.lock();
            if inner.state != SearchState::Searching || inner.paused {
                return Ok(());
            }
            inner.paused = true;
            inner.scan_resource
        };

        if let Some(resource) = resource {
            let _ = self.registry.transition(resource, ResourceState::Paused);
        }
        self.bridge.stop_scan().map_err(|e| e.to_string())
    }

    fn resume(&self) -> Result<(), String> {
        let (settings, resource) = {
            let mut inner = self.inner.lock();
            if !inner.paused {
                return Ok(());
            }
            inner.paused = false;
            (inner.settings.clone(), inner.scan_resource)
        };

        if let Some(resource) = resource {
            let _ = self.registry.transition(resource, ResourceState::Active);
        }
        self.bridge.start_scan(&settings).map_err(|e| e.to_string())
    }

    fn shutdown(&self) -> Result<(), String> {
        self.stop();
        Ok(())
    }
}
