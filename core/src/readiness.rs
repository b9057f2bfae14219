/// Readiness monitor — composite "can the radio be used now" verdict
///
/// Composes adapter power sub-state, discoverability-service state, and
/// power-saving restrictions into a per-role readiness check. Snapshots are
/// immutable values replaced wholesale on every monitored OS event; change
/// notifications carry only the fields that actually changed.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::device::now_ms;
use crate::permissions::{PlatformTier, Role};

/// Radio adapter power sub-state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RadioPowerState {
    Off,
    TurningOn,
    On,
    TurningOff,
}

/// Immutable readiness snapshot; superseded wholesale, never patched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemState {
    pub power: RadioPowerState,
    pub radio_supported: bool,
    pub discoverability_service_enabled: bool,
    pub power_saving_active: bool,
    pub idle_mode_active: bool,
    /// Unix millis when this snapshot was captured
    pub captured_at: u64,
}

impl SystemState {
    /// A fully ready snapshot, useful as a test baseline
    pub fn ready() -> Self {
        Self {
            power: RadioPowerState::On,
            radio_supported: true,
            discoverability_service_enabled: true,
            power_saving_active: false,
            idle_mode_active: false,
            captured_at: now_ms(),
        }
    }
}

/// OS power/service state collaborator; observed, never toggled from here
#[cfg_attr(test, mockall::automock)]
pub trait SystemStateSource: Send + Sync {
    /// Query the current state
    fn current_state(&self) -> SystemState;
    /// Subscribe to change notifications (delivered via `handle_update`)
    fn subscribe(&self) -> Result<(), String>;
    fn unsubscribe(&self) -> Result<(), String>;
}

/// A single changed field between two snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChange {
    PowerChanged {
        from: RadioPowerState,
        to: RadioPowerState,
    },
    RadioSupportChanged(bool),
    DiscoverabilityServiceChanged(bool),
    PowerSavingChanged(bool),
    IdleModeChanged(bool),
}

/// Hardware/readiness errors; recoverable, re-checked continuously
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadinessError {
    #[error("Bluetooth radio is not supported on this hardware")]
    HardwareUnsupported,
    #[error("Radio is off; turn on Bluetooth to continue")]
    RadioOff,
    #[error("Radio is still turning on; retry shortly")]
    RadioTurningOn,
    #[error("Radio is turning off")]
    RadioTurningOff,
    #[error("Power-saving restrictions are active; radio use is limited")]
    PowerSavingActive,
    #[error("Discoverability service is disabled; enable it in system settings")]
    DiscoverabilityServiceDisabled,
    #[error("System state source unavailable: {0}")]
    SourceUnavailable(String),
}

type Listener = Box<dyn Fn(&StateChange) + Send + Sync>;

/// Monitors the OS state collaborator and serves readiness verdicts
pub struct ReadinessMonitor {
    source: Arc<dyn SystemStateSource>,
    tier: PlatformTier,
    state: RwLock<Option<SystemState>>,
    monitoring: RwLock<bool>,
    listeners: RwLock<Vec<Listener>>,
}

impl ReadinessMonitor {
    pub fn new(source: Arc<dyn SystemStateSource>, tier: PlatformTier) -> Self {
        Self {
            source,
            tier,
            state: RwLock::new(None),
            monitoring: RwLock::new(false),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Subscribe to the collaborator and take one immediate snapshot
    pub fn start(&self) -> Result<(), ReadinessError> {
        {
            let mut monitoring = self.monitoring.write();
            if *monitoring {
                return Ok(());
            }
            *monitoring = true;
        }

        if let Err(e) = self.source.subscribe() {
            *self.monitoring.write() = false;
            return Err(ReadinessError::SourceUnavailable(e));
        }

        let initial = self.source.current_state();
        *self.state.write() = Some(initial);

        tracing::info!(power = ?initial.power, "readiness monitoring started");
        Ok(())
    }

    /// Unsubscribe and clear listeners and the cached snapshot
    pub fn stop(&self) {
        {
            let mut monitoring = self.monitoring.write();
            if !*monitoring {
                return;
            }
            *monitoring = false;
        }

        if let Err(e) = self.source.unsubscribe() {
            tracing::warn!(error = %e, "unsubscribe from state source failed");
        }
        *self.state.write() = None;
        self.listeners.write().clear();
        tracing::info!("readiness monitoring stopped");
    }

    pub fn is_monitoring(&self) -> bool {
        *self.monitoring.read()
    }

    /// Cached snapshot, or `None` if monitoring was never started
    pub fn snapshot(&self) -> Option<SystemState> {
        *self.state.read()
    }

    /// Register a change listener; notified only of actual field changes
    pub fn add_listener(&self, listener: impl Fn(&StateChange) + Send + Sync + 'static) {
        self.listeners.write().push(Box::new(listener));
    }

    /// Apply a collaborator change notification
    ///
    /// Late callbacks after `stop` are discarded. The first snapshot after
    /// `start` establishes the baseline; only subsequent diffs are emitted.
    pub fn handle_update(&self, new: SystemState) {
        if !*self.monitoring.read() {
            return;
        }

        let prior = {
            let mut state = self.state.write();
            state.replace(new)
        };

        let Some(prior) = prior else {
            return;
        };

        let changes = diff_states(&prior, &new);
        if changes.is_empty() {
            return;
        }

        tracing::debug!(changes = changes.len(), "system state changed");
        let listeners = self.listeners.read();
        for change in &changes {
            for listener in listeners.iter() {
                listener(change);
            }
        }
    }

    /// Compose a readiness verdict for the requested role
    ///
    /// Uses the cached snapshot when monitoring, otherwise queries the
    /// collaborator on demand so the verdict is never stale-by-design.
    pub fn check_readiness(&self, role: Role) -> Result<(), ReadinessError> {
        let state = self
            .snapshot()
            .unwrap_or_else(|| self.source.current_state());

        if !state.radio_supported {
            return Err(ReadinessError::HardwareUnsupported);
        }

        match state.power {
            RadioPowerState::On => {}
            RadioPowerState::Off => return Err(ReadinessError::RadioOff),
            RadioPowerState::TurningOn => return Err(ReadinessError::RadioTurningOn),
            RadioPowerState::TurningOff => return Err(ReadinessError::RadioTurningOff),
        }

        // Doze/idle restricts background radio activity the same way
        if state.power_saving_active || state.idle_mode_active {
            return Err(ReadinessError::PowerSavingActive);
        }

        if role.is_initiator_capable()
            && self.tier.requires_discoverability_service()
            && !state.discoverability_service_enabled
        {
            return Err(ReadinessError::DiscoverabilityServiceDisabled);
        }

        Ok(())
    }
}

/// Field-by-field diff of two snapshots, ignoring the capture timestamp
fn diff_states(prior: &SystemState, new: &SystemState) -> Vec<StateChange> {
    let mut changes = Vec::new();
    if prior.power != new.power {
        changes.push(StateChange::PowerChanged {
            from: prior.power,
            to: new.power,
        });
    }
    if prior.radio_supported != new.radio_supported {
        changes.push(StateChange::RadioSupportChanged(new.radio_supported));
    }
    if prior.discoverability_service_enabled != new.discoverability_service_enabled {
        changes.push(StateChange::DiscoverabilityServiceChanged(
            new.discoverability_service_enabled,
        ));
    }
    if prior.power_saving_active != new.power_saving_active {
        changes.push(StateChange::PowerSavingChanged(new.power_saving_active));
    }
    if prior.idle_mode_active != new.idle_mode_active {
        changes.push(StateChange::IdleModeChanged(new.idle_mode_active));
    }
    changes
}
