/// Process lifecycle coordinator — pauses and resumes sessions as the host
/// application moves between foreground, background, and memory pressure
///
/// Registrations are non-owning: a destroyed session is silently dropped on
/// the next pass rather than faulting. Hook failures are caught and logged;
/// one failing session never blocks delivery to the others.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};

/// Default priority threshold for low-memory pausing: sessions with a
/// priority value numerically above this (lower-priority sessions) pause
pub const DEFAULT_LOW_MEMORY_PRIORITY_THRESHOLD: u32 = 50;

/// Host application phase as last signalled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppPhase {
    Foreground,
    Background,
}

/// Pause/resume/teardown hooks a session exposes to the coordinator
pub trait LifecycleAware: Send + Sync {
    /// Suspend radio activity without tearing down protocol state
    fn pause(&self) -> Result<(), String>;
    /// Undo `pause`
    fn resume(&self) -> Result<(), String>;
    /// Terminal teardown; the session will not be resumed afterwards
    fn shutdown(&self) -> Result<(), String>;
}

/// Coordinator tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    pub low_memory_priority_threshold: u32,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            low_memory_priority_threshold: DEFAULT_LOW_MEMORY_PRIORITY_THRESHOLD,
        }
    }
}

struct Registration {
    session: Weak<dyn LifecycleAware>,
    /// Lower value = higher priority
    priority: u32,
    paused: bool,
}

struct Inner {
    registrations: Vec<Registration>,
    phase: AppPhase,
    low_memory: bool,
}

enum Hook {
    Pause,
    Resume,
    Shutdown,
}

/// Receives host-app lifecycle signals and drives registered sessions
pub struct LifecycleCoordinator {
    config: LifecycleConfig,
    inner: Mutex<Inner>,
}

impl LifecycleCoordinator {
    pub fn new(config: LifecycleConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                registrations: Vec::new(),
                phase: AppPhase::Foreground,
                low_memory: false,
            }),
        }
    }

    /// Register a session with a scheduling priority (lower = higher)
    pub fn register(&self, session: &Arc<dyn LifecycleAware>, priority: u32) {
        let mut inner = self.inner.lock();
        inner.registrations.push(Registration {
            session: Arc::downgrade(session),
            priority,
            paused: false,
        });
        inner
            .registrations
            .sort_by_key(|registration| registration.priority);
        tracing::debug!(priority, total = inner.registrations.len(), "session registered");
    }

    pub fn phase(&self) -> AppPhase {
        self.inner.lock().phase
    }

    pub fn low_memory_outstanding(&self) -> bool {
        self.inner.lock().low_memory
    }

    /// Live registrations (dead weak references excluded)
    pub fn registered_count(&self) -> usize {
        let mut inner = self.inner.lock();
        inner
            .registrations
            .retain(|registration| registration.session.strong_count() > 0);
        inner.registrations.len()
    }

    pub fn paused_count(&self) -> usize {
        self.inner
            .lock()
            .registrations
            .iter()
            .filter(|registration| registration.paused)
            .count()
    }

    /// Host app moved to the background: pause all active sessions in
    /// priority order (lowest value first)
    pub fn on_background(&self) {
        let targets = {
            let mut inner = self.inner.lock();
            inner.phase = AppPhase::Background;
            collect_targets(&mut inner.registrations, |registration| !registration.paused, true)
        };
        tracing::info!(paused = targets.len(), "app backgrounded");
        run_hooks(&targets, Hook::Pause);
    }

    /// Host app returned to the foreground: resume paused sessions unless a
    /// low-memory condition is still outstanding
    pub fn on_foreground(&self) {
        let targets = {
            let mut inner = self.inner.lock();
            inner.phase = AppPhase::Foreground;
            if inner.low_memory {
                tracing::info!("app foregrounded; resume deferred until memory pressure clears");
                return;
            }
            collect_targets(&mut inner.registrations, |registration| registration.paused, false)
        };
        tracing::info!(resumed = targets.len(), "app foregrounded");
        run_hooks(&targets, Hook::Resume);
    }

    /// Memory pressure: pause sessions with priority numerically above the
    /// threshold, independent of foreground/background state
    pub fn on_low_memory(&self) {
        let threshold = self.config.low_memory_priority_threshold;
        let targets = {
            let mut inner = self.inner.lock();
            inner.low_memory = true;
            collect_targets(
                &mut inner.registrations,
                |registration| !registration.paused && registration.priority > threshold,
                true,
            )
        };
        tracing::warn!(paused = targets.len(), threshold, "low-memory signal");
        run_hooks(&targets, Hook::Pause);
    }

    /// Memory pressure cleared: resume everything only if Foreground
    pub fn on_low_memory_cleared(&self) {
        let targets = {
            let mut inner = self.inner.lock();
            inner.low_memory = false;
            if inner.phase != AppPhase::Foreground {
                return;
            }
            collect_targets(&mut inner.registrations, |registration| registration.paused, false)
        };
        tracing::info!(resumed = targets.len(), "memory pressure cleared");
        run_hooks(&targets, Hook::Resume);
    }

    /// Terminal shutdown: stop every registered session and clear the
    /// registry
    pub fn on_shutdown(&self) {
        let targets: Vec<Arc<dyn LifecycleAware>> = {
            let mut inner = self.inner.lock();
            let targets = inner
                .registrations
                .iter()
                .filter_map(|registration| registration.session.upgrade())
                .collect();
            inner.registrations.clear();
            targets
        };
        tracing::info!(sessions = targets.len(), "terminal shutdown");
        run_hooks(&targets, Hook::Shutdown);
    }
}

/// Select live registrations matching `predicate`, mark their paused flag,
/// and return their sessions in priority order. Dead weaks are pruned.
fn collect_targets(
    registrations: &mut Vec<Registration>,
    predicate: impl Fn(&Registration) -> bool,
    mark_paused: bool,
) -> Vec<Arc<dyn LifecycleAware>> {
    registrations.retain(|registration| registration.session.strong_count() > 0);

    let mut targets = Vec::new();
    for registration in registrations.iter_mut() {
        if !predicate(registration) {
            continue;
        }
        if let Some(session) = registration.session.upgrade() {
            registration.paused = mark_paused;
            targets.push(session);
        }
    }
    targets
}

/// Invoke a hook on each target outside the coordinator lock; failures are
/// logged and never block the remaining targets
fn run_hooks(targets: &[Arc<dyn LifecycleAware>], hook: Hook) {
    for session in targets {
        let result = match hook {
            Hook::Pause => session.pause(),
            Hook::Resume => session.resume(),
            Hook::Shutdown => session.shutdown(),
        };
        if let Err(e) = result {
            let name = match hook {
                Hook::Pause => "pause",
                Hook::Resume => "resume",
                Hook::Shutdown => "shutdown",
            };
            tracing::warn!(hook = name, error = %e, "lifecycle hook failed");
        }
    }
}
