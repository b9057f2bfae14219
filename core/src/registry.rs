/// Resource lifecycle registry — tracks every radio handle from creation
/// to disposal
///
/// Handles acquired from the radio stack (scan sessions, advertise sessions,
/// connections, server instances, scheduled tasks, callback tokens) are leak
/// risks; the registry holds a non-owning reference to each, ages them, and
/// guarantees at-most-one release call per handle even when the owning
/// object has already become unreachable.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use thiserror::Error;

use crate::device::now_ms;

/// Default interval between sweep passes (30 seconds)
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 30_000;
/// Default maximum entry age (5 minutes)
pub const DEFAULT_MAX_AGE_MS: u64 = 300_000;
/// Default maximum idle time for Created entries (2 minutes)
pub const DEFAULT_MAX_IDLE_MS: u64 = 120_000;
/// Default entry-count ceiling
pub const DEFAULT_CAPACITY: usize = 50;

/// What kind of radio handle an entry tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Connection,
    Scan,
    Advertise,
    Server,
    ScheduledTask,
    CallbackToken,
}

/// Entry lifecycle state
///
/// Once Disposed an entry is immutable and removed on the next sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceState {
    Created,
    Active,
    Paused,
    Disposing,
    Disposed,
}

/// Monotonically unique resource identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceId(u64);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "resource-{}", self.0)
    }
}

/// The underlying radio handle's release routine
///
/// The handle itself is owned by the OS collaborator; the registry only
/// references it and never assumes it is still alive.
pub trait ReleasableHandle: Send + Sync {
    fn release(&self) -> Result<(), String>;
}

/// Errors from registry operations; returned, never thrown across boundaries
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Unknown resource: {0}")]
    NotFound(ResourceId),
    #[error("Invalid transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: ResourceState,
        to: ResourceState,
    },
}

/// Registry tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub sweep_interval_ms: u64,
    pub max_age_ms: u64,
    pub max_idle_ms: u64,
    pub capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
            max_age_ms: DEFAULT_MAX_AGE_MS,
            max_idle_ms: DEFAULT_MAX_IDLE_MS,
            capacity: DEFAULT_CAPACITY,
        }
    }
}

impl RegistryConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.sweep_interval_ms == 0 {
            return Err("sweep interval must be > 0".to_string());
        }
        if self.capacity == 0 {
            return Err("capacity must be > 0".to_string());
        }
        Ok(())
    }
}

struct Entry {
    kind: ResourceKind,
    handle: Weak<dyn ReleasableHandle>,
    state: ResourceState,
    created_at: u64,
    last_access: u64,
    metadata: HashMap<String, String>,
}

/// Counts from one sweep pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Disposed entries removed
    pub removed_disposed: usize,
    /// Dead-weak entries disposed defensively
    pub collected_dead: usize,
    /// Entries evicted past the max-age ceiling
    pub evicted_aged: usize,
    /// Created entries evicted past the max-idle ceiling
    pub evicted_idle: usize,
    /// Entries evicted over the capacity ceiling
    pub evicted_overflow: usize,
    /// Whether a further sweep was scheduled
    pub rescheduled: bool,
}

struct Inner {
    entries: HashMap<u64, Entry>,
    sweep_pending: bool,
}

/// The registry; all mutations go through its transition operations
pub struct ResourceRegistry {
    config: RegistryConfig,
    inner: Mutex<Inner>,
    next_id: AtomicU64,
}

impl ResourceRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                sweep_pending: false,
            }),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Track a handle; schedules a sweep if none is pending
    pub fn register(&self, handle: &Arc<dyn ReleasableHandle>, kind: ResourceKind) -> ResourceId {
        self.register_at(handle, kind, now_ms())
    }

    /// `register` against an explicit clock value
    pub fn register_at(
        &self,
        handle: &Arc<dyn ReleasableHandle>,
        kind: ResourceKind,
        now_ms: u64,
    ) -> ResourceId {
        let id = ResourceId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut inner = self.inner.lock();
        inner.entries.insert(
            id.0,
            Entry {
                kind,
                handle: Arc::downgrade(handle),
                state: ResourceState::Created,
                created_at: now_ms,
                last_access: now_ms,
                metadata: HashMap::new(),
            },
        );
        inner.sweep_pending = true;
        tracing::debug!(%id, ?kind, "resource registered");
        id
    }

    /// Refresh last-access without changing state
    pub fn touch(&self, id: ResourceId) -> Result<(), RegistryError> {
        self.touch_at(id, now_ms())
    }

    pub fn touch_at(&self, id: ResourceId, now_ms: u64) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock();
        let entry = inner
            .entries
            .get_mut(&id.0)
            .ok_or(RegistryError::NotFound(id))?;
        entry.last_access = now_ms;
        Ok(())
    }

    /// Attach free-form metadata to an entry
    pub fn set_metadata(
        &self,
        id: ResourceId,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock();
        let entry = inner
            .entries
            .get_mut(&id.0)
            .ok_or(RegistryError::NotFound(id))?;
        entry.metadata.insert(key.into(), value.into());
        Ok(())
    }

    pub fn metadata(&self, id: ResourceId, key: &str) -> Option<String> {
        let inner = self.inner.lock();
        inner.entries.get(&id.0)?.metadata.get(key).cloned()
    }

    pub fn state(&self, id: ResourceId) -> Option<ResourceState> {
        self.inner.lock().entries.get(&id.0).map(|e| e.state)
    }

    pub fn kind(&self, id: ResourceId) -> Option<ResourceKind> {
        self.inner.lock().entries.get(&id.0).map(|e| e.kind)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Whether a sweep pass is currently scheduled
    pub fn sweep_pending(&self) -> bool {
        self.inner.lock().sweep_pending
    }

    /// The only mutator of entry state
    ///
    /// Transitioning into Disposing synchronously invokes the handle's
    /// release routine exactly once, then marks the entry Disposed.
    /// Re-requesting Disposing on a Disposing or Disposed entry is an
    /// idempotent no-op. Disposed is reached internally only.
    pub fn transition(&self, id: ResourceId, new_state: ResourceState) -> Result<(), RegistryError> {
        self.transition_at(id, new_state, now_ms())
    }

    /// `transition` against an explicit clock value
    pub fn transition_at(
        &self,
        id: ResourceId,
        new_state: ResourceState,
        now_ms: u64,
    ) -> Result<(), RegistryError> {
        if new_state == ResourceState::Disposing {
            return self.dispose(id);
        }

        let mut inner = self.inner.lock();
        let entry = inner
            .entries
            .get_mut(&id.0)
            .ok_or(RegistryError::NotFound(id))?;

        let allowed = matches!(
            (entry.state, new_state),
            (ResourceState::Created, ResourceState::Active)
                | (ResourceState::Created, ResourceState::Paused)
                | (ResourceState::Active, ResourceState::Paused)
                | (ResourceState::Paused, ResourceState::Active)
        );

        if !allowed {
            return Err(RegistryError::InvalidTransition {
                from: entry.state,
                to: new_state,
            });
        }

        tracing::debug!(%id, from = ?entry.state, to = ?new_state, "resource transition");
        entry.state = new_state;
        entry.last_access = now_ms;
        Ok(())
    }

    /// Dispose one entry: mark Disposing, release outside the lock, mark
    /// Disposed. Release failures are logged and isolated.
    fn dispose(&self, id: ResourceId) -> Result<(), RegistryError> {
        let handle = {
            let mut inner = self.inner.lock();
            let entry = inner
                .entries
                .get_mut(&id.0)
                .ok_or(RegistryError::NotFound(id))?;

            match entry.state {
                // Idempotent: a second Disposing request must not release again
                ResourceState::Disposing | ResourceState::Disposed => return Ok(()),
                _ => {}
            }
            entry.state = ResourceState::Disposing;
            entry.handle.upgrade()
        };

        // The release call goes to the OS collaborator; no lock held here
        match handle {
            Some(handle) => {
                if let Err(e) = handle.release() {
                    tracing::warn!(%id, error = %e, "resource release failed");
                }
            }
            None => {
                tracing::debug!(%id, "handle already collected; skipping release");
            }
        }

        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.get_mut(&id.0) {
            entry.state = ResourceState::Disposed;
        }
        tracing::debug!(%id, "resource disposed");
        Ok(())
    }

    /// Dispose every entry of the given kind
    pub fn dispose_by_kind(&self, kind: ResourceKind) -> usize {
        let ids: Vec<ResourceId> = {
            let inner = self.inner.lock();
            inner
                .entries
                .iter()
                .filter(|(_, e)| e.kind == kind && !is_terminal(e.state))
                .map(|(id, _)| ResourceId(*id))
                .collect()
        };
        for id in &ids {
            // NotFound cannot happen for ids collected above; ignore anyway
            let _ = self.dispose(*id);
        }
        ids.len()
    }

    /// Dispose every live entry
    pub fn dispose_all(&self) -> usize {
        let ids: Vec<ResourceId> = {
            let inner = self.inner.lock();
            inner
                .entries
                .iter()
                .filter(|(_, e)| !is_terminal(e.state))
                .map(|(id, _)| ResourceId(*id))
                .collect()
        };
        for id in &ids {
            let _ = self.dispose(*id);
        }
        ids.len()
    }

    /// One sweep pass against the current clock
    pub fn sweep(&self) -> SweepReport {
        self.sweep_at(now_ms())
    }

    /// One sweep pass against an explicit clock value
    ///
    /// Removes Disposed entries, defensively disposes dead-weak entries,
    /// evicts over-age and idle entries, trims over-capacity entries
    /// (least-recently-accessed non-Active first), and reschedules itself
    /// only while the registry remains non-empty.
    pub fn sweep_at(&self, now_ms: u64) -> SweepReport {
        let mut report = SweepReport::default();

        // Phase 1: classify under the lock, without touching the collaborator
        let (dead, aged, idle): (Vec<ResourceId>, Vec<ResourceId>, Vec<ResourceId>) = {
            let inner = self.inner.lock();
            let mut dead = Vec::new();
            let mut aged = Vec::new();
            let mut idle = Vec::new();

            for (id, entry) in &inner.entries {
                if is_terminal(entry.state) {
                    continue;
                }
                let id = ResourceId(*id);
                if entry.handle.strong_count() == 0 {
                    dead.push(id);
                } else if now_ms.saturating_sub(entry.created_at) > self.config.max_age_ms {
                    aged.push(id);
                } else if entry.state == ResourceState::Created
                    && now_ms.saturating_sub(entry.last_access) > self.config.max_idle_ms
                {
                    idle.push(id);
                }
            }
            (dead, aged, idle)
        };

        for id in &dead {
            let _ = self.dispose(*id);
            report.collected_dead += 1;
        }
        for id in &aged {
            let _ = self.dispose(*id);
            report.evicted_aged += 1;
        }
        for id in &idle {
            let _ = self.dispose(*id);
            report.evicted_idle += 1;
        }

        // Phase 2: capacity trim over the remaining live entries
        let overflow: Vec<ResourceId> = {
            let inner = self.inner.lock();
            let live = inner
                .entries
                .values()
                .filter(|e| !is_terminal(e.state))
                .count();
            if live > self.config.capacity {
                let mut candidates: Vec<(u64, u64)> = inner
                    .entries
                    .iter()
                    .filter(|(_, e)| !is_terminal(e.state) && e.state != ResourceState::Active)
                    .map(|(id, e)| (e.last_access, *id))
                    .collect();
                candidates.sort_unstable();
                candidates
                    .into_iter()
                    .take(live - self.config.capacity)
                    .map(|(_, id)| ResourceId(id))
                    .collect()
            } else {
                Vec::new()
            }
        };

        for id in &overflow {
            let _ = self.dispose(*id);
            report.evicted_overflow += 1;
        }

        // Phase 3: drop Disposed entries and decide rescheduling
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        inner
            .entries
            .retain(|_, e| e.state != ResourceState::Disposed);
        report.removed_disposed = before - inner.entries.len();

        report.rescheduled = !inner.entries.is_empty();
        inner.sweep_pending = report.rescheduled;

        let any_work = report.removed_disposed
            + report.collected_dead
            + report.evicted_aged
            + report.evicted_idle
            + report.evicted_overflow
            > 0;
        if any_work {
            tracing::debug!(
                removed = report.removed_disposed,
                dead = report.collected_dead,
                aged = report.evicted_aged,
                idle = report.evicted_idle,
                overflow = report.evicted_overflow,
                "sweep pass complete"
            );
        }
        report
    }

    /// Drive periodic sweeps on a tokio timer until the registry drains
    ///
    /// The task exits once a sweep reports no reschedule (registry empty).
    /// A later `register` re-arms `sweep_pending` but does not restart the
    /// task; owners that register after a drain check `sweep_pending` and
    /// spawn a fresh driver.
    pub fn spawn_sweeper(registry: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let interval = std::time::Duration::from_millis(registry.config.sweep_interval_ms);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let report = registry.sweep();
                if !report.rescheduled {
                    break;
                }
            }
        })
    }
}

fn is_terminal(state: ResourceState) -> bool {
    matches!(state, ResourceState::Disposing | ResourceState::Disposed)
}
