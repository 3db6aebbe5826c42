//! Subscription registry.
//!
//! Tracks the live runner for each subscription id. Dispatch takes cheap
//! snapshots under a read lock, so fan-out never waits on lifecycle changes
//! beyond a short critical section.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::runner::{CoalescingRunner, RunnerHandle};
use crate::subscriber::SubscriptionId;

/// Registry of active subscription runners.
///
/// Removing a registration cancels its runner inside the same critical
/// section, so no snapshot taken afterwards can reach a live but
/// unregistered runner.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    /// Map of active subscriptions: id -> runner task handle
    active: RwLock<HashMap<SubscriptionId, RunnerHandle>>,
}

impl SubscriptionRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            active: RwLock::new(HashMap::new()),
        }
    }

    /// Register a runner unless that would take the registry past `max`.
    ///
    /// A runner already registered under the same id is cancelled and
    /// returned so the caller can wait for it to stop. Replacing an existing id never counts against the limit. The check
    /// and the insert share one critical section, so concurrent callers
    /// cannot overshoot. A rejected handle is handed back uncancelled.
    pub fn try_insert(
        &self,
        handle: RunnerHandle,
        max: Option<usize>,
    ) -> Result<Option<RunnerHandle>, RunnerHandle> {
        let id = handle.runner().id();
        let mut active = self.write();

        if let Some(max) = max {
            if !active.contains_key(&id) && active.len() >= max {
                return Err(handle);
            }
        }

        Ok(takeover(&mut active, handle))
    }

    /// Unregister and cancel the runner for `id`.
    pub fn remove(&self, id: &SubscriptionId) -> Option<RunnerHandle> {
        let mut active = self.write();
        let removed = active.remove(id);
        if let Some(handle) = &removed {
            handle.runner().cancel();
        }
        removed
    }

    /// Unregister and cancel every runner.
    pub fn drain_all(&self) -> Vec<RunnerHandle> {
        let mut active = self.write();
        let handles: Vec<RunnerHandle> = active.drain().map(|(_, handle)| handle).collect();
        for handle in &handles {
            handle.runner().cancel();
        }
        handles
    }

    /// Runners registered at this instant.
    pub fn snapshot(&self) -> Vec<Arc<CoalescingRunner>> {
        self.read()
            .values()
            .map(|handle| Arc::clone(handle.runner()))
            .collect()
    }

    pub fn get(&self, id: &SubscriptionId) -> Option<Arc<CoalescingRunner>> {
        self.read().get(id).map(|handle| Arc::clone(handle.runner()))
    }

    pub fn contains(&self, id: &SubscriptionId) -> bool {
        self.read().contains_key(id)
    }

    pub fn ids(&self) -> Vec<SubscriptionId> {
        self.read().keys().copied().collect()
    }

    /// Get the number of active subscriptions.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    // A panic while holding the lock cannot leave the map half-updated,
    // so a poisoned lock is still safe to use.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<SubscriptionId, RunnerHandle>> {
        self.active.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<SubscriptionId, RunnerHandle>> {
        self.active.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Insert `handle`, cancelling whatever it replaces.
fn takeover(
    active: &mut HashMap<SubscriptionId, RunnerHandle>,
    handle: RunnerHandle,
) -> Option<RunnerHandle> {
    let id = handle.runner().id();
    let previous = active.insert(id, handle);
    if let Some(old) = &previous {
        tracing::info!(subscription_id = %id, "Terminating prior runner (takeover)");
        old.runner().cancel();
    }
    previous
}
