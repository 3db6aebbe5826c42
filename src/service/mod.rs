//! Dispatcher: fan-out entry point for the price feed.

pub mod registry;

pub use crate::config::DispatcherConfig;
pub use registry::SubscriptionRegistry;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use std::sync::{Arc, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::error::{DeliveryError, DispatchError};
use crate::observability::metrics;
use crate::runner::{CoalescingRunner, RunnerHandle, RunnerStats};
use crate::subscriber::{Subscriber, SubscriptionId};

/// Result of registering under an explicit identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// No registration existed for the identity.
    Created,
    /// A prior registration was stopped and replaced.
    Replaced,
}

/// Fans every incoming price out to one coalescing runner per subscriber.
///
/// `dispatch` and `unsubscribe` never wait on subscribers. Replacing an
/// identity waits for its previous runner to stop, and only calls for that
/// same identity queue behind it.
pub struct Dispatcher {
    registry: SubscriptionRegistry,
    /// Per-identity replace locks, present only while a call holds or awaits one.
    identity_locks: DashMap<SubscriptionId, Arc<Mutex<()>>>,
    /// Stops of unsubscribed runners still finishing their last drain.
    retiring: std::sync::Mutex<JoinSet<()>>,
    /// Scheduling resource for runner tasks; resolved per call when unset.
    runtime: Option<Handle>,
    config: DispatcherConfig,
}

impl Dispatcher {
    /// Create a dispatcher that spawns runners on the ambient tokio runtime.
    pub fn new(config: DispatcherConfig) -> Self {
        Self {
            registry: SubscriptionRegistry::new(),
            identity_locks: DashMap::new(),
            retiring: std::sync::Mutex::new(JoinSet::new()),
            runtime: None,
            config,
        }
    }

    /// Create a dispatcher that spawns runners on `runtime`.
    pub fn with_runtime(config: DispatcherConfig, runtime: Handle) -> Self {
        Self {
            registry: SubscriptionRegistry::new(),
            identity_locks: DashMap::new(),
            retiring: std::sync::Mutex::new(JoinSet::new()),
            runtime: Some(runtime),
            config,
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Register `subscriber` under a fresh id and start its runner.
    pub async fn subscribe(
        &self,
        subscriber: Arc<dyn Subscriber>,
    ) -> Result<SubscriptionId, DispatchError> {
        let id = SubscriptionId::new();
        self.subscribe_as(id, subscriber).await?;
        Ok(id)
    }

    /// Register `subscriber` under `id`, replacing any existing registration.
    ///
    /// A replaced runner is fully stopped before the new one starts. Only
    /// calls for the same `id` wait for that stop.
    #[tracing::instrument(skip_all, fields(subscription_id = %id))]
    pub async fn subscribe_as(
        &self,
        id: SubscriptionId,
        subscriber: Arc<dyn Subscriber>,
    ) -> Result<SubscribeOutcome, DispatchError> {
        let runtime = self.runtime()?;
        let _identity = self.lock_identity(id).await;
        let outcome = self.replace_and_start(id, subscriber, &runtime).await?;

        let count = self.registry.len();
        metrics::record_active_subscriptions(count);
        tracing::info!(?outcome, active = count, "Subscription registered");
        Ok(outcome)
    }

    /// Cancel and remove the runner for `id`.
    ///
    /// The runner is unregistered and cancelled in one step, so no later
    /// dispatch reaches it. A drain already in progress finishes in the
    /// background within the stop timeout; `shutdown` waits for it.
    #[tracing::instrument(skip_all, fields(subscription_id = %id))]
    pub async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), DispatchError> {
        let handle = self
            .registry
            .remove(&id)
            .ok_or(DispatchError::NotRegistered(id))?;

        let count = self.registry.len();
        metrics::record_active_subscriptions(count);
        self.retire(handle);

        tracing::info!(active = count, "Subscription removed");
        Ok(())
    }

    /// Forward one price to every registered subscriber.
    ///
    /// Returns the number of runners the price was enqueued on.
    pub fn dispatch(&self, symbol: &str, price: f64) -> usize {
        let runners = self.registry.snapshot();
        for runner in &runners {
            runner.enqueue(symbol, price);
        }

        metrics::record_dispatch(symbol, runners.len());
        tracing::trace!(symbol, price, fanout = runners.len(), "Price dispatched");
        runners.len()
    }

    /// Number of live subscriptions.
    pub fn count(&self) -> usize {
        self.registry.len()
    }

    pub fn subscription_ids(&self) -> Vec<SubscriptionId> {
        self.registry.ids()
    }

    /// Live runner registered under `id`.
    pub fn runner(&self, id: &SubscriptionId) -> Option<Arc<CoalescingRunner>> {
        self.registry.get(id)
    }

    /// Counters for one subscription's runner.
    pub fn stats(&self, id: &SubscriptionId) -> Option<RunnerStats> {
        self.runner(id).map(|runner| runner.stats())
    }

    /// Stop every runner, including unsubscribed ones still finishing, and
    /// clear the registry.
    pub async fn shutdown(&self) {
        let handles = self.registry.drain_all();
        let mut retiring = std::mem::take(&mut *self.retiring());

        let total = handles.len();
        let timeout = self.config.stop_timeout;
        let clean = join_all(handles.into_iter().map(|h| h.stop(timeout)))
            .await
            .into_iter()
            .filter(|stopped| *stopped)
            .count();
        while retiring.join_next().await.is_some() {}

        metrics::record_active_subscriptions(0);
        tracing::info!(total, clean, "Dispatcher shut down");
    }

    fn runtime(&self) -> Result<Handle, DispatchError> {
        match &self.runtime {
            Some(handle) => Ok(handle.clone()),
            None => Handle::try_current()
                .map_err(|e| DispatchError::SchedulingUnavailable(e.to_string())),
        }
    }

    async fn replace_and_start(
        &self,
        id: SubscriptionId,
        subscriber: Arc<dyn Subscriber>,
        runtime: &Handle,
    ) -> Result<SubscribeOutcome, DispatchError> {
        let outcome = match self.registry.remove(&id) {
            Some(previous) => {
                previous.stop(self.config.stop_timeout).await;
                SubscribeOutcome::Replaced
            }
            None => SubscribeOutcome::Created,
        };

        let handle = CoalescingRunner::new(id).spawn(subscriber, runtime);
        match self.registry.try_insert(handle, self.config.max_subscribers) {
            Ok(None) => Ok(outcome),
            Ok(Some(stale)) => {
                stale.stop(self.config.stop_timeout).await;
                Ok(outcome)
            }
            Err(rejected) => {
                // Never registered, so nothing could have been enqueued on it
                rejected.runner().cancel();
                let max = self.config.max_subscribers.unwrap_or_default();
                tracing::warn!(max, "Subscription capacity reached");
                Err(DispatchError::SchedulingUnavailable(format!(
                    "subscriber capacity of {max} reached"
                )))
            }
        }
    }

    /// Finish stopping an unregistered runner off the caller's path.
    fn retire(&self, handle: RunnerHandle) {
        match self.runtime() {
            Ok(runtime) => {
                let timeout = self.config.stop_timeout;
                let mut retiring = self.retiring();
                while retiring.try_join_next().is_some() {}
                retiring.spawn_on(
                    async move {
                        handle.stop(timeout).await;
                    }
                    .in_current_span(),
                    &runtime,
                );
            }
            // Already cancelled; the task exits on its own after its drain
            Err(_) => drop(handle),
        }
    }

    fn retiring(&self) -> std::sync::MutexGuard<'_, JoinSet<()>> {
        self.retiring.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn lock_identity(&self, id: SubscriptionId) -> IdentityGuard<'_> {
        let lock = Arc::clone(&*self.identity_locks.entry(id).or_default());
        IdentityGuard {
            locks: &self.identity_locks,
            id,
            guard: Some(lock.lock_owned().await),
        }
    }
}

/// Exclusive hold on one identity's lifecycle.
///
/// Dropping it releases the lock and forgets the entry once nobody else
/// holds or awaits it, so the map only tracks identities in flight.
struct IdentityGuard<'a> {
    locks: &'a DashMap<SubscriptionId, Arc<Mutex<()>>>,
    id: SubscriptionId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for IdentityGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .remove_if(&self.id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DispatcherConfig::default())
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        // Runners see the cancel on their next wake and exit on their own
        let handles = self.registry.drain_all();
        if !handles.is_empty() {
            tracing::debug!(count = handles.len(), "Dispatcher dropped, runners cancelled");
        }
    }
}

/// A dispatcher is itself a subscriber, so dispatchers can be chained.
#[async_trait]
impl Subscriber for Dispatcher {
    async fn on_price(&self, symbol: &str, price: f64) -> Result<(), DeliveryError> {
        self.dispatch(symbol, price);
        Ok(())
    }
}
