//! Per-subscriber coalescing runner.
//!
//! Each registered subscriber gets one runner task:
//!
//! ```text
//!            enqueue(symbol, price)              cancel()
//!                 │ upsert + notify                │ flag + notify
//!                 ▼                                ▼
//!   ┌─────────┐  wake  ┌──────────┐  flag unset  ┌─────────┐
//!   │ WAITING │ ─────► │ DRAINING │ ───────────► │ WAITING │
//!   └─────────┘        └──────────┘              └─────────┘
//!                           │ flag set
//!                           ▼
//!                      ┌─────────┐
//!                      │ STOPPED │
//!                      └─────────┘
//! ```
//!
//! Cancellation issues its own wake so an idle runner observes the flag
//! without waiting for another price. A drain in progress always completes.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::error::DeliveryError;
use crate::flow::{PendingUpdates, WakeSignal};
use crate::observability::metrics;
use crate::subscriber::{Subscriber, SubscriptionId};

/// Lifecycle state of a runner loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Waiting,
    Draining,
    Stopped,
}

impl RunnerState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Waiting,
            1 => Self::Draining,
            _ => Self::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Waiting => 0,
            Self::Draining => 1,
            Self::Stopped => 2,
        }
    }
}

/// Point-in-time counters for one runner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunnerStats {
    /// Prices accepted by `enqueue`.
    pub enqueued: u64,
    /// Prices superseded before a drain picked them up.
    pub coalesced: u64,
    /// Successful subscriber callbacks.
    pub delivered: u64,
    /// Subscriber callbacks that returned an error or panicked.
    pub failed: u64,
    /// Prices still pending when the runner stopped.
    pub discarded: u64,
    /// Completed drain cycles, including empty ones.
    pub drains: u64,
}

/// Shared state of one subscriber's coalescing loop.
#[derive(Debug)]
pub struct CoalescingRunner {
    id: SubscriptionId,
    pending: PendingUpdates,
    wake: WakeSignal,
    cancelled: AtomicBool,
    state: AtomicU8,
    enqueued: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    discarded: AtomicU64,
    drains: AtomicU64,
}

impl CoalescingRunner {
    /// Create runner state for `id`. The loop is not started.
    pub fn new(id: SubscriptionId) -> Arc<Self> {
        Arc::new(Self {
            id,
            pending: PendingUpdates::new(),
            wake: WakeSignal::new(),
            cancelled: AtomicBool::new(false),
            state: AtomicU8::new(RunnerState::Waiting.as_u8()),
            enqueued: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
            drains: AtomicU64::new(0),
        })
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Overwrite the pending price for `symbol` and wake the loop.
    ///
    /// Never blocks; safe from any number of concurrent callers.
    pub fn enqueue(&self, symbol: &str, price: f64) {
        if self.pending.upsert(symbol, price) {
            metrics::record_coalesced();
        }
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        self.wake.notify();
        tracing::trace!(subscription_id = %self.id, symbol, price, "Price enqueued");
    }

    /// Request termination and wake the loop so it observes the request.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            tracing::debug!(subscription_id = %self.id, "Runner cancellation requested");
        }
        self.wake.notify();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn state(&self) -> RunnerState {
        RunnerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Number of symbols with an undelivered price.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> RunnerStats {
        RunnerStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            coalesced: self.pending.coalesced(),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            drains: self.drains.load(Ordering::Relaxed),
        }
    }

    /// Spawn the loop as an independent task on `runtime`.
    pub fn spawn(
        self: &Arc<Self>,
        subscriber: Arc<dyn Subscriber>,
        runtime: &Handle,
    ) -> RunnerHandle {
        let span = tracing::info_span!("runner", subscription_id = %self.id);
        let join = runtime.spawn(Arc::clone(self).run(subscriber).instrument(span));
        RunnerHandle {
            runner: Arc::clone(self),
            join,
        }
    }

    /// Run the loop until cancelled.
    pub async fn run(self: Arc<Self>, subscriber: Arc<dyn Subscriber>) {
        tracing::debug!("Runner started");
        loop {
            self.set_state(RunnerState::Waiting);
            let wakes = self.wake.wait().await;

            self.set_state(RunnerState::Draining);
            self.drain_once(subscriber.as_ref()).await;
            tracing::trace!(wakes, "Drain cycle complete");

            if self.is_cancelled() {
                break;
            }
        }

        // Anything still pending belongs to a cancelled subscription
        let discarded = self.pending.clear() as u64;
        self.discarded.fetch_add(discarded, Ordering::Relaxed);
        self.set_state(RunnerState::Stopped);
        tracing::debug!(discarded, "Runner stopped");
    }

    /// Deliver every pending price once. Returns (delivered, failed).
    async fn drain_once(&self, subscriber: &dyn Subscriber) -> (u64, u64) {
        let batch = self.pending.drain();
        let mut delivered = 0;
        let mut failed = 0;

        for (symbol, price) in batch {
            match deliver(subscriber, &symbol, price).await {
                Ok(()) => {
                    delivered += 1;
                    self.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    failed += 1;
                    self.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        subscription_id = %self.id,
                        symbol = %symbol,
                        price,
                        error = %e,
                        "Price delivery failed"
                    );
                }
            }
        }

        self.drains.fetch_add(1, Ordering::Relaxed);
        if delivered + failed > 0 {
            metrics::record_drain(delivered, failed);
        }
        (delivered, failed)
    }

    fn set_state(&self, state: RunnerState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }
}

/// Invoke the subscriber, turning a panic into a `DeliveryError`.
async fn deliver(
    subscriber: &dyn Subscriber,
    symbol: &str,
    price: f64,
) -> Result<(), DeliveryError> {
    match AssertUnwindSafe(subscriber.on_price(symbol, price))
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(payload) => Err(DeliveryError::from_panic(payload.as_ref())),
    }
}

/// Owner of a spawned runner task.
#[derive(Debug)]
pub struct RunnerHandle {
    runner: Arc<CoalescingRunner>,
    join: JoinHandle<()>,
}

impl RunnerHandle {
    pub fn runner(&self) -> &Arc<CoalescingRunner> {
        &self.runner
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Cancel the runner and wait for its task to finish.
    ///
    /// If the task has not stopped within `timeout` (a subscriber stuck in
    /// its callback), it is aborted. Returns true on a clean stop.
    pub async fn stop(self, timeout: Duration) -> bool {
        let id = self.runner.id();
        self.runner.cancel();

        let mut join = self.join;
        match tokio::time::timeout(timeout, &mut join).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::warn!(subscription_id = %id, error = %e, "Runner task ended abnormally");
                false
            }
            Err(_) => {
                tracing::warn!(
                    subscription_id = %id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Runner did not stop in time, aborting"
                );
                join.abort();
                let _ = join.await;
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscriber::FnSubscriber;
    use std::sync::Mutex;

    type Calls = Arc<Mutex<Vec<(String, f64)>>>;

    fn recording(delay: Duration) -> (Arc<dyn Subscriber>, Calls) {
        let calls: Calls = Arc::new(Mutex::new(Vec::new()));
        let sink = calls.clone();
        let sub: Arc<dyn Subscriber> = Arc::new(FnSubscriber::new(move |symbol: String, price: f64| {
            let sink = sink.clone();
            async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                sink.lock().unwrap().push((symbol, price));
                Ok::<(), DeliveryError>(())
            }
        }));
        (sub, calls)
    }

    async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
        for _ in 0..200 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_delivers_latest_value() {
        let (sub, calls) = recording(Duration::ZERO);
        let runner = CoalescingRunner::new(SubscriptionId::new());

        // Enqueue before the loop runs: only the last value survives
        runner.enqueue("EURRUB", 10.0);
        runner.enqueue("EURRUB", 15.0);
        runner.enqueue("EURRUB", 20.0);

        let handle = runner.spawn(sub, &Handle::current());
        assert!(wait_until(|| !calls.lock().unwrap().is_empty()).await);
        assert!(handle.stop(Duration::from_secs(1)).await);

        assert_eq!(*calls.lock().unwrap(), vec![("EURRUB".to_string(), 20.0)]);
        let stats = runner.stats();
        assert_eq!(stats.enqueued, 3);
        assert_eq!(stats.coalesced, 2);
        assert_eq!(stats.delivered, 1);
    }

    #[tokio::test]
    async fn test_cancel_stops_idle_runner() {
        let (sub, calls) = recording(Duration::ZERO);
        let runner = CoalescingRunner::new(SubscriptionId::new());
        let handle = runner.spawn(sub, &Handle::current());

        assert!(wait_until(|| runner.state() == RunnerState::Waiting).await);
        runner.cancel();

        assert!(wait_until(|| handle.is_finished()).await);
        assert_eq!(runner.state(), RunnerState::Stopped);
        assert!(calls.lock().unwrap().is_empty());
        assert_eq!(runner.stats().drains, 1);
    }

    #[tokio::test]
    async fn test_failure_isolated_per_key() {
        let calls: Calls = Arc::new(Mutex::new(Vec::new()));
        let sink = calls.clone();
        let sub: Arc<dyn Subscriber> =
            Arc::new(FnSubscriber::new(move |symbol: String, price: f64| {
                let sink = sink.clone();
                async move {
                    match symbol.as_str() {
                        "BAD" => Err(DeliveryError::rejected("unknown instrument")),
                        "PANIC" => panic!("subscriber bug"),
                        _ => {
                            sink.lock().unwrap().push((symbol, price));
                            Ok(())
                        }
                    }
                }
            }));

        let runner = CoalescingRunner::new(SubscriptionId::new());
        runner.enqueue("BAD", 1.0);
        runner.enqueue("PANIC", 2.0);
        runner.enqueue("GOOD", 3.0);
        let handle = runner.spawn(sub, &Handle::current());

        assert!(
            wait_until(|| runner.stats().drains >= 1 && runner.state() == RunnerState::Waiting)
                .await
        );
        assert_eq!(*calls.lock().unwrap(), vec![("GOOD".to_string(), 3.0)]);
        assert_eq!(runner.stats().failed, 2);

        // Loop survived the failures
        runner.enqueue("GOOD", 4.0);
        assert!(wait_until(|| calls.lock().unwrap().len() == 2).await);
        assert!(handle.stop(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_stop_aborts_stuck_subscriber() {
        let (sub, _calls) = recording(Duration::from_secs(60));
        let runner = CoalescingRunner::new(SubscriptionId::new());
        runner.enqueue("EURRUB", 1.0);
        let handle = runner.spawn(sub, &Handle::current());

        assert!(wait_until(|| runner.state() == RunnerState::Draining).await);
        assert!(!handle.stop(Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn test_drain_in_progress_completes_after_cancel() {
        let (sub, calls) = recording(Duration::from_millis(50));
        let runner = CoalescingRunner::new(SubscriptionId::new());
        runner.enqueue("EURRUB", 1.0);
        let handle = runner.spawn(sub, &Handle::current());

        assert!(wait_until(|| runner.state() == RunnerState::Draining).await);
        assert!(handle.stop(Duration::from_secs(1)).await);
        assert_eq!(*calls.lock().unwrap(), vec![("EURRUB".to_string(), 1.0)]);
    }

    #[tokio::test]
    async fn test_stop_counts_discarded_prices() {
        let (sub, calls) = recording(Duration::from_millis(50));
        let runner = CoalescingRunner::new(SubscriptionId::new());
        runner.enqueue("EURRUB", 1.0);
        let handle = runner.spawn(sub, &Handle::current());

        assert!(wait_until(|| runner.state() == RunnerState::Draining).await);
        // Arrives mid-drain; the runner stops before another drain picks it up
        runner.enqueue("USDRUB", 2.0);
        assert!(handle.stop(Duration::from_secs(1)).await);

        assert_eq!(*calls.lock().unwrap(), vec![("EURRUB".to_string(), 1.0)]);
        let stats = runner.stats();
        assert_eq!(stats.discarded, 1);
        assert_eq!(
            stats.enqueued,
            stats.delivered + stats.failed + stats.coalesced + stats.discarded
        );
        assert_eq!(runner.pending_len(), 0);
    }

    #[test]
    fn test_state_roundtrip() {
        for state in [RunnerState::Waiting, RunnerState::Draining, RunnerState::Stopped] {
            assert_eq!(RunnerState::from_u8(state.as_u8()), state);
        }
    }
}
