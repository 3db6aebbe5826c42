//! Counting wake signal for runner loops.
//!
//! Backed by a `tokio::sync::Semaphore` that starts with zero permits:
//! - `notify()` adds one permit and never blocks
//! - `wait()` suspends until at least one permit exists, then absorbs all
//!   permits currently available
//!
//! Absorbing the backlog keeps a slow runner from spinning through one
//! empty drain per stale signal. Every absorbed signal belongs to a write
//! that happened before the absorb, so the drain that follows observes it.

use tokio::sync::Semaphore;

/// Counting suspend/resume primitive.
#[derive(Debug)]
pub struct WakeSignal {
    permits: Semaphore,
}

impl Default for WakeSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl WakeSignal {
    /// Create a signal with no pending wakes.
    pub fn new() -> Self {
        Self {
            permits: Semaphore::new(0),
        }
    }

    /// Record one wake.
    pub fn notify(&self) {
        self.permits.add_permits(1);
    }

    /// Suspend until at least one wake is pending.
    ///
    /// Returns the number of wakes consumed, always at least 1.
    pub async fn wait(&self) -> usize {
        // The semaphore is never closed, so acquire only fails in theory
        match self.permits.acquire().await {
            Ok(permit) => {
                permit.forget();
                1 + self.absorb()
            }
            Err(_) => 0,
        }
    }

    fn absorb(&self) -> usize {
        let available = u32::try_from(self.permits.available_permits()).unwrap_or(u32::MAX);
        if available == 0 {
            return 0;
        }
        match self.permits.try_acquire_many(available) {
            Ok(permits) => {
                permits.forget();
                available as usize
            }
            Err(_) => 0,
        }
    }
}
