//! Coalescing and wake-up infrastructure.
//!
//! Provides:
//! - Per-subscriber coalescing buffer (latest price per symbol)
//! - Counting wake signal for sleeping runners

pub mod pending;
pub mod wake;

pub use pending::PendingUpdates;
pub use wake::WakeSignal;
