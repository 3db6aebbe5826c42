//! Test utilities shared by the dispatcher integration tests.
//!
//! Provides:
//! - A recording subscriber with configurable latency and failures
//! - A polling helper for eventually-consistent assertions

#![allow(dead_code)]

use async_trait::async_trait;
use price_throttler::{DeliveryError, Subscriber};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Subscriber that records every call it receives.
#[derive(Default)]
pub struct RecordingSubscriber {
    calls: Mutex<Vec<(String, f64)>>,
    delay: Duration,
    failing: HashSet<String>,
}

impl RecordingSubscriber {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A subscriber that takes `delay` to process each price.
    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::default()
        })
    }

    /// A subscriber that rejects every price for the given symbols.
    pub fn failing_on(symbols: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            failing: symbols.iter().map(|s| (*s).to_string()).collect(),
            ..Self::default()
        })
    }

    pub fn calls(&self) -> Vec<(String, f64)> {
        self.calls.lock().unwrap().clone()
    }

    /// Values received for `symbol`, in delivery order.
    pub fn values_for(&self, symbol: &str) -> Vec<f64> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| s == symbol)
            .map(|(_, v)| *v)
            .collect()
    }

    pub fn last_for(&self, symbol: &str) -> Option<f64> {
        self.values_for(symbol).last().copied()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Subscriber for RecordingSubscriber {
    async fn on_price(&self, symbol: &str, price: f64) -> Result<(), DeliveryError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.contains(symbol) {
            return Err(DeliveryError::rejected(format!("{symbol} not tradable")));
        }
        self.calls.lock().unwrap().push((symbol.to_string(), price));
        Ok(())
    }
}

/// Wait for a condition to become true with timeout.
///
/// # Returns
///
/// `true` if condition was met, `false` if timeout expired
pub async fn wait_for<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
