//! Coalescing buffer of undelivered prices.
//!
//! Uses `dashmap` for lock-free-for-callers per-key upserts:
//! - many producers overwrite concurrently (last write wins)
//! - one drainer takes every key currently present
//!
//! The drain removes keys one at a time, so each removal returns the most
//! recent value written before it. A write racing with the drain either
//! lands in this batch or stays for the next one; it is never lost.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Latest undelivered price per symbol.
#[derive(Debug, Default)]
pub struct PendingUpdates {
    prices: DashMap<String, f64>,
    /// Values overwritten before any drain observed them.
    coalesced: AtomicU64,
}

impl PendingUpdates {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self {
            prices: DashMap::new(),
            coalesced: AtomicU64::new(0),
        }
    }

    /// Store `price` as the latest value for `symbol`.
    ///
    /// Returns true if an undelivered value was superseded.
    pub fn upsert(&self, symbol: &str, price: f64) -> bool {
        // Avoid allocating the key when the symbol is already pending
        let replaced = match self.prices.get_mut(symbol) {
            Some(mut slot) => {
                *slot = price;
                true
            }
            None => self.prices.insert(symbol.to_string(), price).is_some(),
        };
        if replaced {
            self.coalesced.fetch_add(1, Ordering::Relaxed);
        }
        replaced
    }

    /// Take every pending (symbol, price) pair, leaving the buffer empty
    /// for the keys observed.
    pub fn drain(&self) -> Vec<(String, f64)> {
        let symbols: Vec<String> = self.prices.iter().map(|e| e.key().clone()).collect();
        symbols
            .into_iter()
            .filter_map(|symbol| self.prices.remove(&symbol))
            .collect()
    }

    /// Latest pending price for `symbol`, if any.
    pub fn peek(&self, symbol: &str) -> Option<f64> {
        self.prices.get(symbol).map(|v| *v)
    }

    /// Drop every pending update.
    /// Discard every pending price. Returns how many were discarded.
    pub fn clear(&self) -> usize {
        let keys: Vec<String> = self.prices.iter().map(|e| e.key().clone()).collect();
        keys.iter().filter(|key| self.prices.remove(*key).is_some()).count()
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    /// Total number of values superseded before delivery.
    pub fn coalesced(&self) -> u64 {
        self.coalesced.load(Ordering::Relaxed)
    }
}
