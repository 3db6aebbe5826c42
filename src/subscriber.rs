//! Subscriber capability and subscription identity.
//!
//! The dispatcher treats every subscriber uniformly: it may be slow and it
//! may fail, nothing else is assumed.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::DeliveryError;

/// Receiver of coalesced price updates.
#[async_trait]
pub trait Subscriber: Send + Sync + 'static {
    /// Handle the latest known price for `symbol`.
    async fn on_price(&self, symbol: &str, price: f64) -> Result<(), DeliveryError>;
}

/// Opaque token identifying one registration.
///
/// UUIDv7 keeps ids time-sortable, which makes log lines easy to follow.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Generate a fresh, never-before-issued id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for SubscriptionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Adapter turning an async closure into a [`Subscriber`].
///
/// # Example
///
/// ```
/// use price_throttler::{DeliveryError, FnSubscriber};
///
/// let sub = FnSubscriber::new(|symbol: String, price: f64| async move {
///     println!("{symbol} = {price}");
///     Ok::<(), DeliveryError>(())
/// });
/// # let _ = sub;
/// ```
pub struct FnSubscriber<F> {
    f: F,
}

impl<F> FnSubscriber<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Subscriber for FnSubscriber<F>
where
    F: Fn(String, f64) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), DeliveryError>> + Send + 'static,
{
    async fn on_price(&self, symbol: &str, price: f64) -> Result<(), DeliveryError> {
        (self.f)(symbol.to_string(), price).await
    }
}

/// Subscriber that logs every delivered price.
///
/// An optional processing delay simulates a slow consumer.
#[derive(Debug, Clone)]
pub struct LogSubscriber {
    name: String,
    processing_delay: Duration,
}

impl LogSubscriber {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            processing_delay: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn with_processing_delay(mut self, delay: Duration) -> Self {
        self.processing_delay = delay;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl Subscriber for LogSubscriber {
    async fn on_price(&self, symbol: &str, price: f64) -> Result<(), DeliveryError> {
        if !self.processing_delay.is_zero() {
            tokio::time::sleep(self.processing_delay).await;
        }
        tracing::info!(subscriber = %self.name, symbol, price, "Price delivered");
        Ok(())
    }
}
