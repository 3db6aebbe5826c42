//! Price Throttler: per-subscriber coalescing fan-out for price feeds.
//!
//! A single high-frequency upstream feed is decoupled from any number of
//! downstream subscribers. Each subscriber gets its own runner task holding
//! only the latest undelivered price per symbol, so a slow subscriber never
//! delays the others and never accumulates an unbounded backlog.
//!
//! # Architecture
//!
//! - **Coalescing**: superseded prices for a symbol are dropped before delivery
//! - **Task per subscriber**: runners are independent tokio tasks, never a shared pool
//! - **Cooperative cancellation**: cancel wakes an idle runner so it stops promptly
//! - **Observable**: tracing spans and OpenTelemetry counters
//!
//! # Modules
//!
//! - [`config`]: CLI and environment configuration
//! - [`error`]: Dispatch and delivery error types
//! - [`feed`]: Newline-delimited JSON price feed parsing
//! - [`flow`]: Coalescing buffer and wake signal
//! - [`observability`]: Metrics and tracing setup
//! - [`runner`]: Per-subscriber coalescing runner loop
//! - [`service`]: Dispatcher and subscription registry
//! - [`subscriber`]: Subscriber capability and adapters

// Lint configuration
#![warn(clippy::all)]
#![allow(
    clippy::module_name_repetitions, // service::registry::SubscriptionRegistry is fine
    clippy::must_use_candidate,      // Not all functions need #[must_use]
    clippy::missing_errors_doc,      // Error docs can be verbose
    clippy::missing_panics_doc       // Panic docs can be verbose
)]

pub mod config;
pub mod error;
pub mod feed;
pub mod flow;
pub mod observability;
pub mod runner;
pub mod service;
pub mod subscriber;

pub use error::{DeliveryError, DispatchError};
pub use service::{Dispatcher, DispatcherConfig, SubscribeOutcome};
pub use subscriber::{FnSubscriber, LogSubscriber, Subscriber, SubscriptionId};
