//! Observability infrastructure.
//!
//! Provides:
//! - Structured tracing via tracing-subscriber
//! - OpenTelemetry metrics for dispatch, coalescing and delivery

pub mod metrics;
pub mod tracing;
