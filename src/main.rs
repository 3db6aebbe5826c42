//! Throttler: fan a newline-delimited JSON price feed out to coalescing
//! log subscribers.
//!
//! # Usage
//!
//! ```bash
//! throttler --subscribers 3 --processing-delay-ms 100 --input prices.jsonl
//! ```
//!
//! Environment variables can also be used:
//! - `THROTTLER_INPUT`: Feed file (stdin when unset)
//! - `THROTTLER_SUBSCRIBERS`: Number of log subscribers
//! - `THROTTLER_PROCESSING_DELAY_MS`: Simulated per-price processing time
//! - `RUST_LOG`: Log level (trace, debug, info, warn, error)

use anyhow::Context;
use price_throttler::config::Config;
use price_throttler::feed::{pump, FeedSummary};
use price_throttler::observability::metrics::init_metrics_with_endpoint;
use price_throttler::observability::tracing::init_tracing;
use price_throttler::{Dispatcher, LogSubscriber};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, BufReader};

/// Print startup banner with version and configuration.
fn print_banner(config: &Config) {
    let version = env!("CARGO_PKG_VERSION");
    let input = config
        .input
        .as_ref()
        .map_or_else(|| "<stdin>".to_string(), |p| p.display().to_string());
    eprintln!(
        r#"
  Price Throttler v{}

  Configuration:
    Input:             {}
    Subscribers:       {}
    Processing delay:  {} ms
    Stop timeout:      {} ms

  Press Ctrl+C to shutdown gracefully.
"#,
        version, input, config.subscribers, config.processing_delay_ms, config.stop_timeout_ms
    );
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => tracing::info!("Received SIGINT (Ctrl+C), initiating shutdown..."),
                    _ = sigterm.recv() => tracing::info!("Received SIGTERM, initiating shutdown..."),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                let _ = ctrl_c.await;
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        tracing::info!("Received Ctrl+C, initiating shutdown...");
    }
}

async fn open_input(config: &Config) -> anyhow::Result<Box<dyn AsyncBufRead + Unpin + Send>> {
    Ok(match &config.input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("failed to open feed file {}", path.display()))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(BufReader::new(tokio::io::stdin())),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse_args();

    init_tracing("throttler", &config.log_level);
    init_metrics_with_endpoint(config.otel_endpoint.as_deref());
    print_banner(&config);

    let dispatcher = Dispatcher::new(config.dispatcher_config());
    for n in 0..config.subscribers {
        let subscriber = LogSubscriber::new(format!("subscriber-{n}"))
            .with_processing_delay(config.processing_delay());
        dispatcher
            .subscribe(Arc::new(subscriber))
            .await
            .context("failed to register subscriber")?;
    }

    let input = open_input(&config).await?;
    let summary: FeedSummary = tokio::select! {
        result = pump(input, &dispatcher) => result.context("failed to read feed")?,
        () = shutdown_signal() => FeedSummary::default(),
    };

    tracing::info!(
        dispatched = summary.dispatched,
        rejected = summary.rejected,
        "Feed finished, stopping subscribers"
    );
    for id in dispatcher.subscription_ids() {
        if let Some(stats) = dispatcher.stats(&id) {
            tracing::info!(
                subscription_id = %id,
                delivered = stats.delivered,
                coalesced = stats.coalesced,
                failed = stats.failed,
                "Subscriber totals"
            );
        }
    }

    dispatcher.shutdown().await;
    tracing::info!("Throttler shutdown complete");
    Ok(())
}
