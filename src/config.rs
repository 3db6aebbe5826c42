//! Configuration parsing for the throttler.
//!
//! Supports:
//! - CLI arguments via clap
//! - Environment variable overrides
//! - Sensible defaults for quick start

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Default time allowed for a cancelled runner to finish its last drain.
pub const DEFAULT_STOP_TIMEOUT_MS: u64 = 5_000;

/// Library-level dispatcher settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Upper bound on simultaneous subscriptions; `None` means unbounded.
    ///
    /// Set this when runner tasks draw on a capacity-limited resource;
    /// subscriptions beyond it are rejected instead of starving.
    pub max_subscribers: Option<usize>,
    /// How long unsubscribe/replace waits for a runner before aborting it.
    pub stop_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_subscribers: None,
            stop_timeout: Duration::from_millis(DEFAULT_STOP_TIMEOUT_MS),
        }
    }
}

/// Throttler: fan a price feed out to coalescing subscribers.
#[derive(Parser, Debug, Clone)]
#[command(name = "throttler")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Newline-delimited JSON feed file (reads stdin when omitted)
    #[arg(short, long, env = "THROTTLER_INPUT")]
    pub input: Option<PathBuf>,

    /// Number of log subscribers to attach
    #[arg(short, long, env = "THROTTLER_SUBSCRIBERS", default_value_t = 1)]
    pub subscribers: usize,

    /// Artificial per-price processing delay of each subscriber, in milliseconds
    #[arg(long, env = "THROTTLER_PROCESSING_DELAY_MS", default_value_t = 0)]
    pub processing_delay_ms: u64,

    /// Maximum simultaneous subscriptions (unbounded when omitted)
    #[arg(long, env = "THROTTLER_MAX_SUBSCRIBERS")]
    pub max_subscribers: Option<usize>,

    /// Time allowed for a cancelled runner to stop, in milliseconds
    #[arg(long, env = "THROTTLER_STOP_TIMEOUT_MS", default_value_t = DEFAULT_STOP_TIMEOUT_MS)]
    pub stop_timeout_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,

    /// OpenTelemetry collector endpoint for metrics export (optional)
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    pub otel_endpoint: Option<String>,
}

impl Config {
    /// Parse configuration from CLI arguments and environment.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Dispatcher settings derived from this configuration.
    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            max_subscribers: self.max_subscribers,
            stop_timeout: Duration::from_millis(self.stop_timeout_ms),
        }
    }

    pub fn processing_delay(&self) -> Duration {
        Duration::from_millis(self.processing_delay_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input: None,
            subscribers: 1,
            processing_delay_ms: 0,
            max_subscribers: None,
            stop_timeout_ms: DEFAULT_STOP_TIMEOUT_MS,
            log_level: "info".into(),
            otel_endpoint: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.subscribers, 1);
        assert_eq!(config.dispatcher_config(), DispatcherConfig::default());
    }

    #[test]
    fn test_parse_cli_args() {
        let config = Config::try_parse_from([
            "throttler",
            "--subscribers",
            "4",
            "--processing-delay-ms",
            "100",
            "--max-subscribers",
            "8",
            "--stop-timeout-ms",
            "250",
            "--input",
            "feed.jsonl",
        ])
        .unwrap();

        assert_eq!(config.subscribers, 4);
        assert_eq!(config.processing_delay(), Duration::from_millis(100));
        assert_eq!(config.input, Some(PathBuf::from("feed.jsonl")));

        let dispatcher = config.dispatcher_config();
        assert_eq!(dispatcher.max_subscribers, Some(8));
        assert_eq!(dispatcher.stop_timeout, Duration::from_millis(250));
    }
}
