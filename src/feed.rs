//! Newline-delimited JSON price feed.
//!
//! Each line carries one update:
//!
//! ```text
//! {"symbol": "EURRUB", "price": 10.0}
//! ```
//!
//! Blank lines are skipped. A malformed line is an error for that line only;
//! the feed reader logs it and keeps going.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncBufRead;
use tokio_stream::wrappers::LinesStream;
use tokio_stream::StreamExt;

use crate::service::Dispatcher;

/// Maximum symbol length accepted from the feed.
const MAX_SYMBOL_LEN: usize = 64;

/// Error type for feed line parsing.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("symbol cannot be empty")]
    EmptySymbol,

    #[error("symbol too long: {0} characters (max 64)")]
    SymbolTooLong(usize),

    #[error("price must be finite, got {0}")]
    InvalidPrice(f64),
}

/// One price update from the upstream feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceUpdate {
    pub symbol: String,
    pub price: f64,
}

impl PriceUpdate {
    /// Parse and validate a single feed line.
    ///
    /// Returns `Ok(None)` for blank lines.
    pub fn parse_line(line: &str) -> Result<Option<Self>, FeedError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }

        let update: PriceUpdate = serde_json::from_str(line)?;
        if update.symbol.is_empty() {
            return Err(FeedError::EmptySymbol);
        }
        if update.symbol.len() > MAX_SYMBOL_LEN {
            return Err(FeedError::SymbolTooLong(update.symbol.len()));
        }
        if !update.price.is_finite() {
            return Err(FeedError::InvalidPrice(update.price));
        }
        Ok(Some(update))
    }
}

/// Totals for one pass over a feed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedSummary {
    pub dispatched: u64,
    pub rejected: u64,
}

/// Read `reader` to the end, dispatching every valid update.
pub async fn pump<R>(reader: R, dispatcher: &Dispatcher) -> std::io::Result<FeedSummary>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = LinesStream::new(tokio::io::AsyncBufReadExt::lines(reader));
    let mut summary = FeedSummary::default();
    let mut line_no = 0_u64;

    while let Some(line) = lines.next().await {
        let line = line?;
        line_no += 1;
        match PriceUpdate::parse_line(&line) {
            Ok(Some(update)) => {
                dispatcher.dispatch(&update.symbol, update.price);
                summary.dispatched += 1;
            }
            Ok(None) => {}
            Err(e) => {
                summary.rejected += 1;
                tracing::warn!(line = line_no, error = %e, "Skipping malformed feed line");
            }
        }
    }

    tracing::debug!(
        dispatched = summary.dispatched,
        rejected = summary.rejected,
        "Feed exhausted"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_line() {
        let update = PriceUpdate::parse_line(r#"{"symbol": "EURRUB", "price": 10.5}"#)
            .unwrap()
            .unwrap();
        assert_eq!(
            update,
            PriceUpdate {
                symbol: "EURRUB".into(),
                price: 10.5
            }
        );
    }

    #[test]
    fn test_parse_blank_line() {
        assert!(PriceUpdate::parse_line("   ").unwrap().is_none());
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(matches!(
            PriceUpdate::parse_line("not json"),
            Err(FeedError::Json(_))
        ));
        assert!(matches!(
            PriceUpdate::parse_line(r#"{"symbol": "", "price": 1.0}"#),
            Err(FeedError::EmptySymbol)
        ));
        let long = format!(r#"{{"symbol": "{}", "price": 1.0}}"#, "X".repeat(65));
        assert!(matches!(
            PriceUpdate::parse_line(&long),
            Err(FeedError::SymbolTooLong(65))
        ));
    }

    #[tokio::test]
    async fn test_pump_counts_lines() {
        let feed = b"{\"symbol\":\"EURRUB\",\"price\":1.0}\n\ngarbage\n{\"symbol\":\"USDRUB\",\"price\":2.0}\n";
        let dispatcher = Dispatcher::default();

        let summary = pump(&feed[..], &dispatcher).await.unwrap();
        assert_eq!(
            summary,
            FeedSummary {
                dispatched: 2,
                rejected: 1
            }
        );
    }
}
