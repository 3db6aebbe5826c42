//! Error types for dispatch and delivery.

use thiserror::Error;

use crate::subscriber::SubscriptionId;

/// Registry-level failures returned synchronously to the caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("subscription {0} is not registered")]
    NotRegistered(SubscriptionId),

    #[error("cannot schedule subscription runner: {0}")]
    SchedulingUnavailable(String),
}

/// Failure raised by a subscriber while handling one price.
///
/// Isolated to the key being delivered; the runner keeps draining.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("subscriber rejected price: {0}")]
    Rejected(String),

    #[error("subscriber panicked: {0}")]
    Panicked(String),
}

impl DeliveryError {
    /// Convenience constructor for subscriber implementations.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected(reason.into())
    }

    /// Build a `Panicked` error from a caught panic payload.
    pub(crate) fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let msg = payload.downcast_ref::<&str>().map_or_else(
            || {
                payload.downcast_ref::<String>().map_or_else(
                    || "unknown panic".to_string(),
                    std::string::ToString::to_string,
                )
            },
            std::string::ToString::to_string,
        );
        Self::Panicked(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_payload_str() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(
            DeliveryError::from_panic(payload.as_ref()),
            DeliveryError::Panicked("boom".into())
        );
    }

    #[test]
    fn test_panic_payload_string() {
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bad symbol"));
        assert_eq!(
            DeliveryError::from_panic(payload.as_ref()),
            DeliveryError::Panicked("bad symbol".into())
        );
    }

    #[test]
    fn test_panic_payload_unknown() {
        let payload: Box<dyn std::any::Any + Send> = Box::new(42_u8);
        assert_eq!(
            DeliveryError::from_panic(payload.as_ref()),
            DeliveryError::Panicked("unknown panic".into())
        );
    }
}
