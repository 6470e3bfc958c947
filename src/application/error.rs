//! Errors surfaced by counter store adapters.
//!
//! These never escape the ledger: every variant ends in a fail-open admission.

use std::fmt;
use std::time::Duration;

/// Failure of a single counter store round-trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached (refused, reset, DNS, ...).
    Unreachable(String),
    /// The call did not complete within the configured ceiling.
    Timeout(Duration),
    /// The store answered with something the adapter could not use.
    Protocol(String),
}

impl StoreError {
    /// Short label used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::Unreachable(_) => "unreachable",
            StoreError::Timeout(_) => "timeout",
            StoreError::Protocol(_) => "protocol",
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Unreachable(msg) => write!(f, "counter store unreachable: {}", msg),
            StoreError::Timeout(after) => {
                write!(f, "counter store call timed out after {:?}", after)
            }
            StoreError::Protocol(msg) => write!(f, "counter store protocol error: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

#[cfg(feature = "redis-store")]
impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() {
            StoreError::Unreachable(e.to_string())
        } else {
            StoreError::Protocol(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = StoreError::Unreachable("connection refused".to_string());
        assert_eq!(
            err.to_string(),
            "counter store unreachable: connection refused"
        );
        assert!(StoreError::Timeout(Duration::from_millis(250))
            .to_string()
            .contains("250ms"));
    }

    #[test]
    fn test_kind() {
        assert_eq!(StoreError::Protocol(String::new()).kind(), "protocol");
        assert_eq!(StoreError::Timeout(Duration::ZERO).kind(), "timeout");
    }
}
