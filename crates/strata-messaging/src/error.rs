//! Broker and worker error types.

use std::time::Duration;

use strata_core::error::DomainError;
use thiserror::Error;

/// Failure talking to the partitioned log.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The caller's cancellation scope was cancelled while waiting.
    #[error("operation cancelled")]
    Cancelled,

    /// The reader or log was closed and has nothing more to deliver.
    #[error("log closed")]
    Closed,

    /// A write was not acknowledged in time.
    #[error("write timed out after {0:?}")]
    Timeout(Duration),

    /// The broker could not be reached or rejected the request.
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    /// A message or topic definition was rejected as malformed.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

impl BrokerError {
    /// Returns true for failures a producer may retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Unavailable(_))
    }
}

/// Failure of one consumption worker.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Fetching or committing failed.
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// Handling a message hit a domain failure.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// The worker rejected a message.
    #[error("worker {worker_id} failed: {reason}")]
    Processing {
        /// Index of the failing worker.
        worker_id: usize,
        /// What went wrong.
        reason: String,
    },

    /// The worker task panicked.
    #[error("worker {worker_id} panicked")]
    Panicked {
        /// Index of the panicking worker.
        worker_id: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_broker_errors_are_retryable() {
        assert!(BrokerError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(BrokerError::Unavailable("leader moved".into()).is_retryable());
        assert!(!BrokerError::Closed.is_retryable());
        assert!(!BrokerError::Cancelled.is_retryable());
        assert!(!BrokerError::InvalidMessage("empty topic".into()).is_retryable());
    }

    #[test]
    fn test_worker_error_wraps_domain_error_transparently() {
        let err: WorkerError = DomainError::Validation("bad payload".into()).into();

        assert_eq!(err.to_string(), "validation error: bad payload");
    }
}
