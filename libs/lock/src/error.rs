//! Lock and store errors.

use std::time::Duration;

use brokerd_messages::{ErrorCode, ErrorResponse};
use thiserror::Error;

/// Coordination store failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached.
    #[error("coordination store unavailable: {0}")]
    Unavailable(String),

    /// The store rejected or failed the operation.
    #[error("coordination store error: {0}")]
    Backend(String),
}

/// Lock failures. Queue and execution timeouts are distinct on purpose so a
/// caller can tell "never ran" from "ran too long".
#[derive(Debug, Error)]
pub enum LockError {
    /// The lock could not be acquired before the acquire deadline.
    #[error("lock {name} not acquired within {waited:?}")]
    QueueTimeout { name: String, waited: Duration },

    /// The critical section exceeded its execution ceiling and was aborted.
    #[error("lock {name} held longer than ttl {ttl:?}, job aborted")]
    JobTimeout { name: String, ttl: Duration },

    /// The lock was configured with timings it cannot run with.
    #[error("invalid lock config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LockError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::QueueTimeout { .. } => ErrorCode::JobQueueTimeout,
            Self::JobTimeout { .. } => ErrorCode::JobTimeout,
            Self::InvalidConfig(_) | Self::Store(_) => ErrorCode::InternalError,
        }
    }

    /// Error envelope for external callers.
    pub fn to_response(&self) -> ErrorResponse {
        match self {
            Self::QueueTimeout { waited, .. } => self
                .code()
                .response(Some(&waited.as_secs().to_string())),
            Self::JobTimeout { ttl, .. } => self.code().response(Some(&ttl.as_secs().to_string())),
            Self::InvalidConfig(_) | Self::Store(_) => self.code().response(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeouts_map_to_distinct_codes() {
        let queue = LockError::QueueTimeout {
            name: "a".to_string(),
            waited: Duration::from_secs(10),
        };
        let job = LockError::JobTimeout {
            name: "a".to_string(),
            ttl: Duration::from_secs(600),
        };

        assert_eq!(queue.to_response().msg.code, 30900);
        assert_eq!(
            queue.to_response().msg.description,
            "Job timeout after waiting for 10 seconds."
        );
        assert_eq!(job.to_response().msg.code, 30901);
        assert_eq!(
            job.to_response().msg.description,
            "Job is killed since it runs longer than ttl: 600 seconds."
        );
    }
}
