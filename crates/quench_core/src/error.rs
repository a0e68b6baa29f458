//! Error types for the cache layer.

use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// A recorded fetch failure.
///
/// Fetch functions fail with this descriptor; the store records it on the
/// entry and consumers observe it as the entry's error state. It is never
/// thrown across a component boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct FetchError {
    /// Human-readable failure description.
    pub message: String,
    /// Whether re-requesting the same key is worthwhile.
    pub retryable: bool,
}

impl FetchError {
    /// Creates a retryable fetch error.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable fetch error.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if re-requesting the key can succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }
}

/// Errors raised by the cache store itself.
#[derive(Error, Debug)]
pub enum CacheError {
    /// An entry's payload was read with a type other than the one stored.
    #[error("type mismatch for key {key}: entry holds a different payload type")]
    TypeMismatch {
        /// Display form of the offending key.
        key: String,
    },

    /// The change feed was closed while a reader was waiting on it.
    #[error("change feed closed while waiting for key {key}")]
    FeedClosed {
        /// Display form of the key being waited on.
        key: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(FetchError::retryable("connection reset").is_retryable());
        assert!(!FetchError::fatal("malformed response").is_retryable());
    }

    #[test]
    fn error_display() {
        let err = FetchError::retryable("timed out");
        assert_eq!(err.to_string(), "timed out");

        let err = CacheError::TypeMismatch {
            key: "[\"account\",\"u1\"]".into(),
        };
        assert!(err.to_string().contains("account"));
    }
}
