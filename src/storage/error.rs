//! Store-agnostic error types for the Redis layer.

use thiserror::Error;

/// Errors produced by the shared-store layer.
///
/// Every Redis-level failure is mapped onto one of these variants so the
/// queue, worker and failure-backend code can handle store trouble
/// uniformly without matching on driver error kinds.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Store is unavailable (connection lost, server down, pool exhausted).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Serialization/deserialization of a stored value failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Configuration error (bad URL, bad pool parameters).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An operation exceeded its deadline.
    #[error("operation timeout: {0}")]
    Timeout(String),

    /// Internal store error that fits no other variant.
    #[error("internal error: {0}")]
    Internal(String),
}

impl StorageError {
    /// Returns true if this error is potentially recoverable with a retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Unavailable(_) | StorageError::Timeout(_))
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<redis::RedisError> for StorageError {
    fn from(err: redis::RedisError) -> Self {
        StorageError::Unavailable(err.to_string())
    }
}
