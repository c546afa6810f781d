//! Error types for docsync.
//!
//! This module defines a unified error enum that covers all error categories
//! in the workspace: configuration, I/O, text extraction, embedding, vector
//! store access and sync coordination.

use thiserror::Error;

/// Unified error type for docsync.
///
/// All fallible functions return `Result<T, AppError>`.
/// We never panic: errors must be represented and propagated.
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O and filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Text extraction failed (unparseable or unsupported format)
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// Embedding provider errors that may succeed on retry
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Embedding requests the provider will never accept (bad input, auth, dimensions)
    #[error("Embedding rejected: {0}")]
    EmbeddingRejected(String),

    /// Vector store errors
    #[error("Store error: {0}")]
    Store(String),

    /// Sync coordination errors (locking, fatal run conditions)
    #[error("Sync error: {0}")]
    Sync(String),

    /// An external call exceeded its time limit
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl AppError {
    /// Whether retrying the failed operation can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::Io(_) | AppError::Embedding(_) | AppError::Store(_) | AppError::Timeout(_)
        )
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;
