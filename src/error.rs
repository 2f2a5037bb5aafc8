// src/error.rs

//! Unified error handling for the roster sync service.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client could not be built or a request failed outside a fetch
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Database driver error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Upstream fetch failed
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Configuration error (invalid source, malformed filter, ...)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Upsert called with nothing to write
    #[error("Cannot upsert an empty batch")]
    EmptyBatch,

    /// A record reached the storage gateway without its natural key
    #[error("Record at index {index} has no external id")]
    MissingKey { index: usize },

    /// A batch write strategy failed
    #[error("Store write failed ({strategy}): {message}")]
    StoreWrite { strategy: String, message: String },

    /// A bounded store operation ran out of time
    #[error("{operation} timed out after {}ms", .limit.as_millis())]
    Timeout { operation: String, limit: Duration },
}

impl AppError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a store write error tagged with the strategy that failed.
    pub fn store_write(strategy: impl fmt::Display, message: impl fmt::Display) -> Self {
        Self::StoreWrite {
            strategy: strategy.to_string(),
            message: message.to_string(),
        }
    }

    /// Create a timeout error for a named operation.
    pub fn timeout(operation: impl Into<String>, limit: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            limit,
        }
    }
}

/// Failure of a single upstream request.
///
/// Kept separate from [`AppError`] because fetch failures are recorded on the
/// per-source result instead of aborting the cycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Upstream answered with a non-2xx status
    #[error("HTTP {status}: {reason}")]
    Status { status: u16, reason: String },

    /// Request did not complete within the per-request timeout
    #[error("request timed out after {0}ms")]
    Timeout(u64),

    /// Connection or protocol failure
    #[error("request failed: {0}")]
    Request(String),

    /// Body was not valid JSON
    #[error("invalid JSON body: {0}")]
    Decode(String),
}

impl FetchError {
    /// HTTP status carried by this failure, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}
