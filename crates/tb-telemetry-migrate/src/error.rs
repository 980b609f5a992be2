//! Error types for tb-telemetry-migrate.
//!
//! Errors are split into two classes. Transient errors (timeouts, dropped
//! connections, rate limits, 5xx responses) are retried by
//! [`crate::retry::RetryPolicy`]. Every other error aborts the run.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while exporting or importing telemetry.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration or command-line arguments.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Credentials were rejected or the session is no longer valid.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// No device with this exact name exists in the tenant.
    #[error("Device '{0}' not found")]
    DeviceNotFound(String),

    /// The server asked us to slow down (HTTP 429).
    #[error("Rate limited by server, retry after {0}s")]
    RateLimit(u64),

    /// The server failed to handle a well-formed request (HTTP 5xx).
    #[error("Server error {status}: {body}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Response body, as text.
        body: String,
    },

    /// The server rejected the request itself (HTTP 4xx other than auth).
    #[error("Request rejected {status}: {body}")]
    Client {
        /// HTTP status code.
        status: u16,
        /// Response body, as text.
        body: String,
    },

    /// Transport-level HTTP failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Local file I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV encoding or decoding failure.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON encoding or decoding failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML settings file could not be parsed.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A telemetry file row violates the row schema.
    #[error("Malformed row at line {line}: {message}")]
    Parse {
        /// 1-based line number in the file (header is line 1).
        line: u64,
        /// What was wrong with the row.
        message: String,
    },

    /// A transient failure persisted through every allowed attempt.
    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetryExhausted {
        /// Name of the wrapped operation.
        operation: String,
        /// Number of attempts made.
        attempts: u32,
        /// The error returned by the final attempt.
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Returns true if the operation that produced this error may succeed
    /// when repeated unchanged.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimit(_) | Self::Server { .. } => true,
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }

    /// Wait requested by the server before the next attempt, if any.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimit(secs) => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }
}
