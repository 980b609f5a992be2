//! HTTP helpers shared by the REST client.

use crate::error::{Error, Result};
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response};
use std::time::Duration;

/// Default HTTP timeout for every request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Connect timeout for every request.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Retry-After fallback when a 429 carries no usable header.
const DEFAULT_RATE_LIMIT_SECS: u64 = 60;

/// Creates a configured HTTP client with timeout.
///
/// # Errors
///
/// Returns an error if the TLS backend cannot be initialised.
pub fn create_http_client(timeout: Duration) -> Result<Client> {
    Ok(Client::builder()
        .timeout(timeout)
        .connect_timeout(CONNECT_TIMEOUT)
        .build()?)
}

/// Joins a base URL and an absolute path without doubling slashes.
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Maps an HTTP error status to the crate error taxonomy.
pub fn handle_http_error(status_code: u16, body: &str, operation: &str) -> Error {
    match status_code {
        429 => Error::RateLimit(DEFAULT_RATE_LIMIT_SECS),
        401 | 403 => Error::Authentication(format!("{} rejected: {}", operation, body)),
        500..=599 => Error::Server {
            status: status_code,
            body: body.to_string(),
        },
        _ => Error::Client {
            status: status_code,
            body: body.to_string(),
        },
    }
}

/// Consumes a non-success response and turns it into an [`Error`].
pub async fn error_from_response(response: Response, operation: &str) -> Error {
    let status = response.status().as_u16();
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());

    match (handle_http_error(status, &body, operation), retry_after) {
        (Error::RateLimit(_), Some(secs)) => Error::RateLimit(secs),
        (err, _) => err,
    }
}
