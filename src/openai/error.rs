//! Error types for the OpenAI Batch API client.
//!
//! [`ApiError`] is the single error type returned by every remote call, so
//! callers branch on its variant rather than on transport details.

use thiserror::Error;

/// Errors that can occur while talking to the Batch API.
///
/// - [`RateLimited`](ApiError::RateLimited): the server answered HTTP 429
/// - [`Api`](ApiError::Api): any other non-success status
/// - [`Network`](ApiError::Network): the request never produced a usable response
#[derive(Debug, Error)]
pub enum ApiError {
    /// HTTP 429. `retry_after_ms` comes from the `retry-after` header when present.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Error status returned by the API (e.g. 401 invalid key, 404 unknown batch).
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// DNS, connection, timeout or body decoding failure from `reqwest`.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl ApiError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Api { status: 404, .. })
    }
}
