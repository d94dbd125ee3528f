//! Error types for the HTTP session.

use thiserror::Error;

/// Errors surfaced by [`Session`](super::Session) operations.
///
/// Transport retries happen inside the session; a returned error means the
/// configured attempts are exhausted (or the failure is not retryable at
/// the transport level). The fetch worker decides whether to requeue.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level failure (DNS, connection reset, TLS handshake, ...).
    #[error("network error fetching {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying transport error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout fetching {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// HTTP error response.
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// Raw Retry-After header value, when the server sent one.
        retry_after: Option<String>,
    },

    /// Response body could not be decoded as text.
    #[error("failed to decode response from {url} as {encoding}")]
    Decode {
        /// The URL whose body failed to decode.
        url: String,
        /// The encoding label that was applied.
        encoding: String,
    },

    /// The provided URL is malformed.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// Session or transport configuration is unusable. Fatal at startup.
    #[error("session configuration error: {reason}")]
    Config {
        /// Description of the rejected configuration.
        reason: String,
    },

    /// The session was already closed.
    #[error("session is closed")]
    SessionClosed,

    /// The site plugin does not implement this operation.
    #[error("operation not supported by this site: {operation}")]
    Unsupported {
        /// Name of the unsupported operation.
        operation: &'static str,
    },
}

impl FetchError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16, retry_after: Option<String>) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after,
        }
    }

    /// Creates a configuration error.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Whether the session's transport retry loop should try again.
    ///
    /// Timeouts, network-level failures (connection reset, DNS, TLS
    /// handshake), 5xx responses, and 429 are retryable; 4xx responses,
    /// decode failures, and configuration problems are not.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Network { .. } => true,
            Self::HttpStatus { status, .. } => *status == 429 || (500..600).contains(status),
            _ => false,
        }
    }
}
