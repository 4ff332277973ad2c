//! Transport error types.

use std::time::Duration;
use thiserror::Error;

use crate::config::LimitsConfig;

/// A specialized `Result` type for transport operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Represents errors that can occur while moving bytes to and from the server.
///
/// None of these are retried by the transport. Retry policy, when wanted,
/// belongs to the caller of the request executor.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum TransportError {
    /// Failed to establish a connection or send the request.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// An established connection was lost while reading the body.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// The server answered with a status that is neither success nor a SOAP
    /// fault (500).
    #[error("Unexpected HTTP status {status}: {reason}")]
    HttpStatus {
        /// The HTTP status code.
        status: u16,
        /// The canonical reason phrase, or a short description.
        reason: String,
    },

    /// The server rejected the supplied credentials (HTTP 401).
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Single request timed out.
    #[error(
        "Request timed out after {timeout:?} for operation: {operation}. \
         If this is expected, increase the timeout with \
         `TimeoutConfig {{ request: Some(Duration::from_secs({})) }}`",
        timeout.as_secs() * 2
    )]
    RequestTimeout {
        /// The operation that timed out
        operation: String,
        /// The timeout duration that was exceeded
        timeout: Duration,
    },

    /// Read operation timed out (streaming).
    #[error("Read timed out after {timeout:?} while streaming response")]
    ReadTimeout {
        /// The timeout duration that was exceeded
        timeout: Duration,
    },

    /// The transport was configured with invalid parameters.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// An underlying I/O error occurred.
    #[error("IO error: {0}")]
    Io(String),

    /// Request size exceeds the configured maximum limit.
    #[error(
        "Request size ({size} bytes) exceeds maximum allowed ({max} bytes). \
         If this is expected, increase the limit with \
         `LimitsConfig {{ max_request_size: Some({}) }}` or use `LimitsConfig::unlimited()`",
        size
    )]
    RequestTooLarge {
        /// The actual size of the request in bytes
        size: usize,
        /// The maximum allowed size in bytes
        max: usize,
    },

    /// Response size exceeds the configured maximum limit.
    #[error(
        "Response size ({size} bytes) exceeds maximum allowed ({max} bytes). \
         If this is expected, increase the limit with \
         `LimitsConfig {{ max_response_size: Some({}) }}` or use `LimitsConfig::unlimited()`",
        size
    )]
    ResponseTooLarge {
        /// The size of the response seen so far in bytes
        size: usize,
        /// The maximum allowed size in bytes
        max: usize,
    },
}

impl TransportError {
    /// Returns `true` for failures a caller may reasonably retry with backoff.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ConnectionFailed(_)
            | Self::ConnectionLost(_)
            | Self::RequestTimeout { .. }
            | Self::ReadTimeout { .. }
            | Self::Io(_) => true,
            Self::HttpStatus { status, .. } => matches!(status, 502..=504),
            _ => false,
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Validates that a request body size does not exceed the configured limit.
///
/// # Returns
///
/// `Ok(())` if the size is within limits or no limit is set, otherwise `Err(TransportError::RequestTooLarge)`
pub fn validate_request_size(size: usize, limits: &LimitsConfig) -> TransportResult<()> {
    if let Some(max_size) = limits.max_request_size
        && size > max_size
    {
        return Err(TransportError::RequestTooLarge {
            size,
            max: max_size,
        });
    }
    Ok(())
}

/// Validates that a buffered response body size does not exceed the configured limit.
///
/// # Returns
///
/// `Ok(())` if the size is within limits or no limit is set, otherwise `Err(TransportError::ResponseTooLarge)`
pub fn validate_response_size(size: usize, limits: &LimitsConfig) -> TransportResult<()> {
    if let Some(max_size) = limits.max_response_size
        && size > max_size
    {
        return Err(TransportError::ResponseTooLarge {
            size,
            max: max_size,
        });
    }
    Ok(())
}
