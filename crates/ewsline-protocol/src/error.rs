//! Unified error type for request execution and streaming.

use std::time::Duration;

use ewsline_transport_traits::TransportError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fault::SoapFault;
use crate::response::ServiceError;
use crate::version::ServerVersion;
use crate::xml::XmlError;

/// Result type alias for protocol operations.
pub type EwsResult<T> = std::result::Result<T, EwsError>;

/// Error classification for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Bad input caught before any I/O. Never retried.
    Validation,
    /// Client and server disagree on the protocol revision.
    Version,
    /// I/O or HTTP-level failure sending or reading.
    Transport,
    /// A decoded SOAP fault.
    RemoteFault,
    /// A response message with class `Error`.
    Response,
    /// The server's XML did not have the required shape.
    Deserialization,
}

/// What the server said in a SOAP fault the client has a typed mapping for.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RemoteFaultKind {
    /// The request failed schema validation on a server newer than the
    /// oldest supported generation.
    SchemaValidation {
        /// Line of the offending request markup, if reported.
        line: Option<u32>,
        /// Column of the offending request markup, if reported.
        position: Option<u32>,
    },
    /// The server is throttling the caller.
    ServerBusy {
        /// Suggested wait before the next request.
        back_off: Option<Duration>,
    },
    /// Any other fault carrying a response code.
    Other,
    /// No decodable fault came with the error status.
    Opaque {
        /// The HTTP status of the response.
        status: u16,
    },
}

/// A remote failure decoded from a SOAP fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFault {
    /// Typed classification.
    pub kind: RemoteFaultKind,
    /// The EWS response code, when the fault carried one.
    pub response_code: Option<String>,
    /// The most specific human-readable message available.
    pub message: String,
    /// The full decoded fault, when there was one.
    pub fault: Option<Box<SoapFault>>,
}

impl std::fmt::Display for RemoteFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.kind, &self.response_code) {
            (RemoteFaultKind::Opaque { status }, _) => {
                write!(f, "HTTP {status} without a decodable SOAP fault")?;
                if !self.message.is_empty() {
                    write!(f, ": {}", self.message)?;
                }
                Ok(())
            }
            (_, Some(code)) => write!(f, "{code}: {}", self.message),
            (_, None) => f.write_str(&self.message),
        }
    }
}

/// Errors that can occur while executing requests or consuming a stream.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum EwsError {
    /// Request validation failed before any I/O.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The requested server version is older than what the request needs.
    #[error("{feature} requires {required} or later, but the client requests {requested}")]
    VersionTooOld {
        /// The operation or header that imposes the minimum.
        feature: String,
        /// The minimum revision.
        required: ServerVersion,
        /// The revision the client is configured to request.
        requested: ServerVersion,
    },

    /// The server rejected the requested schema version.
    #[error("Server rejected the requested schema version ({response_code}): {message}")]
    ServerVersionMismatch {
        /// The fault's response code.
        response_code: String,
        /// The fault message.
        message: String,
        /// The full decoded fault.
        fault: Box<SoapFault>,
    },

    /// Failure moving bytes to or from the server.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The server answered with a SOAP fault.
    #[error("Remote fault: {0}")]
    RemoteFault(RemoteFault),

    /// A single response message reported an error.
    #[error(transparent)]
    Response(#[from] ServiceError),

    /// The response did not have the shape the protocol requires.
    #[error("Unexpected response: {0}")]
    Deserialization(String),

    /// The response was not well-formed or not the expected XML.
    #[error(transparent)]
    Xml(#[from] XmlError),
}

impl EwsError {
    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a deserialization error.
    pub fn deserialization(message: impl Into<String>) -> Self {
        Self::Deserialization(message.into())
    }

    /// Classifies the error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::VersionTooOld { .. } | Self::ServerVersionMismatch { .. } => ErrorKind::Version,
            Self::Transport(_) => ErrorKind::Transport,
            Self::RemoteFault(_) => ErrorKind::RemoteFault,
            Self::Response(_) => ErrorKind::Response,
            Self::Deserialization(_) | Self::Xml(_) => ErrorKind::Deserialization,
        }
    }

    /// Returns `true` when a caller may retry after backing off.
    ///
    /// Only transient transport failures and server throttling qualify. The
    /// executor itself never retries.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(err) => err.is_transient(),
            Self::RemoteFault(fault) => matches!(fault.kind, RemoteFaultKind::ServerBusy { .. }),
            Self::Response(err) => err.is_server_busy(),
            _ => false,
        }
    }

    /// The suggested wait before retrying, when the server provided one.
    pub fn back_off(&self) -> Option<Duration> {
        match self {
            Self::RemoteFault(RemoteFault {
                kind: RemoteFaultKind::ServerBusy { back_off },
                ..
            }) => *back_off,
            Self::Response(err) => err.back_off(),
            _ => None,
        }
    }

    /// The EWS response code behind this error, if any.
    pub fn response_code(&self) -> Option<&str> {
        match self {
            Self::ServerVersionMismatch { response_code, .. } => Some(response_code),
            Self::RemoteFault(fault) => fault.response_code.as_deref(),
            Self::Response(err) => Some(&err.response_code),
            _ => None,
        }
    }
}
