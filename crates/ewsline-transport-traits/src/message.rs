//! Request and response types exchanged with a [`Transport`](crate::Transport).

use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use tokio_util::io::StreamReader;

use crate::config::LimitsConfig;
use crate::error::{TransportError, TransportResult};

/// Maximum number of custom headers per request (DoS protection)
const MAX_CUSTOM_HEADERS: usize = 64;

/// An incrementally readable response body.
pub type BodyStream = Pin<Box<dyn Stream<Item = TransportResult<Bytes>> + Send>>;

/// A response body adapted to [`tokio::io::AsyncBufRead`].
pub type BodyReader = StreamReader<BodyStream, Bytes>;

/// One serialized SOAP envelope on its way to the server.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    /// The serialized envelope.
    pub body: Bytes,

    /// Extra HTTP headers for this request, in addition to the transport's own.
    pub headers: Vec<(String, String)>,

    /// The operation name, for logging and timeout diagnostics.
    pub operation: String,

    /// Whether the response body will be read incrementally over a long period.
    ///
    /// Streaming requests are never subject to the total request timeout.
    pub streaming: bool,

    /// Per-request override of the transport's request timeout.
    pub timeout: Option<Duration>,
}

impl TransportRequest {
    /// Creates a request for the given envelope bytes.
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            headers: Vec::new(),
            operation: String::new(),
            streaming: false,
            timeout: None,
        }
    }

    /// Sets the operation name.
    #[must_use]
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = operation.into();
        self
    }

    /// Adds an HTTP header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Marks the request as a hanging (streaming) request.
    #[must_use]
    pub const fn streaming(mut self) -> Self {
        self.streaming = true;
        self
    }

    /// Overrides the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Validate header constraints
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.headers.len() > MAX_CUSTOM_HEADERS {
            return Err("Too many custom headers");
        }
        Ok(())
    }
}

/// The server's answer: status, headers and a body that has not been read yet.
///
/// Dropping the response (or calling [`close`](Self::close)) releases the
/// underlying connection.
pub struct TransportResponse {
    status: u16,
    headers: HashMap<String, String>,
    body: BodyStream,
}

impl fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body", &"<BodyStream>")
            .finish()
    }
}

impl TransportResponse {
    /// Creates a response. Header names are stored lower-cased.
    pub fn new(status: u16, headers: HashMap<String, String>, body: BodyStream) -> Self {
        let headers = headers
            .into_iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value))
            .collect();
        Self {
            status,
            headers,
            body,
        }
    }

    /// Creates a response whose whole body is already known.
    pub fn from_bytes(status: u16, body: impl Into<Bytes>) -> Self {
        let body: Bytes = body.into();
        Self::new(
            status,
            HashMap::new(),
            Box::pin(futures::stream::once(async move { Ok::<_, TransportError>(body) })),
        )
    }

    /// The HTTP status code.
    pub const fn status(&self) -> u16 {
        self.status
    }

    /// Returns `true` for 2xx statuses.
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Returns `true` when the server reported an internal error, which for a
    /// SOAP endpoint means the body carries a fault.
    pub const fn is_server_error(&self) -> bool {
        self.status == 500
    }

    /// Looks up a response header, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// All response headers, keyed by lower-cased name.
    pub const fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Reads the whole body into memory, enforcing the response size limit.
    pub async fn bytes(mut self, limits: &LimitsConfig) -> TransportResult<Bytes> {
        let mut buffer = BytesMut::new();
        while let Some(chunk) = self.body.next().await {
            let chunk = chunk?;
            buffer.extend_from_slice(&chunk);
            if let Some(max) = limits.max_response_size
                && buffer.len() > max
            {
                return Err(TransportError::ResponseTooLarge {
                    size: buffer.len(),
                    max,
                });
            }
        }
        Ok(buffer.freeze())
    }

    /// Hands out the raw body stream.
    pub fn into_body(self) -> BodyStream {
        self.body
    }

    /// Adapts the body to an async buffered reader for incremental decoding.
    pub fn into_reader(self) -> BodyReader {
        StreamReader::new(self.body)
    }

    /// Releases the underlying connection without reading the rest of the body.
    pub fn close(self) {
        tracing::trace!(status = self.status, "Closing response body");
        drop(self.body);
    }
}

impl From<TransportError> for std::io::Error {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Io(msg) => std::io::Error::other(msg),
            TransportError::ReadTimeout { .. } => {
                std::io::Error::new(std::io::ErrorKind::TimedOut, err.to_string())
            }
            TransportError::ConnectionLost(_) => {
                std::io::Error::new(std::io::ErrorKind::ConnectionReset, err.to_string())
            }
            other => std::io::Error::other(other.to_string()),
        }
    }
}
