//! In-memory scripted transport for tests.
//!
//! Each call to [`Transport::send`] pops the next scripted reply. Replies can
//! be a complete body, an error, or a body that stays open and is fed chunk by
//! chunk from the test through a [`StreamFeed`].

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::error::{TransportError, TransportResult};
use crate::message::{TransportRequest, TransportResponse};
use crate::metrics::{AtomicMetrics, TransportMetrics};
use crate::traits::Transport;

enum Reply {
    Complete { status: u16, body: Bytes },
    Streaming {
        status: u16,
        receiver: mpsc::UnboundedReceiver<TransportResult<Bytes>>,
    },
    Fail(TransportError),
}

/// The test's end of a scripted streaming body.
///
/// Dropping the feed (or calling [`finish`](Self::finish)) ends the body
/// cleanly.
#[derive(Debug, Clone)]
pub struct StreamFeed {
    sender: mpsc::UnboundedSender<TransportResult<Bytes>>,
}

impl StreamFeed {
    /// Pushes one chunk into the body. Returns `false` once the reader is gone.
    pub fn push(&self, chunk: impl Into<Bytes>) -> bool {
        self.sender.send(Ok(chunk.into())).is_ok()
    }

    /// Fails the body with a transport error.
    pub fn fail(&self, error: TransportError) -> bool {
        self.sender.send(Err(error)).is_ok()
    }

    /// Ends the body.
    pub fn finish(self) {
        drop(self.sender);
    }

    /// Returns `true` once the reading side dropped the body.
    pub fn is_released(&self) -> bool {
        self.sender.is_closed()
    }
}

/// A [`Transport`] that replays scripted replies and records every request.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<VecDeque<Reply>>>,
    requests: Arc<Mutex<Vec<TransportRequest>>>,
    metrics: Arc<AtomicMetrics>,
}

impl std::fmt::Debug for ScriptedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedTransport")
            .field("pending", &self.script.lock().len())
            .field("sent", &self.requests.lock().len())
            .finish()
    }
}

impl ScriptedTransport {
    /// Creates a transport with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a reply with a complete body.
    pub fn push_response(&self, status: u16, body: impl Into<Bytes>) -> &Self {
        self.script.lock().push_back(Reply::Complete {
            status,
            body: body.into(),
        });
        self
    }

    /// Queues a transport failure.
    pub fn push_error(&self, error: TransportError) -> &Self {
        self.script.lock().push_back(Reply::Fail(error));
        self
    }

    /// Queues a reply whose body stays open until the returned feed is dropped.
    pub fn push_stream(&self, status: u16) -> StreamFeed {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.script
            .lock()
            .push_back(Reply::Streaming { status, receiver });
        StreamFeed { sender }
    }

    /// Number of requests sent so far.
    pub fn sent_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// All requests sent so far, oldest first.
    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().clone()
    }

    /// The envelope of the most recent request, as text.
    pub fn last_body(&self) -> Option<String> {
        self.requests
            .lock()
            .last()
            .map(|request| String::from_utf8_lossy(&request.body).into_owned())
    }

    /// Number of scripted replies not consumed yet.
    pub fn pending(&self) -> usize {
        self.script.lock().len()
    }
}

impl Transport for ScriptedTransport {
    fn send(
        &self,
        request: TransportRequest,
    ) -> Pin<Box<dyn Future<Output = TransportResult<TransportResponse>> + Send + '_>> {
        Box::pin(async move {
            self.metrics
                .record_request(request.body.len(), request.streaming);
            self.requests.lock().push(request);

            let reply = self.script.lock().pop_front();
            match reply {
                Some(Reply::Complete { status, body }) => {
                    self.metrics.record_received(body.len());
                    Ok(TransportResponse::from_bytes(status, body))
                }
                Some(Reply::Streaming { status, receiver }) => Ok(TransportResponse::new(
                    status,
                    HashMap::new(),
                    Box::pin(UnboundedReceiverStream::new(receiver)),
                )),
                Some(Reply::Fail(error)) => {
                    self.metrics.record_failure();
                    Err(error)
                }
                None => {
                    self.metrics.record_failure();
                    Err(TransportError::ConnectionFailed(
                        "no scripted reply left".to_string(),
                    ))
                }
            }
        })
    }

    fn metrics(&self) -> TransportMetrics {
        self.metrics.snapshot()
    }

    fn endpoint(&self) -> Option<String> {
        Some("scripted://mailbox".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_replays_in_order() {
        let transport = ScriptedTransport::new();
        transport.push_response(200, "first");
        transport.push_error(TransportError::ConnectionFailed("down".into()));

        let first = transport.send(TransportRequest::new("a")).await.unwrap();
        assert_eq!(first.status(), 200);
        assert!(transport.send(TransportRequest::new("b")).await.is_err());
        assert!(transport.send(TransportRequest::new("c")).await.is_err());
        assert_eq!(transport.sent_count(), 3);
        assert_eq!(transport.metrics().failed_requests, 2);
    }

    #[tokio::test]
    async fn test_stream_feed() {
        let transport = ScriptedTransport::new();
        let feed = transport.push_stream(200);
        feed.push("<a>");
        feed.push("</a>");

        let response = transport
            .send(TransportRequest::new("x").streaming())
            .await
            .unwrap();
        feed.finish();

        let mut text = String::new();
        response
            .into_reader()
            .read_to_string(&mut text)
            .await
            .unwrap();
        assert_eq!(text, "<a></a>");
    }

    #[tokio::test]
    async fn test_feed_reports_release() {
        let transport = ScriptedTransport::new();
        let feed = transport.push_stream(200);
        let response = transport.send(TransportRequest::new("x")).await.unwrap();
        assert!(!feed.is_released());
        response.close();
        assert!(feed.is_released());
    }
}
