//! One long-lived request whose response body carries many envelopes.
//!
//! ```text
//! Disconnected --open()--> Connecting --response--> Connected
//!      ^                        |                       |
//!      +--------- error --------+                       |
//!      +--- Timeout | Exception | Clean | UserInitiated-+
//! ```
//!
//! While connected, one reader task frames envelopes out of the body, decodes
//! each with the same decoder the executor uses, and hands the result to the
//! response handler. The next envelope is not read until the handler
//! returns.

use std::fmt;
use std::ops::ControlFlow;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use ewsline_protocol::xml::{XmlDocumentReader, XmlReader};
use ewsline_protocol::{
    EnvelopeBody, EwsError, EwsResult, Operation, ResponseCollection, ResponseDecoder,
    ResponseEnvelope, ServerVersion,
};
use ewsline_transport_traits::{BodyReader, Transport, TransportError};

use crate::client::ServiceClient;

/// Lifecycle state of a [`HangingConnection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No request is open.
    Disconnected,
    /// The request is sent and the response has not arrived.
    Connecting,
    /// The response body is being read.
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        })
    }
}

/// Why a connection went back to [`ConnectionState::Disconnected`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    /// Nothing arrived within the heartbeat window.
    Timeout,
    /// The body failed, could not be decoded, or the handler failed.
    Exception,
    /// The owner called [`HangingConnection::disconnect`].
    UserInitiated,
    /// The server ended the stream, or the handler asked to stop.
    Clean,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Timeout => "timeout",
            Self::Exception => "exception",
            Self::UserInitiated => "user-initiated",
            Self::Clean => "clean",
        })
    }
}

/// One transition to [`ConnectionState::Disconnected`].
#[derive(Debug, Clone)]
pub struct Disconnect {
    /// Why the connection ended.
    pub reason: DisconnectReason,
    /// The failure behind the disconnect, when there is one.
    pub cause: Option<EwsError>,
}

impl Disconnect {
    fn new(reason: DisconnectReason, cause: Option<EwsError>) -> Self {
        Self { reason, cause }
    }

    fn exception(cause: EwsError) -> Self {
        Self::new(DisconnectReason::Exception, Some(cause))
    }
}

/// Receives every decoded envelope. `Break` ends the connection cleanly and
/// an error ends it with [`DisconnectReason::Exception`].
pub type ResponseHandler<R> =
    Arc<dyn Fn(ResponseCollection<R>) -> EwsResult<ControlFlow<()>> + Send + Sync>;

/// Called exactly once per transition to [`ConnectionState::Disconnected`]
/// out of a connected or connecting state.
pub type DisconnectListener = Arc<dyn Fn(Disconnect) + Send + Sync>;

/// Read settings for a [`HangingConnection`].
#[derive(Debug, Clone)]
pub struct HangingSettings {
    /// The longest the reader waits for the next envelope.
    pub read_timeout: Duration,
    /// Upper bound on the size of one envelope.
    pub max_document_size: Option<usize>,
}

struct Lifecycle {
    state: ConnectionState,
    generation: u64,
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

/// A hanging request and the task reading its body.
pub struct HangingConnection<T: Transport, R> {
    client: ServiceClient<T>,
    operation: Operation<R>,
    settings: HangingSettings,
    handler: ResponseHandler<R>,
    listener: DisconnectListener,
    lifecycle: Arc<Mutex<Lifecycle>>,
}

impl<T: Transport, R> fmt::Debug for HangingConnection<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HangingConnection")
            .field("operation", &self.operation.spec().name())
            .field("state", &self.state())
            .field("settings", &self.settings)
            .finish()
    }
}

impl<T: Transport, R> HangingConnection<T, R> {
    /// The current state.
    pub fn state(&self) -> ConnectionState {
        self.lifecycle.lock().state
    }
}

impl<T, R> HangingConnection<T, R>
where
    T: Transport + 'static,
    R: Send + 'static,
{
    /// Creates a disconnected connection.
    pub fn new(
        client: ServiceClient<T>,
        operation: Operation<R>,
        settings: HangingSettings,
        handler: ResponseHandler<R>,
        listener: DisconnectListener,
    ) -> Self {
        Self {
            client,
            operation,
            settings,
            handler,
            listener,
            lifecycle: Arc::new(Mutex::new(Lifecycle {
                state: ConnectionState::Disconnected,
                generation: 0,
                cancel: None,
                task: None,
            })),
        }
    }

    /// Sends the request and starts the reader.
    ///
    /// # Errors
    ///
    /// Fails when the connection is not disconnected, with any error the
    /// request itself produces, or when [`disconnect`](Self::disconnect) ran
    /// before the response arrived. The connection is disconnected again
    /// after any failure and no disconnect listener is called.
    pub async fn open(&self) -> EwsResult<()> {
        let generation = self.begin_open()?;
        self.complete_open(generation).await
    }

    /// Moves to `Connecting` and returns the generation of this attempt.
    pub(crate) fn begin_open(&self) -> EwsResult<u64> {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state != ConnectionState::Disconnected {
            return Err(EwsError::validation(format!(
                "cannot open a connection that is {}",
                lifecycle.state
            )));
        }
        lifecycle.state = ConnectionState::Connecting;
        lifecycle.generation += 1;
        Ok(lifecycle.generation)
    }

    /// Sends the request for an attempt started by
    /// [`begin_open`](Self::begin_open).
    pub(crate) async fn complete_open(&self, generation: u64) -> EwsResult<()> {
        debug!(operation = self.operation.spec().name(), generation, "Opening hanging connection");

        let response = match self.client.open_stream(self.operation.spec()).await {
            Ok(response) => response,
            Err(e) => {
                let mut lifecycle = self.lifecycle.lock();
                if lifecycle.generation == generation
                    && lifecycle.state == ConnectionState::Connecting
                {
                    lifecycle.state = ConnectionState::Disconnected;
                }
                warn!(operation = self.operation.spec().name(), error = %e, "Hanging connection failed to open");
                return Err(e);
            }
        };

        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.generation != generation || lifecycle.state != ConnectionState::Connecting {
            drop(lifecycle);
            response.close();
            return Err(EwsError::validation(
                "connection was closed while it was opening",
            ));
        }

        let documents = XmlDocumentReader::new(response.into_reader())
            .with_max_document_size(self.settings.max_document_size);
        let cancel = CancellationToken::new();
        let reader = ReaderTask {
            operation: self.operation.clone(),
            handler: Arc::clone(&self.handler),
            listener: Arc::clone(&self.listener),
            lifecycle: Arc::clone(&self.lifecycle),
            generation,
            read_timeout: self.settings.read_timeout,
            requested_version: self.client.requested_server_version(),
        };

        lifecycle.state = ConnectionState::Connected;
        lifecycle.cancel = Some(cancel.clone());
        lifecycle.task = Some(tokio::spawn(reader.run(documents, cancel)));
        info!(operation = self.operation.spec().name(), generation, "Hanging connection open");
        Ok(())
    }

    /// Closes the connection and waits until the reader has released the
    /// response body, then calls the disconnect listener with
    /// [`DisconnectReason::UserInitiated`].
    ///
    /// Does nothing when already disconnected. Must not be awaited from the
    /// response handler, which runs on the reader task.
    ///
    /// The owner's reason wins: when the reader has just hit a timeout or a
    /// failure but has not yet moved to `Disconnected`, the listener sees
    /// only [`DisconnectReason::UserInitiated`] and that cause is dropped.
    pub async fn disconnect(&self) {
        let task = {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.state == ConnectionState::Disconnected {
                return;
            }
            lifecycle.state = ConnectionState::Disconnected;
            if let Some(cancel) = lifecycle.cancel.take() {
                cancel.cancel();
            }
            lifecycle.task.take()
        };

        if let Some(task) = task
            && let Err(e) = task.await
        {
            error!(error = %e, "Hanging connection reader did not finish cleanly");
        }

        info!(
            operation = self.operation.spec().name(),
            reason = %DisconnectReason::UserInitiated,
            "Hanging connection closed"
        );
        (self.listener)(Disconnect::new(DisconnectReason::UserInitiated, None));
    }
}

impl<T: Transport, R> Drop for HangingConnection<T, R> {
    fn drop(&mut self) {
        let mut lifecycle = self.lifecycle.lock();
        lifecycle.state = ConnectionState::Disconnected;
        if let Some(cancel) = lifecycle.cancel.take() {
            cancel.cancel();
        }
    }
}

/// Everything the reader task owns.
struct ReaderTask<R> {
    operation: Operation<R>,
    handler: ResponseHandler<R>,
    listener: DisconnectListener,
    lifecycle: Arc<Mutex<Lifecycle>>,
    generation: u64,
    read_timeout: Duration,
    requested_version: ServerVersion,
}

impl<R: Send + 'static> ReaderTask<R> {
    async fn run(self, mut documents: XmlDocumentReader<BodyReader>, cancel: CancellationToken) {
        debug!(generation = self.generation, "Streaming reader started");
        let outcome = self.read_loop(&mut documents, &cancel).await;
        drop(documents);

        let Some(disconnect) = outcome else {
            debug!(generation = self.generation, "Streaming reader cancelled");
            return;
        };
        if self.finish() {
            match &disconnect.cause {
                Some(cause) => warn!(reason = %disconnect.reason, error = %cause, "Hanging connection ended"),
                None => info!(reason = %disconnect.reason, "Hanging connection ended"),
            }
            (self.listener)(disconnect);
        }
    }

    /// Returns `None` when the owner cancelled the read.
    async fn read_loop(
        &self,
        documents: &mut XmlDocumentReader<BodyReader>,
        cancel: &CancellationToken,
    ) -> Option<Disconnect> {
        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => return None,
                next = tokio::time::timeout(self.read_timeout, documents.next_document()) => next,
            };

            let document = match next {
                Err(_) => {
                    return Some(Disconnect::new(
                        DisconnectReason::Timeout,
                        Some(EwsError::Transport(TransportError::ReadTimeout {
                            timeout: self.read_timeout,
                        })),
                    ));
                }
                Ok(Ok(Some(document))) => document,
                Ok(Ok(None)) => return Some(Disconnect::new(DisconnectReason::Clean, None)),
                Ok(Err(e)) => return Some(Disconnect::exception(e.into())),
            };

            let batch = match self.decode(document) {
                Ok(batch) => batch,
                Err(e) => return Some(Disconnect::exception(e)),
            };

            match catch_unwind(AssertUnwindSafe(|| (self.handler)(batch))) {
                Ok(Ok(ControlFlow::Continue(()))) => {}
                Ok(Ok(ControlFlow::Break(()))) => {
                    return Some(Disconnect::new(DisconnectReason::Clean, None));
                }
                Ok(Err(e)) => return Some(Disconnect::exception(e)),
                Err(_) => {
                    error!(generation = self.generation, "Response handler panicked");
                    return Some(Disconnect::new(DisconnectReason::Exception, None));
                }
            }

            if cancel.is_cancelled() {
                return None;
            }
        }
    }

    fn decode(&self, document: XmlReader) -> EwsResult<ResponseCollection<R>> {
        let envelope = ResponseEnvelope::read(document)?;
        match envelope.body {
            EnvelopeBody::Content(mut reader) => {
                ResponseDecoder::decode_batch(&mut reader, &self.operation)
            }
            EnvelopeBody::Fault(fault) => Err((*fault).into_error(self.requested_version)),
        }
    }

    /// Moves to `Disconnected` unless the owner got there first. Returns
    /// whether the listener should run.
    fn finish(&self) -> bool {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.generation != self.generation
            || lifecycle.state == ConnectionState::Disconnected
        {
            return false;
        }
        lifecycle.state = ConnectionState::Disconnected;
        lifecycle.cancel = None;
        lifecycle.task = None;
        true
    }
}
