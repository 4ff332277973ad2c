//! The request executor.
//!
//! One call to [`ServiceClient::execute`] is exactly one network round trip:
//!
//! 1. validate the operation, including its minimum server version, with no I/O
//! 2. write the envelope and post it
//! 3. on HTTP 500, decode the SOAP fault into a typed error
//! 4. on success, decode the body and apply the batch rules
//!
//! Nothing is retried here. [`EwsError::is_retryable`] tells a caller what is
//! worth retrying.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use ewsline_protocol::xml::XmlReader;
use ewsline_protocol::{
    EnvelopeBody, EnvelopeHeaders, EwsError, EwsResult, Operation, OperationSpec,
    RequestEnvelope, ResponseCollection, ResponseDecoder, ResponseEnvelope, ServerVersion,
    ServerVersionInfo, SingleOperation, ValidationContext, opaque_fault,
};
use ewsline_transport_traits::{Transport, TransportError, TransportRequest, TransportResponse};

use super::config::ClientConfig;

struct ClientInner<T> {
    transport: T,
    config: ClientConfig,
    headers: EnvelopeHeaders,
    trace_payloads: bool,
    server_info: RwLock<Option<ServerVersionInfo>>,
}

/// Executes operations against one mailbox server.
///
/// Cloning is cheap; clones share the transport and the last seen server
/// version.
pub struct ServiceClient<T: Transport> {
    inner: Arc<ClientInner<T>>,
}

impl<T: Transport> Clone for ServiceClient<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport> std::fmt::Debug for ServiceClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceClient")
            .field("transport", &self.inner.transport)
            .field(
                "requested_server_version",
                &self.inner.config.requested_server_version,
            )
            .finish()
    }
}

impl<T: Transport> ServiceClient<T> {
    /// Creates a client. Header validation is left to the first request;
    /// use [`ServiceClientBuilder`](super::ServiceClientBuilder) to validate up front.
    pub fn new(transport: T, config: ClientConfig) -> Self {
        let trace_payloads = config.payload_tracing_enabled();
        let headers = config.envelope_headers();
        Self {
            inner: Arc::new(ClientInner {
                transport,
                config,
                headers,
                trace_payloads,
                server_info: RwLock::new(None),
            }),
        }
    }

    /// The client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// The version every request asks for.
    pub fn requested_server_version(&self) -> ServerVersion {
        self.inner.config.requested_server_version
    }

    /// The transport requests go through.
    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// Version information from the most recent response that carried it.
    pub fn server_info(&self) -> Option<ServerVersionInfo> {
        self.inner.server_info.read().clone()
    }

    /// Executes a batched operation.
    ///
    /// # Errors
    ///
    /// Validation and version errors before any I/O; transport errors;
    /// decoded SOAP faults; a single `Error` message standing for the whole
    /// batch; a message count that matches neither rule; and, in
    /// `ThrowOnError` mode, the error of the one expected message.
    pub async fn execute<R>(&self, operation: &Operation<R>) -> EwsResult<ResponseCollection<R>> {
        let (response, request_id) = self.send(operation.spec(), false).await?;
        let mut reader = self.read_envelope(response, &request_id).await?;

        let result = ResponseDecoder::decode_batch(&mut reader, operation);
        match &result {
            Ok(messages) => debug!(
                request_id = %request_id,
                operation = operation.spec().name(),
                messages = messages.len(),
                overall = %messages.overall_result(),
                "Batch decoded"
            ),
            Err(e) => debug!(
                request_id = %request_id,
                operation = operation.spec().name(),
                error = %e,
                "Batch failed"
            ),
        }
        result
    }

    /// Executes an operation whose response is a single payload.
    ///
    /// # Errors
    ///
    /// As [`execute`](Self::execute), without the batch rules.
    pub async fn execute_single<R>(&self, operation: &SingleOperation<R>) -> EwsResult<R> {
        let (response, request_id) = self.send(operation.spec(), false).await?;
        let mut reader = self.read_envelope(response, &request_id).await?;
        ResponseDecoder::decode_single(&mut reader, operation)
    }

    /// Posts a hanging request and returns the still-open response.
    pub(crate) async fn open_stream(&self, spec: &OperationSpec) -> EwsResult<TransportResponse> {
        let (response, request_id) = self.send(spec, true).await?;
        info!(request_id = %request_id, operation = spec.name(), "Streaming response opened");
        Ok(response)
    }

    /// Validates, writes and posts one request. Returns a response whose
    /// status is a success.
    async fn send(
        &self,
        spec: &OperationSpec,
        streaming: bool,
    ) -> EwsResult<(TransportResponse, String)> {
        let config = &self.inner.config;
        spec.validate(&ValidationContext::new(config.requested_server_version))?;

        let body = RequestEnvelope::build(&self.inner.headers, spec.name(), |writer| {
            spec.write_body(writer)
        })?;

        let request_id = Uuid::new_v4().to_string();
        if self.inner.trace_payloads {
            info!(
                request_id = %request_id,
                payload = %String::from_utf8_lossy(&body),
                "Request envelope"
            );
        }

        let mut request = TransportRequest::new(body)
            .with_operation(spec.name())
            .with_header("client-request-id", request_id.as_str())
            .with_header("return-client-request-id", "true");
        for (name, value) in &config.http_headers {
            request = request.with_header(name.as_str(), value.as_str());
        }
        if streaming {
            request = request.streaming();
        } else if let Some(timeout) = config.request_timeout {
            request = request.with_timeout(timeout);
        }

        info!(
            request_id = %request_id,
            operation = spec.name(),
            streaming,
            "Sending request"
        );
        let response = self.inner.transport.send(request).await.map_err(|e| {
            warn!(request_id = %request_id, operation = spec.name(), error = %e, "Transport failed");
            EwsError::from(e)
        })?;
        info!(
            request_id = %request_id,
            operation = spec.name(),
            status = response.status(),
            server_request_id = response.header("request-id").unwrap_or(""),
            "Response received"
        );

        if response.is_success() {
            return Ok((response, request_id));
        }
        if response.is_server_error() {
            return Err(self.decode_fault(response, &request_id).await);
        }

        let status = response.status();
        response.close();
        Err(TransportError::HttpStatus {
            status,
            reason: "not a SOAP response status".to_string(),
        }
        .into())
    }

    /// Reads a success body up to the operation's response element.
    async fn read_envelope(
        &self,
        response: TransportResponse,
        request_id: &str,
    ) -> EwsResult<XmlReader> {
        let body = response.bytes(&self.inner.config.limits).await?;
        self.trace_response(&body, request_id);

        let envelope = ResponseEnvelope::parse(&body)?;
        self.record_server_info(envelope.server_info);
        match envelope.body {
            EnvelopeBody::Content(reader) => Ok(reader),
            EnvelopeBody::Fault(fault) => {
                warn!(request_id = %request_id, fault_code = ?fault.effective_code(), "Fault in success body");
                Err((*fault).into_error(self.requested_server_version()))
            }
        }
    }

    async fn decode_fault(&self, response: TransportResponse, request_id: &str) -> EwsError {
        let status = response.status();
        let body = match response.bytes(&self.inner.config.limits).await {
            Ok(body) => body,
            Err(e) => return e.into(),
        };
        self.trace_response(&body, request_id);

        match ResponseEnvelope::parse(&body) {
            Ok(envelope) => {
                self.record_server_info(envelope.server_info);
                match envelope.body {
                    EnvelopeBody::Fault(fault) => {
                        warn!(
                            request_id = %request_id,
                            fault_code = ?fault.effective_code(),
                            message = %fault.best_message(),
                            "SOAP fault"
                        );
                        (*fault).into_error(self.requested_server_version())
                    }
                    EnvelopeBody::Content(_) => {
                        opaque_fault(status, "error status with a non-fault envelope")
                    }
                }
            }
            Err(e) => {
                warn!(request_id = %request_id, error = %e, "Undecodable fault body");
                opaque_fault(status, e.to_string())
            }
        }
    }

    fn trace_response(&self, body: &[u8], request_id: &str) {
        if self.inner.trace_payloads {
            info!(
                request_id = %request_id,
                payload = %String::from_utf8_lossy(body),
                "Response envelope"
            );
        }
    }

    fn record_server_info(&self, info: Option<ServerVersionInfo>) {
        if let Some(info) = info {
            debug!(server = %info, "Server version");
            *self.inner.server_info.write() = Some(info);
        }
    }
}
