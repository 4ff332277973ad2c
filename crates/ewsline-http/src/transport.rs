//! reqwest-backed transport.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use reqwest::{Client as HttpClient, StatusCode, header};
use tracing::{debug, error, info, warn};

use ewsline_transport_traits::{
    AtomicMetrics, BodyStream, LimitsConfig, Transport, TransportError, TransportMetrics,
    TransportRequest, TransportResponse, TransportResult, validate_request_size,
    validate_response_size,
};

use crate::config::{Credentials, HttpTransportConfig};

const CONTENT_TYPE_XML: &str = "text/xml; charset=utf-8";
const INSECURE_TLS_ENV_VAR: &str = "EWSLINE_ALLOW_INSECURE_TLS";

/// HTTP transport posting SOAP envelopes to one EWS endpoint.
///
/// The client has no global timeout. Buffered requests get the configured
/// request timeout; streaming requests are bounded only by the reader that
/// consumes their body.
pub struct HttpTransport {
    config: HttpTransportConfig,
    http_client: HttpClient,
    metrics: Arc<AtomicMetrics>,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("endpoint", &self.config.endpoint.as_str())
            .field("credentials", &self.config.credentials)
            .finish()
    }
}

impl HttpTransport {
    /// Builds the transport and its connection pool.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConfigurationError`] when the HTTP client
    /// cannot be constructed.
    pub fn new(config: HttpTransportConfig) -> TransportResult<Self> {
        if config.tls.is_insecure() {
            warn!(
                "Certificate validation is disabled. This is insecure and should only be used \
                 for testing against servers with self-signed certificates."
            );
        }

        let mut client_builder = HttpClient::builder()
            .use_rustls_tls()
            .connect_timeout(config.timeouts.connect)
            .gzip(config.accept_gzip);

        if let Some(ref user_agent) = config.user_agent {
            client_builder = client_builder.user_agent(user_agent);
        }

        if !config.tls.validate_certificates {
            if std::env::var(INSECURE_TLS_ENV_VAR).is_err() {
                error!(
                    "SECURITY: Certificate validation disabled but {} not set. \
                     Overriding to validate_certificates=true for safety. \
                     Set {}=1 to allow insecure TLS.",
                    INSECURE_TLS_ENV_VAR, INSECURE_TLS_ENV_VAR
                );
            } else {
                warn!("SECURITY WARNING: TLS certificate validation is DISABLED.");
                client_builder = client_builder.danger_accept_invalid_certs(true);
            }
        }

        if let Some(ca_certs) = &config.tls.custom_ca_certs {
            let mut loaded = 0usize;
            let total = ca_certs.len();
            for cert_bytes in ca_certs {
                if let Ok(cert) = reqwest::Certificate::from_pem(cert_bytes) {
                    client_builder = client_builder.add_root_certificate(cert);
                    loaded += 1;
                } else if let Ok(cert) = reqwest::Certificate::from_der(cert_bytes) {
                    client_builder = client_builder.add_root_certificate(cert);
                    loaded += 1;
                } else {
                    warn!(
                        "Failed to parse custom CA certificate ({}/{}), skipping",
                        loaded + 1,
                        total
                    );
                }
            }
            if loaded == 0 && total > 0 {
                error!("All {} custom CA certificates failed to parse", total);
            }
            if loaded > 0 {
                info!("Loaded {}/{} custom CA certificates", loaded, total);
            }
        }

        let http_client = client_builder.build().map_err(|e| {
            TransportError::ConfigurationError(format!("failed to build HTTP client: {e}"))
        })?;

        Ok(Self {
            config,
            http_client,
            metrics: Arc::new(AtomicMetrics::new()),
        })
    }

    /// The configuration this transport was built with.
    pub const fn config(&self) -> &HttpTransportConfig {
        &self.config
    }

    /// Size limits buffered bodies should be read with.
    pub const fn limits(&self) -> &LimitsConfig {
        &self.config.limits
    }

    fn build_headers(&self, request: &TransportRequest) -> header::HeaderMap {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static(CONTENT_TYPE_XML),
        );
        headers.insert(header::ACCEPT, header::HeaderValue::from_static("text/xml"));

        let custom = self
            .config
            .headers
            .iter()
            .chain(request.headers.iter().map(|(k, v)| (k, v)));
        for (key, value) in custom {
            if let (Ok(k), Ok(v)) = (
                header::HeaderName::from_bytes(key.as_bytes()),
                header::HeaderValue::from_str(value),
            ) {
                headers.insert(k, v);
            } else {
                warn!(header = %key, "Skipping invalid header");
            }
        }
        headers
    }

    async fn post(&self, request: TransportRequest) -> TransportResult<TransportResponse> {
        request
            .validate()
            .map_err(|e| TransportError::ConfigurationError(e.to_string()))?;
        validate_request_size(request.body.len(), &self.config.limits)?;

        let operation = request.operation.clone();
        let streaming = request.streaming;
        let timeout = if streaming {
            None
        } else {
            request.timeout.or(self.config.timeouts.request)
        };

        let mut builder = self
            .http_client
            .post(self.config.endpoint.clone())
            .headers(self.build_headers(&request));
        builder = match &self.config.credentials {
            Credentials::None => builder,
            Credentials::Basic { username, password } => builder.basic_auth(username, Some(password)),
            Credentials::Bearer(token) => builder.bearer_auth(token),
        };
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        let body_len = request.body.len();
        self.metrics.record_request(body_len, streaming);
        debug!(
            operation = %operation,
            bytes = body_len,
            streaming,
            "Posting request"
        );

        let started = Instant::now();
        let response = builder.body(request.body).send().await.map_err(|e| {
            self.metrics.record_failure();
            map_send_error(&e, &operation, timeout)
        })?;
        self.metrics
            .update_latency_us(started.elapsed().as_micros() as u64);

        let status = response.status();
        debug!(operation = %operation, status = status.as_u16(), "Response headers received");

        if status == StatusCode::UNAUTHORIZED {
            return Err(TransportError::AuthenticationFailed(format!(
                "{} rejected the credentials for {operation}",
                self.config.endpoint
            )));
        }

        if !streaming && let Some(length) = response.content_length() {
            validate_response_size(length as usize, &self.config.limits)?;
        }

        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let metrics = Arc::clone(&self.metrics);
        let body: BodyStream = Box::pin(response.bytes_stream().map(move |chunk| match chunk {
            Ok(chunk) => {
                metrics.record_received(chunk.len());
                Ok(chunk)
            }
            Err(e) => Err(map_body_error(&e, &operation, timeout)),
        }));

        Ok(TransportResponse::new(status.as_u16(), headers, body))
    }
}

fn map_send_error(err: &reqwest::Error, operation: &str, timeout: Option<Duration>) -> TransportError {
    if err.is_timeout()
        && let Some(timeout) = timeout
    {
        return TransportError::RequestTimeout {
            operation: operation.to_string(),
            timeout,
        };
    }
    TransportError::ConnectionFailed(err.to_string())
}

fn map_body_error(err: &reqwest::Error, operation: &str, timeout: Option<Duration>) -> TransportError {
    if err.is_timeout()
        && let Some(timeout) = timeout
    {
        return TransportError::RequestTimeout {
            operation: operation.to_string(),
            timeout,
        };
    }
    TransportError::ConnectionLost(err.to_string())
}

impl Transport for HttpTransport {
    fn send(
        &self,
        request: TransportRequest,
    ) -> Pin<Box<dyn Future<Output = TransportResult<TransportResponse>> + Send + '_>> {
        Box::pin(self.post(request))
    }

    fn metrics(&self) -> TransportMetrics {
        self.metrics.snapshot()
    }

    fn endpoint(&self) -> Option<String> {
        Some(self.config.endpoint.to_string())
    }
}
