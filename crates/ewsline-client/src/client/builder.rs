//! Fluent construction of [`ServiceClient`].

use std::sync::Arc;
use std::time::Duration;

use ewsline_protocol::{
    CustomHeader, DateTimePrecision, EwsResult, ImpersonatedUserId, ServerVersion,
};
use ewsline_transport_traits::{LimitsConfig, Transport};

use super::config::ClientConfig;
use super::core::ServiceClient;

/// Builder for configuring and creating a [`ServiceClient`].
///
/// # Examples
///
/// ```rust,no_run
/// use ewsline_client::ServiceClientBuilder;
/// use ewsline_http::{HttpTransport, HttpTransportConfig};
/// use ewsline_protocol::ServerVersion;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let transport = HttpTransport::new(
///     HttpTransportConfig::builder("https://mail.example.com/EWS/Exchange.asmx")
///         .bearer_token("token")
///         .build()?,
/// )?;
/// let client = ServiceClientBuilder::new()
///     .with_server_version(ServerVersion::Exchange2016)
///     .with_culture("en-US")
///     .build(transport)?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct ServiceClientBuilder {
    config: ClientConfig,
}

impl ServiceClientBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole configuration.
    #[must_use]
    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the server version every request asks for.
    #[must_use]
    pub fn with_server_version(mut self, version: ServerVersion) -> Self {
        self.config.requested_server_version = version;
        self
    }

    /// Sets the mailbox culture, such as `en-US`.
    #[must_use]
    pub fn with_culture(mut self, culture: impl Into<String>) -> Self {
        self.config.culture = Some(culture.into());
        self
    }

    /// Sets the time zone requests are evaluated in.
    #[must_use]
    pub fn with_time_zone(mut self, time_zone: impl Into<String>) -> Self {
        self.config.time_zone = Some(time_zone.into());
        self
    }

    /// Acts on behalf of another account.
    #[must_use]
    pub fn with_impersonation(mut self, user: ImpersonatedUserId) -> Self {
        self.config.impersonation = Some(user);
        self
    }

    /// Sets the precision of returned date-time values.
    #[must_use]
    pub fn with_date_time_precision(mut self, precision: DateTimePrecision) -> Self {
        self.config.date_time_precision = Some(precision);
        self
    }

    /// Adds a SOAP header writer.
    #[must_use]
    pub fn with_custom_header(mut self, header: Arc<dyn CustomHeader>) -> Self {
        self.config.custom_headers.push(header);
        self
    }

    /// Adds an HTTP header sent with every request.
    #[must_use]
    pub fn with_http_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.http_headers.push((name.into(), value.into()));
        self
    }

    /// Sets the timeout for buffered requests.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = Some(timeout);
        self
    }

    /// Logs request and response envelopes.
    #[must_use]
    pub fn with_payload_tracing(mut self, enabled: bool) -> Self {
        self.config.trace_payloads = enabled;
        self
    }

    /// Sets limits for reading buffered response bodies.
    #[must_use]
    pub fn with_limits(mut self, limits: LimitsConfig) -> Self {
        self.config.limits = limits;
        self
    }

    /// Builds the client over a transport.
    ///
    /// # Errors
    ///
    /// Returns a validation error when a configured header needs a newer
    /// server version than the one requested.
    pub fn build<T: Transport>(self, transport: T) -> EwsResult<ServiceClient<T>> {
        self.config.envelope_headers().validate()?;
        Ok(ServiceClient::new(transport, self.config))
    }
}
