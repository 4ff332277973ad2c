//! Client configuration types.

use std::sync::Arc;
use std::time::Duration;

use ewsline_protocol::{
    CustomHeader, DateTimePrecision, EnvelopeHeaders, ImpersonatedUserId, ServerVersion,
};
use ewsline_transport_traits::LimitsConfig;

/// Environment variable that turns on request/response payload logging.
pub const LOG_PAYLOADS_ENV_VAR: &str = "EWSLINE_LOG_PAYLOADS";

/// Per-client request settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Version written into every `t:RequestServerVersion` header.
    pub requested_server_version: ServerVersion,

    /// `t:MailboxCulture`.
    pub culture: Option<String>,

    /// `t:TimeZoneContext` time zone id.
    pub time_zone: Option<String>,

    /// `t:ExchangeImpersonation` target.
    pub impersonation: Option<ImpersonatedUserId>,

    /// `t:DateTimePrecision`.
    pub date_time_precision: Option<DateTimePrecision>,

    /// Extra SOAP header writers, applied in order.
    pub custom_headers: Vec<Arc<dyn CustomHeader>>,

    /// Extra HTTP headers sent with every request.
    pub http_headers: Vec<(String, String)>,

    /// Total timeout for one buffered request. Never applied to streaming
    /// requests. `None` leaves the transport's own timeout in place.
    pub request_timeout: Option<Duration>,

    /// Log request and response envelopes.
    pub trace_payloads: bool,

    /// Limits for reading buffered response bodies.
    pub limits: LimitsConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            requested_server_version: ServerVersion::default(),
            culture: None,
            time_zone: None,
            impersonation: None,
            date_time_precision: None,
            custom_headers: Vec::new(),
            http_headers: Vec::new(),
            request_timeout: None,
            trace_payloads: false,
            limits: LimitsConfig::default(),
        }
    }
}

impl ClientConfig {
    /// The SOAP header block every request carries.
    pub fn envelope_headers(&self) -> EnvelopeHeaders {
        EnvelopeHeaders {
            requested_version: self.requested_server_version,
            culture: self.culture.clone(),
            impersonation: self.impersonation.clone(),
            time_zone: self.time_zone.clone(),
            date_time_precision: self.date_time_precision,
            custom: self.custom_headers.clone(),
        }
    }

    /// Whether payloads are logged, by configuration or environment.
    pub fn payload_tracing_enabled(&self) -> bool {
        self.trace_payloads || std::env::var_os(LOG_PAYLOADS_ENV_VAR).is_some()
    }
}
