//! HTTP transport configuration.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use ewsline_transport_traits::{
    LimitsConfig, TimeoutConfig, TlsConfig, TransportError, TransportResult,
};

/// How requests authenticate against the server.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Credentials {
    /// No `Authorization` header.
    #[default]
    None,
    /// HTTP basic authentication.
    Basic {
        /// Account name, such as `alice@contoso.com`.
        username: String,
        /// Password.
        password: String,
    },
    /// An OAuth bearer token.
    Bearer(String),
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Self::Bearer(_) => f.write_str("Bearer(<redacted>)"),
        }
    }
}

/// Configuration for [`HttpTransport`](crate::HttpTransport).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpTransportConfig {
    /// The EWS endpoint, such as `https://outlook.office365.com/EWS/Exchange.asmx`.
    pub endpoint: Url,

    /// Connect and request timeouts.
    pub timeouts: TimeoutConfig,

    /// Request and buffered response size limits.
    pub limits: LimitsConfig,

    /// TLS configuration.
    pub tls: TlsConfig,

    /// Authentication.
    pub credentials: Credentials,

    /// User agent string (set to None to disable User-Agent header)
    ///
    /// Default: `ewsline/{version}`
    pub user_agent: Option<String>,

    /// Headers added to every request.
    pub headers: HashMap<String, String>,

    /// Whether to advertise and decode gzip response bodies.
    pub accept_gzip: bool,
}

impl HttpTransportConfig {
    /// Default configuration for an endpoint.
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            timeouts: TimeoutConfig::default(),
            limits: LimitsConfig::default(),
            tls: TlsConfig::default(),
            credentials: Credentials::None,
            user_agent: Some(format!("ewsline/{}", env!("CARGO_PKG_VERSION"))),
            headers: HashMap::new(),
            accept_gzip: true,
        }
    }

    /// Starts a builder for an endpoint given as text.
    pub fn builder(endpoint: impl Into<String>) -> HttpTransportConfigBuilder {
        HttpTransportConfigBuilder::new(endpoint)
    }
}

/// Builder for [`HttpTransportConfig`].
#[derive(Debug)]
pub struct HttpTransportConfigBuilder {
    endpoint: String,
    timeouts: TimeoutConfig,
    limits: LimitsConfig,
    tls: TlsConfig,
    credentials: Credentials,
    user_agent: Option<String>,
    headers: HashMap<String, String>,
    accept_gzip: bool,
}

impl HttpTransportConfigBuilder {
    fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeouts: TimeoutConfig::default(),
            limits: LimitsConfig::default(),
            tls: TlsConfig::default(),
            credentials: Credentials::None,
            user_agent: Some(format!("ewsline/{}", env!("CARGO_PKG_VERSION"))),
            headers: HashMap::new(),
            accept_gzip: true,
        }
    }

    /// Sets the connection timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.connect = timeout;
        self
    }

    /// Sets the total timeout for non-streaming requests.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeouts.request = timeout;
        self
    }

    /// Sets size limits.
    #[must_use]
    pub fn limits(mut self, limits: LimitsConfig) -> Self {
        self.limits = limits;
        self
    }

    /// Sets TLS options.
    #[must_use]
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }

    /// Uses HTTP basic authentication.
    #[must_use]
    pub fn basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Credentials::Basic {
            username: username.into(),
            password: password.into(),
        };
        self
    }

    /// Uses a bearer token.
    #[must_use]
    pub fn bearer_token(mut self, token: impl Into<String>) -> Self {
        self.credentials = Credentials::Bearer(token.into());
        self
    }

    /// Sets or clears the user agent.
    #[must_use]
    pub fn user_agent(mut self, user_agent: Option<String>) -> Self {
        self.user_agent = user_agent;
        self
    }

    /// Adds a header sent with every request.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Enables or disables gzip.
    #[must_use]
    pub fn accept_gzip(mut self, enabled: bool) -> Self {
        self.accept_gzip = enabled;
        self
    }

    /// Parses the endpoint and finishes the configuration.
    pub fn build(self) -> TransportResult<HttpTransportConfig> {
        let endpoint = Url::parse(&self.endpoint).map_err(|e| {
            TransportError::ConfigurationError(format!("invalid endpoint {:?}: {e}", self.endpoint))
        })?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(TransportError::ConfigurationError(format!(
                "endpoint must be http or https, got {}",
                endpoint.scheme()
            )));
        }
        Ok(HttpTransportConfig {
            endpoint,
            timeouts: self.timeouts,
            limits: self.limits,
            tls: self.tls,
            credentials: self.credentials,
            user_agent: self.user_agent,
            headers: self.headers,
            accept_gzip: self.accept_gzip,
        })
    }
}
