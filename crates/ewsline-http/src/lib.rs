//! # ewsline HTTP Transport
//!
//! The [`Transport`] implementation for real servers: one `reqwest` client
//! posting SOAP envelopes to a single EWS endpoint.
//!
//! ## Features
//!
//! - **Streamed bodies**: response bodies are handed back unread, so a hanging
//!   `GetStreamingEvents` response can be decoded document by document
//! - **Timeouts**: connect timeout always; total request timeout only for
//!   buffered requests
//! - **Authentication**: basic or bearer; HTTP 401 surfaces as
//!   [`TransportError::AuthenticationFailed`]
//! - **Size Limits**: request size and declared response size validation
//! - **Compression**: optional gzip response decoding
//!
//! ## Usage
//!
//! ```rust,no_run
//! use ewsline_http::{HttpTransport, HttpTransportConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = HttpTransportConfig::builder("https://mail.example.com/EWS/Exchange.asmx")
//!     .basic_auth("alice@example.com", "secret")
//!     .build()?;
//! let transport = HttpTransport::new(config)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Security
//!
//! - Certificate validation is enabled by default
//! - Disabling certificate validation requires the `EWSLINE_ALLOW_INSECURE_TLS`
//!   environment variable to be set as well
//! - Credentials are redacted from `Debug` output

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod config;
mod transport;

pub use config::{Credentials, HttpTransportConfig, HttpTransportConfigBuilder};
pub use transport::HttpTransport;

// Re-export common types from traits crate for convenience
pub use ewsline_transport_traits::{
    LimitsConfig, TimeoutConfig, TlsConfig, Transport, TransportError, TransportMetrics,
    TransportRequest, TransportResponse, TransportResult,
};
