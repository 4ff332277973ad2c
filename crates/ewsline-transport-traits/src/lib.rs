//! # ewsline Transport Traits
//!
//! The transport boundary for the ewsline EWS client. Everything the protocol
//! engine needs from the network is expressed here:
//!
//! - **Traits**: [`Transport`] - one POST round trip, returning the status,
//!   headers and an incrementally readable body
//! - **Types**: [`TransportRequest`], [`TransportResponse`], [`BodyStream`]
//! - **Errors**: [`TransportError`], [`TransportResult`]
//! - **Config**: [`LimitsConfig`], [`TimeoutConfig`], [`TlsConfig`]
//! - **Metrics**: [`TransportMetrics`], [`AtomicMetrics`]
//!
//! The body is never buffered by the transport itself, which is what lets the
//! streaming-notification reader consume one long-lived response document by
//! document.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ewsline_transport_traits::{Transport, TransportRequest};
//!
//! let response = transport.send(TransportRequest::new(envelope_bytes)).await?;
//! if response.is_success() {
//!     let body = response.bytes(&limits).await?;
//! }
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::must_use_candidate
)]

mod config;
mod error;
mod message;
mod metrics;
mod traits;

#[cfg(feature = "test-utils")]
#[cfg_attr(docsrs, doc(cfg(feature = "test-utils")))]
pub mod mock;

pub use config::{LimitsConfig, TimeoutConfig, TlsConfig};
pub use error::{TransportError, TransportResult, validate_request_size, validate_response_size};
pub use message::{BodyReader, BodyStream, TransportRequest, TransportResponse};
pub use metrics::{AtomicMetrics, TransportMetrics};
pub use traits::Transport;
