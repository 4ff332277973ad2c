//! # ewsline Client
//!
//! The mailbox client core: request execution and streaming notifications.
//!
//! ## Features
//!
//! - **Request execution**: [`ServiceClient`] validates an operation, checks
//!   its minimum server version, posts the envelope and decodes the reply.
//!   Batched replies follow the count rules; SOAP faults become typed
//!   [`EwsError`]s. One call is one round trip and nothing is retried.
//! - **Hanging connections**: [`HangingConnection`] keeps one request open and
//!   decodes each envelope the server pushes, with a heartbeat read timeout
//! - **Streaming subscriptions**: [`StreamingSubscriptionConnection`] shares one
//!   hanging connection between many subscriptions and reports everything
//!   as a [`StreamingEvent`]
//!
//! ## Architecture
//!
//! ```text
//! StreamingSubscriptionConnection   (subscription map, dispatch)
//!        ↓
//! HangingConnection                 (state machine, reader task)
//!        ↓
//! ServiceClient                     (envelopes, faults, batches)
//!        ↓
//! Transport                         (ewsline-http, or a test double)
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use ewsline_client::http::{HttpTransport, HttpTransportConfig};
//! use ewsline_client::{
//!     ServiceClientBuilder, StreamingConnectionConfig, StreamingEvent,
//!     StreamingSubscriptionConnection,
//! };
//! use ewsline_protocol::{ServerVersion, Subscription};
//!
//! # async fn example() -> ewsline_protocol::EwsResult<()> {
//! let config = HttpTransportConfig::builder("https://mail.example.com/EWS/Exchange.asmx")
//!     .bearer_token("token")
//!     .build()?;
//! let client = ServiceClientBuilder::new()
//!     .with_server_version(ServerVersion::Exchange2013_SP1)
//!     .build(HttpTransport::new(config)?)?;
//!
//! let (connection, mut events) =
//!     StreamingSubscriptionConnection::with_channel(client, StreamingConnectionConfig::default())?;
//! connection.add_subscription(Subscription::streaming("subscription-id"))?;
//! connection.open().await?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         StreamingEvent::Notification { subscription, events } => {
//!             println!("{}: {} event(s)", subscription.id, events.len());
//!         }
//!         StreamingEvent::Disconnected { reason, .. } => {
//!             println!("disconnected: {reason}");
//!             break;
//!         }
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Logging
//!
//! Everything is reported through `tracing`. Each request carries a fresh
//! `client-request-id`, logged when it is sent and when the reply arrives.
//! Set [`ClientConfig::trace_payloads`] or the `EWSLINE_LOG_PAYLOADS`
//! environment variable to log envelopes as well.

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

mod client;
mod streaming;

pub use client::{ClientConfig, LOG_PAYLOADS_ENV_VAR, ServiceClient, ServiceClientBuilder};
pub use streaming::{
    ConnectionState, Disconnect, DisconnectListener, DisconnectReason, HangingConnection,
    HangingSettings, ResponseHandler, StreamingConnectionConfig, StreamingEvent,
    StreamingEventHandler, StreamingSubscriptionConnection, channel_handler,
};

pub use ewsline_protocol::{EwsError, EwsResult};

/// The reqwest-backed transport.
#[cfg(feature = "http")]
#[cfg_attr(docsrs, doc(cfg(feature = "http")))]
pub mod http {
    pub use ewsline_http::*;
}
