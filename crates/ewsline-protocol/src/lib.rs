//! # ewsline Protocol
//!
//! Wire-level machinery shared by every EWS operation and by the streaming
//! notification connection:
//!
//! - **Envelopes**: [`RequestEnvelope`] writes `soap:Envelope` with the
//!   versioned header block; [`ResponseEnvelope`] reads one back, including
//!   `t:ServerVersionInfo`
//! - **Operations**: [`Operation`] and [`SingleOperation`] carry the per-call
//!   callbacks (validate, write body, parse response) as values
//! - **Decoding**: [`ResponseDecoder`] applies the batch count rules and
//!   [`ErrorHandlingMode`]
//! - **Faults**: [`SoapFault`] decodes SOAP 1.1 and 1.2 faults into typed
//!   [`EwsError`]s
//! - **Notifications**: the event model and the `GetStreamingEvents` request
//!
//! Nothing here performs I/O except [`xml::XmlDocumentReader`], which frames
//! documents out of an `AsyncBufRead`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ewsline_protocol::{EnvelopeHeaders, Operation, RequestEnvelope, ServerVersion};
//!
//! let op = Operation::<()>::builder("DeleteItem")
//!     .write_body(|w| { /* ... */ Ok(()) })
//!     .parse_message(|_, _| Ok(()))
//!     .build()?;
//! let headers = EnvelopeHeaders::new(ServerVersion::Exchange2013_SP1);
//! let bytes = RequestEnvelope::build(&headers, op.spec().name(), |w| op.spec().write_body(w))?;
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

pub mod decoder;
pub mod envelope;
pub mod error;
pub mod fault;
pub mod notification;
pub mod operation;
pub mod response;
pub mod version;
pub mod xml;

pub use decoder::{EnvelopeBody, ResponseDecoder, ResponseEnvelope};
pub use envelope::{
    ConnectingIdType, CustomHeader, DateTimePrecision, EnvelopeHeaders, ImpersonatedUserId,
    RequestEnvelope,
};
pub use error::{ErrorKind, EwsError, EwsResult, RemoteFault, RemoteFaultKind};
pub use fault::{SoapFault, SoapVersion, opaque_fault};
pub use notification::{
    ConnectionStatus, EntityId, EventType, FolderEvent, ItemEvent, NotificationEvent,
    NotificationGroup, StreamingResponse, Subscription, SubscriptionKind,
    get_streaming_events_operation,
};
pub use operation::{
    ErrorHandlingMode, Operation, OperationBuilder, OperationSpec, SingleOperation,
    ValidationContext,
};
pub use response::{ResponseClass, ResponseCollection, ResponseMessage, ServiceError, codes};
pub use version::{ServerVersion, ServerVersionInfo};
pub use xml::{XmlError, XmlNamespace};
