//! Namespace-aware XML primitives for SOAP envelopes.
//!
//! Writing goes through [`XmlWriter`], a thin layer over `quick_xml::Writer`
//! that knows the fixed set of namespace prefixes used on the wire. Reading is
//! split in two: [`XmlDocumentReader`] frames one top-level element at a time
//! out of any `AsyncBufRead` (a buffered body or a long-lived streamed one),
//! and [`XmlReader`] is a pull cursor over one framed document.

mod document;
mod reader;
mod value;
mod writer;

pub use document::XmlDocumentReader;
pub use reader::{XmlAttribute, XmlElement, XmlReader};
pub use value::XmlValue;
pub use writer::XmlWriter;

use std::fmt;

use quick_xml::name::{Namespace, ResolveResult};
use thiserror::Error;

/// SOAP 1.1 envelope namespace.
pub const SOAP11_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
/// SOAP 1.2 envelope namespace.
pub const SOAP12_NS: &str = "http://www.w3.org/2003/05/soap-envelope";
/// EWS types namespace.
pub const TYPES_NS: &str = "http://schemas.microsoft.com/exchange/services/2006/types";
/// EWS messages namespace.
pub const MESSAGES_NS: &str = "http://schemas.microsoft.com/exchange/services/2006/messages";
/// EWS errors namespace.
pub const ERRORS_NS: &str = "http://schemas.microsoft.com/exchange/services/2006/errors";
/// XML schema instance namespace.
pub const XSI_NS: &str = "http://www.w3.org/2001/XMLSchema-instance";

/// The namespaces the codec distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum XmlNamespace {
    /// No namespace (unqualified names such as SOAP 1.1 `faultcode`).
    NotSpecified,
    /// SOAP 1.1 envelope.
    Soap,
    /// SOAP 1.2 envelope.
    Soap12,
    /// EWS types (`t:`).
    Types,
    /// EWS messages (`m:`).
    Messages,
    /// EWS errors (`e:`).
    Errors,
    /// XML schema instance (`xsi:`).
    Xsi,
    /// Any namespace the codec does not know.
    Other,
}

impl XmlNamespace {
    /// The namespace URI, if any.
    pub const fn uri(self) -> Option<&'static str> {
        match self {
            Self::Soap => Some(SOAP11_NS),
            Self::Soap12 => Some(SOAP12_NS),
            Self::Types => Some(TYPES_NS),
            Self::Messages => Some(MESSAGES_NS),
            Self::Errors => Some(ERRORS_NS),
            Self::Xsi => Some(XSI_NS),
            Self::NotSpecified | Self::Other => None,
        }
    }

    /// The prefix used when writing.
    pub const fn prefix(self) -> Option<&'static str> {
        match self {
            Self::Soap | Self::Soap12 => Some("soap"),
            Self::Types => Some("t"),
            Self::Messages => Some("m"),
            Self::Errors => Some("e"),
            Self::Xsi => Some("xsi"),
            Self::NotSpecified | Self::Other => None,
        }
    }

    /// Maps a namespace URI to the known namespace.
    pub fn from_uri(uri: &[u8]) -> Self {
        match uri {
            b"" => Self::NotSpecified,
            u if u == SOAP11_NS.as_bytes() => Self::Soap,
            u if u == SOAP12_NS.as_bytes() => Self::Soap12,
            u if u == TYPES_NS.as_bytes() => Self::Types,
            u if u == MESSAGES_NS.as_bytes() => Self::Messages,
            u if u == ERRORS_NS.as_bytes() => Self::Errors,
            u if u == XSI_NS.as_bytes() => Self::Xsi,
            _ => Self::Other,
        }
    }

    pub(crate) fn from_resolved(resolved: &ResolveResult<'_>) -> Self {
        match resolved {
            ResolveResult::Bound(Namespace(uri)) => Self::from_uri(uri),
            ResolveResult::Unbound => Self::NotSpecified,
            ResolveResult::Unknown(_) => Self::Other,
        }
    }

    /// Returns `true` for either SOAP envelope namespace.
    pub const fn is_soap(self) -> bool {
        matches!(self, Self::Soap | Self::Soap12)
    }
}

impl fmt::Display for XmlNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.uri() {
            Some(uri) => f.write_str(uri),
            None if *self == Self::Other => f.write_str("<unknown namespace>"),
            None => f.write_str("<no namespace>"),
        }
    }
}

/// Errors raised while reading or writing XML.
///
/// These always mean the document did not have the shape the protocol
/// requires, so they are never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum XmlError {
    /// The underlying parser rejected the input.
    #[error("Malformed XML: {0}")]
    Syntax(String),

    /// The writer failed.
    #[error("Failed to write XML: {0}")]
    Write(String),

    /// The input ended inside a document.
    #[error("Unexpected end of XML input inside an element")]
    UnexpectedEof,

    /// The cursor found something other than what the caller asked for.
    #[error("Expected {expected}, found {found}")]
    Unexpected {
        /// What the caller asked for.
        expected: String,
        /// What was actually next.
        found: String,
    },

    /// A required attribute was missing.
    #[error("Element {element} is missing required attribute {attribute}")]
    MissingAttribute {
        /// The element local name.
        element: String,
        /// The attribute name.
        attribute: String,
    },

    /// A text value could not be converted to the requested type.
    #[error("Invalid value {value:?} for {name}: {reason}")]
    InvalidValue {
        /// The element or attribute the value came from.
        name: String,
        /// The raw text.
        value: String,
        /// Why conversion failed.
        reason: String,
    },

    /// A streamed document grew past the configured bound.
    #[error("XML document exceeds {max} bytes")]
    DocumentTooLarge {
        /// The configured maximum.
        max: usize,
    },

    /// Writer misuse (attribute after content, unbalanced end).
    #[error("Invalid writer state: {0}")]
    InvalidWriterState(&'static str),
}

impl XmlError {
    pub(crate) fn syntax(err: impl fmt::Display) -> Self {
        Self::Syntax(err.to_string())
    }

    pub(crate) fn write(err: impl fmt::Display) -> Self {
        Self::Write(err.to_string())
    }
}
