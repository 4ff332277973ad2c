//! Per-item outcomes of a batched request.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{EwsError, EwsResult};
use crate::xml::{XmlNamespace, XmlReader};

/// Response codes the core interprets.
pub mod codes {
    /// Success.
    pub const NO_ERROR: &str = "NoError";
    /// The server is throttling the caller.
    pub const SERVER_BUSY: &str = "ErrorServerBusy";
    /// A streaming subscription fell behind; recoverable.
    pub const MISSED_NOTIFICATION_EVENTS: &str = "ErrorMissedNotificationEvents";
    /// The requested schema version is not supported by the server.
    pub const INVALID_SERVER_VERSION: &str = "ErrorInvalidServerVersion";
    /// The request used a schema version the server rejects.
    pub const INCORRECT_SCHEMA_VERSION: &str = "ErrorIncorrectSchemaVersion";
    /// The request failed schema validation.
    pub const SCHEMA_VALIDATION: &str = "ErrorSchemaValidation";
}

/// The `ResponseClass` attribute of a response message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResponseClass {
    /// The item succeeded.
    Success,
    /// The item succeeded with caveats.
    Warning,
    /// The item failed.
    Error,
}

impl ResponseClass {
    /// The wire name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::Warning => "Warning",
            Self::Error => "Error",
        }
    }
}

impl fmt::Display for ResponseClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResponseClass {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "Success" => Ok(Self::Success),
            "Warning" => Ok(Self::Warning),
            "Error" => Ok(Self::Error),
            other => Err(format!("unknown response class {other:?}")),
        }
    }
}

crate::xml_value_from_str!(ResponseClass);

/// The error view of a response message whose class is `Error`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{response_code}: {message}")]
pub struct ServiceError {
    /// The EWS response code.
    pub response_code: String,
    /// `MessageText`, or the response code when the server sent none.
    pub message: String,
    /// `DescriptiveLinkKey`, if any.
    pub descriptive_link_key: Option<i32>,
    /// `MessageXml` name/value pairs.
    pub details: Vec<(String, String)>,
}

impl ServiceError {
    /// Returns `true` for server throttling.
    pub fn is_server_busy(&self) -> bool {
        self.response_code == codes::SERVER_BUSY
    }

    /// The `BackOffMilliseconds` hint, if present.
    pub fn back_off(&self) -> Option<Duration> {
        back_off_hint(&self.details)
    }

    /// Looks up one `MessageXml` detail by name.
    pub fn detail(&self, name: &str) -> Option<&str> {
        self.details
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

pub(crate) fn back_off_hint(details: &[(String, String)]) -> Option<Duration> {
    details
        .iter()
        .find(|(key, _)| key == "BackOffMilliseconds")
        .and_then(|(_, value)| value.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
}

/// Reads the children of a `MessageXml` element and leaves it.
///
/// Both observed shapes are accepted: `<t:Value Name="Key">v</t:Value>` and
/// directly tagged `<t:Key>v</t:Key>`. Nested markup is kept as text.
pub(crate) fn read_message_xml(reader: &mut XmlReader) -> EwsResult<Vec<(String, String)>> {
    let mut details = Vec::new();
    while !reader.at_end_of_element() {
        let element = reader.read_any_start_element()?;
        let name = match element.attribute("Name") {
            Some(name) if element.local_name == "Value" => name.to_string(),
            _ => element.local_name.clone(),
        };
        let value = if reader.peek_element().is_some() {
            reader.read_inner_xml()?
        } else {
            reader.read_value::<String>()?
        };
        details.push((name, value));
    }
    reader.read_current_end()?;
    Ok(details)
}

/// One outcome in a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseMessage<T> {
    /// Success, warning or error.
    pub class: ResponseClass,
    /// The EWS response code (`NoError` on success).
    pub response_code: String,
    /// `MessageText`, if any.
    pub message_text: Option<String>,
    /// `DescriptiveLinkKey`, if any.
    pub descriptive_link_key: Option<i32>,
    /// `MessageXml` name/value pairs.
    pub message_xml: Vec<(String, String)>,
    /// The operation-specific payload.
    pub payload: T,
}

impl<T> ResponseMessage<T> {
    /// Returns `true` for class `Error`.
    pub fn is_error(&self) -> bool {
        self.class == ResponseClass::Error
    }

    /// The error view of this message, if its class is `Error`.
    pub fn error(&self) -> Option<ServiceError> {
        self.is_error().then(|| ServiceError {
            response_code: self.response_code.clone(),
            message: self
                .message_text
                .clone()
                .unwrap_or_else(|| self.response_code.clone()),
            descriptive_link_key: self.descriptive_link_key,
            details: self.message_xml.clone(),
        })
    }

    /// Converts into the payload, or the error if the class is `Error`.
    pub fn into_result(self) -> Result<T, ServiceError> {
        match self.error() {
            Some(err) => Err(err),
            None => Ok(self.payload),
        }
    }

    /// Replaces the payload.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ResponseMessage<U> {
        ResponseMessage {
            class: self.class,
            response_code: self.response_code,
            message_text: self.message_text,
            descriptive_link_key: self.descriptive_link_key,
            message_xml: self.message_xml,
            payload: f(self.payload),
        }
    }
}

/// The ordered outcomes of one batched request.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseCollection<T> {
    messages: Vec<ResponseMessage<T>>,
}

impl<T> ResponseCollection<T> {
    /// Wraps decoded messages.
    pub fn new(messages: Vec<ResponseMessage<T>>) -> Self {
        Self { messages }
    }

    /// Number of messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns `true` if there are no messages.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The worst class in the batch: `Error` if any message failed, then
    /// `Warning`, otherwise `Success`.
    pub fn overall_result(&self) -> ResponseClass {
        let mut overall = ResponseClass::Success;
        for message in &self.messages {
            match message.class {
                ResponseClass::Error => return ResponseClass::Error,
                ResponseClass::Warning => overall = ResponseClass::Warning,
                ResponseClass::Success => {}
            }
        }
        overall
    }

    /// Messages in server order.
    pub fn iter(&self) -> impl Iterator<Item = &ResponseMessage<T>> {
        self.messages.iter()
    }

    /// Messages whose class is not `Error`.
    pub fn successes(&self) -> impl Iterator<Item = &ResponseMessage<T>> {
        self.messages.iter().filter(|m| !m.is_error())
    }

    /// Error views of the failed messages, with their batch index.
    pub fn errors(&self) -> impl Iterator<Item = (usize, ServiceError)> + '_ {
        self.messages
            .iter()
            .enumerate()
            .filter_map(|(index, m)| m.error().map(|err| (index, err)))
    }

    /// All payloads, or the first error.
    pub fn into_payloads(self) -> EwsResult<Vec<T>> {
        self.messages
            .into_iter()
            .map(|m| m.into_result().map_err(EwsError::from))
            .collect()
    }

    /// The underlying messages.
    pub fn into_messages(self) -> Vec<ResponseMessage<T>> {
        self.messages
    }
}

impl<T> IntoIterator for ResponseCollection<T> {
    type Item = ResponseMessage<T>;
    type IntoIter = std::vec::IntoIter<ResponseMessage<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.into_iter()
    }
}

impl<T> std::ops::Index<usize> for ResponseCollection<T> {
    type Output = ResponseMessage<T>;

    fn index(&self, index: usize) -> &Self::Output {
        &self.messages[index]
    }
}

pub(crate) const MESSAGE_TEXT: &str = "MessageText";
pub(crate) const RESPONSE_CODE: &str = "ResponseCode";
pub(crate) const DESCRIPTIVE_LINK_KEY: &str = "DescriptiveLinkKey";
pub(crate) const MESSAGE_XML: &str = "MessageXml";

/// The standard elements every response message may start with.
#[derive(Debug, Default)]
pub(crate) struct MessageHeader {
    pub(crate) response_code: Option<String>,
    pub(crate) message_text: Option<String>,
    pub(crate) descriptive_link_key: Option<i32>,
    pub(crate) message_xml: Vec<(String, String)>,
}

impl MessageHeader {
    /// Reads the standard elements, in any order, stopping at the first
    /// element that is not one of them.
    pub(crate) fn read(reader: &mut XmlReader) -> EwsResult<Self> {
        let mut header = Self::default();
        loop {
            let Some(element) = reader.peek_element() else {
                break;
            };
            if element.namespace != XmlNamespace::Messages {
                break;
            }
            match element.local_name.as_str() {
                RESPONSE_CODE => {
                    header.response_code =
                        Some(reader.read_element_value(XmlNamespace::Messages, RESPONSE_CODE)?);
                }
                MESSAGE_TEXT => {
                    header.message_text =
                        Some(reader.read_element_value(XmlNamespace::Messages, MESSAGE_TEXT)?);
                }
                DESCRIPTIVE_LINK_KEY => {
                    header.descriptive_link_key = Some(
                        reader.read_element_value(XmlNamespace::Messages, DESCRIPTIVE_LINK_KEY)?,
                    );
                }
                MESSAGE_XML => {
                    reader.read_start_element(XmlNamespace::Messages, MESSAGE_XML)?;
                    header.message_xml = read_message_xml(reader)?;
                }
                _ => break,
            }
        }
        Ok(header)
    }
}
