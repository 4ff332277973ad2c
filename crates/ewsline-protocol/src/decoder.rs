//! Response envelope decoding and batch count rules.

use tracing::{debug, warn};

use crate::error::{EwsError, EwsResult};
use crate::fault::{SoapFault, SoapVersion};
use crate::operation::{ErrorHandlingMode, Operation, SingleOperation};
use crate::response::{MessageHeader, ResponseClass, ResponseCollection, ResponseMessage, codes};
use crate::version::ServerVersionInfo;
use crate::xml::{XmlNamespace, XmlReader};

/// What `soap:Body` held.
#[derive(Debug)]
pub enum EnvelopeBody {
    /// A SOAP fault.
    Fault(Box<SoapFault>),
    /// Operation content; the reader is positioned on the first body child.
    Content(XmlReader),
}

/// A decoded response envelope.
#[derive(Debug)]
pub struct ResponseEnvelope {
    /// Envelope revision.
    pub soap_version: SoapVersion,
    /// `t:ServerVersionInfo` from the header, if present.
    pub server_info: Option<ServerVersionInfo>,
    /// The body.
    pub body: EnvelopeBody,
}

impl ResponseEnvelope {
    /// Reads the envelope, its header and the start of its body.
    pub fn read(mut reader: XmlReader) -> EwsResult<Self> {
        let root = reader.read_any_start_element()?;
        if root.local_name != "Envelope" {
            return Err(EwsError::deserialization(format!(
                "expected a SOAP envelope, found {root}"
            )));
        }
        let soap_version = SoapVersion::from_namespace(root.namespace).ok_or_else(|| {
            EwsError::deserialization(format!(
                "envelope is in an unsupported namespace: {}",
                root.namespace
            ))
        })?;
        let soap = soap_version.namespace();

        let mut server_info = None;
        if reader.is_start_element(soap, "Header") {
            reader.read_start_element(soap, "Header")?;
            while !reader.at_end_of_element() {
                if reader.is_start_element(XmlNamespace::Types, "ServerVersionInfo") {
                    server_info = Some(ServerVersionInfo::read(&mut reader)?);
                } else {
                    reader.skip_element()?;
                }
            }
            reader.read_end_element(soap, "Header")?;
        }

        reader.read_start_element(soap, "Body")?;
        let body = if reader.is_start_element(soap, "Fault") {
            let mut fault = SoapFault::read(&mut reader, soap_version)?;
            fault.server_version = server_info.clone();
            EnvelopeBody::Fault(Box::new(fault))
        } else {
            EnvelopeBody::Content(reader)
        };

        Ok(Self {
            soap_version,
            server_info,
            body,
        })
    }

    /// Parses raw bytes into an envelope.
    pub fn parse(bytes: &[u8]) -> EwsResult<Self> {
        Self::read(XmlReader::parse(bytes)?)
    }
}

/// Reads response messages out of an envelope body.
#[derive(Debug, Clone, Copy)]
pub struct ResponseDecoder;

impl ResponseDecoder {
    /// Reads `m:{response_name}/m:ResponseMessages/*` without applying the
    /// count rules.
    pub fn read_messages<T>(
        reader: &mut XmlReader,
        operation: &Operation<T>,
    ) -> EwsResult<Vec<ResponseMessage<T>>> {
        let response_name = operation.spec().response_name();
        reader.read_start_element(XmlNamespace::Messages, response_name)?;
        reader.read_start_element(XmlNamespace::Messages, "ResponseMessages")?;

        let mut messages = Vec::new();
        while !reader.at_end_of_element() {
            messages.push(Self::read_message(reader, operation)?);
        }

        reader.read_end_element(XmlNamespace::Messages, "ResponseMessages")?;
        reader.skip_to_end_of_element()?;
        reader.read_end_element(XmlNamespace::Messages, response_name)?;
        Ok(messages)
    }

    /// Reads one response message element.
    pub fn read_message<T>(
        reader: &mut XmlReader,
        operation: &Operation<T>,
    ) -> EwsResult<ResponseMessage<T>> {
        let message_name = operation.response_message_name();
        reader.read_start_element(XmlNamespace::Messages, message_name)?;
        let class: ResponseClass = reader.read_attribute("ResponseClass")?;

        let header = MessageHeader::read(reader)?;
        let payload = operation.parse_message(reader, class)?;
        reader.skip_to_end_of_element()?;
        reader.read_end_element(XmlNamespace::Messages, message_name)?;

        let response_code = match (header.response_code, class) {
            (Some(code), _) => code,
            (None, ResponseClass::Success) => codes::NO_ERROR.to_string(),
            (None, _) => {
                return Err(EwsError::deserialization(format!(
                    "{message_name} with class {class} has no ResponseCode"
                )));
            }
        };

        Ok(ResponseMessage {
            class,
            response_code,
            message_text: header.message_text,
            descriptive_link_key: header.descriptive_link_key,
            message_xml: header.message_xml,
            payload,
        })
    }

    /// Applies the batch count rules to decoded messages.
    ///
    /// Exactly `expected` messages pass. A single `Error` message where more
    /// were expected is a general batch failure and is raised. Any other
    /// count is a contract violation.
    pub fn check_count<T>(
        messages: Vec<ResponseMessage<T>>,
        expected: usize,
        operation: &str,
    ) -> EwsResult<Vec<ResponseMessage<T>>> {
        let count = messages.len();
        if count == expected {
            return Ok(messages);
        }

        if count == 1 && count < expected {
            let mut messages = messages;
            if let Some(error) = messages.pop().and_then(|m| m.error()) {
                debug!(
                    operation,
                    expected,
                    response_code = %error.response_code,
                    "Batch short-circuited with a single error"
                );
                return Err(EwsError::Response(error));
            }
        }

        warn!(operation, expected, count, "Response message count mismatch");
        Err(EwsError::deserialization(format!(
            "{operation}: expected {expected} response message(s), got {count}"
        )))
    }

    /// Decodes a batched response body: messages, count rules, error mode.
    pub fn decode_batch<T>(
        reader: &mut XmlReader,
        operation: &Operation<T>,
    ) -> EwsResult<ResponseCollection<T>> {
        let messages = Self::read_messages(reader, operation)?;
        let messages = Self::check_count(
            messages,
            operation.expected_count(),
            operation.spec().name(),
        )?;

        if operation.error_mode() == ErrorHandlingMode::ThrowOnError
            && let Some(error) = messages.first().and_then(ResponseMessage::error)
        {
            return Err(EwsError::Response(error));
        }
        Ok(ResponseCollection::new(messages))
    }

    /// Decodes a single-payload response body.
    pub fn decode_single<T>(reader: &mut XmlReader, operation: &SingleOperation<T>) -> EwsResult<T> {
        let response_name = operation.spec().response_name();
        reader.read_start_element(XmlNamespace::Messages, response_name)?;
        let payload = operation.parse_response(reader)?;
        reader.skip_to_end_of_element()?;
        reader.read_end_element(XmlNamespace::Messages, response_name)?;
        Ok(payload)
    }
}
