//! SOAP 1.1 / 1.2 fault decoding and mapping to typed errors.

use serde::{Deserialize, Serialize};

use crate::error::{EwsError, EwsResult, RemoteFault, RemoteFaultKind};
use crate::response::{back_off_hint, codes, read_message_xml};
use crate::version::{ServerVersion, ServerVersionInfo};
use crate::xml::{XmlNamespace, XmlReader};

/// The SOAP envelope revision a document uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SoapVersion {
    /// SOAP 1.1.
    Soap11,
    /// SOAP 1.2.
    Soap12,
}

impl SoapVersion {
    /// The envelope namespace of this revision.
    pub const fn namespace(self) -> XmlNamespace {
        match self {
            Self::Soap11 => XmlNamespace::Soap,
            Self::Soap12 => XmlNamespace::Soap12,
        }
    }

    /// Maps an envelope namespace back to the revision.
    pub fn from_namespace(namespace: XmlNamespace) -> Option<Self> {
        match namespace {
            XmlNamespace::Soap => Some(Self::Soap11),
            XmlNamespace::Soap12 => Some(Self::Soap12),
            _ => None,
        }
    }
}

/// Everything a SOAP fault body carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoapFault {
    /// Envelope revision the fault came in.
    pub soap_version: SoapVersion,
    /// `faultcode` (1.1) or the innermost `Code/Value` (1.2).
    pub fault_code: Option<String>,
    /// `faultstring` (1.1) or `Reason/Text` (1.2).
    pub fault_string: Option<String>,
    /// `faultactor` (1.1) or `Node` (1.2).
    pub fault_actor: Option<String>,
    /// EWS `ResponseCode` from the detail block.
    pub response_code: Option<String>,
    /// EWS `Message` from the detail block.
    pub message: Option<String>,
    /// Server-side exception type, if reported.
    pub exception_type: Option<String>,
    /// Line of the offending request markup.
    pub line_number: Option<u32>,
    /// Column of the offending request markup.
    pub line_position: Option<u32>,
    /// `MessageXml` name/value pairs.
    pub error_details: Vec<(String, String)>,
    /// The server version from the fault envelope's header, if any.
    pub server_version: Option<ServerVersionInfo>,
}

impl SoapFault {
    fn empty(soap_version: SoapVersion) -> Self {
        Self {
            soap_version,
            fault_code: None,
            fault_string: None,
            fault_actor: None,
            response_code: None,
            message: None,
            exception_type: None,
            line_number: None,
            line_position: None,
            error_details: Vec::new(),
            server_version: None,
        }
    }

    /// Reads a `Fault` element and leaves it.
    pub fn read(reader: &mut XmlReader, soap_version: SoapVersion) -> EwsResult<Self> {
        let soap = soap_version.namespace();
        reader.read_start_element(soap, "Fault")?;
        let mut fault = Self::empty(soap_version);

        while !reader.at_end_of_element() {
            let element = reader.read_any_start_element()?;
            match (soap_version, element.local_name.as_str()) {
                (SoapVersion::Soap11, "faultcode") => fault.fault_code = Some(reader.read_value()?),
                (SoapVersion::Soap11, "faultstring") => {
                    fault.fault_string = Some(reader.read_value()?);
                }
                (SoapVersion::Soap11, "faultactor") => {
                    fault.fault_actor = Some(reader.read_value()?);
                }
                (SoapVersion::Soap11, "detail") | (SoapVersion::Soap12, "Detail") => {
                    fault.read_detail(reader)?;
                }
                (SoapVersion::Soap12, "Code") => fault.fault_code = read_soap12_code(reader, soap)?,
                (SoapVersion::Soap12, "Reason") => {
                    if reader.read_to_descendant(soap, "Text")? {
                        fault.fault_string = Some(reader.read_value()?);
                    }
                    reader.skip_to_end_of_element()?;
                    reader.read_current_end()?;
                }
                (SoapVersion::Soap12, "Node") => fault.fault_actor = Some(reader.read_value()?),
                _ => reader.skip_current_element()?,
            }
        }
        reader.read_end_element(soap, "Fault")?;
        Ok(fault)
    }

    fn read_detail(&mut self, reader: &mut XmlReader) -> EwsResult<()> {
        while !reader.at_end_of_element() {
            let element = reader.read_any_start_element()?;
            match element.local_name.as_str() {
                "ResponseCode" => self.response_code = Some(reader.read_value()?),
                "Message" => self.message = Some(reader.read_value()?),
                "ExceptionType" => self.exception_type = Some(reader.read_value()?),
                "Line" | "LineNumber" => self.line_number = reader.read_value::<u32>().ok(),
                "Position" | "LinePosition" => {
                    self.line_position = reader.read_value::<u32>().ok();
                }
                "MessageXml" => {
                    self.error_details = read_message_xml(reader)?;
                    for (name, value) in &self.error_details {
                        match name.as_str() {
                            "LineNumber" if self.line_number.is_none() => {
                                self.line_number = value.trim().parse().ok();
                            }
                            "LinePosition" if self.line_position.is_none() => {
                                self.line_position = value.trim().parse().ok();
                            }
                            _ => {}
                        }
                    }
                }
                _ => reader.skip_current_element()?,
            }
        }
        reader.read_current_end()?;
        Ok(())
    }

    /// The effective EWS error code: the detail's `ResponseCode`, otherwise
    /// the local part of the fault code.
    pub fn effective_code(&self) -> Option<&str> {
        self.response_code.as_deref().or_else(|| {
            self.fault_code
                .as_deref()
                .map(|code| code.rsplit_once(':').map_or(code, |(_, local)| local))
        })
    }

    /// The most specific message available.
    pub fn best_message(&self) -> String {
        self.message
            .clone()
            .or_else(|| self.fault_string.clone())
            .or_else(|| self.effective_code().map(str::to_string))
            .unwrap_or_default()
    }

    /// Maps the fault to a typed error.
    ///
    /// `requested_version` decides how schema validation faults are read: the
    /// oldest supported generation reports an unknown schema revision as a
    /// schema validation failure, so there it means a version mismatch.
    pub fn into_error(self, requested_version: ServerVersion) -> EwsError {
        let code = self.effective_code().map(str::to_string);
        let message = self.best_message();

        let version_mismatch = match code.as_deref() {
            Some(codes::INVALID_SERVER_VERSION | codes::INCORRECT_SCHEMA_VERSION) => true,
            Some(codes::SCHEMA_VALIDATION) => requested_version.is_oldest(),
            _ => false,
        };
        if let (true, Some(response_code)) = (version_mismatch, code.clone()) {
            return EwsError::ServerVersionMismatch {
                response_code,
                message,
                fault: Box::new(self),
            };
        }

        let kind = match code.as_deref() {
            Some(codes::SCHEMA_VALIDATION) => RemoteFaultKind::SchemaValidation {
                line: self.line_number,
                position: self.line_position,
            },
            Some(codes::SERVER_BUSY) => RemoteFaultKind::ServerBusy {
                back_off: back_off_hint(&self.error_details),
            },
            _ => RemoteFaultKind::Other,
        };
        EwsError::RemoteFault(RemoteFault {
            kind,
            response_code: code,
            message,
            fault: Some(Box::new(self)),
        })
    }
}

fn read_soap12_code(reader: &mut XmlReader, soap: XmlNamespace) -> EwsResult<Option<String>> {
    let mut code = None;
    while !reader.at_end_of_element() {
        let element = reader.read_any_start_element()?;
        match element.local_name.as_str() {
            "Value" => code = Some(reader.read_value::<String>()?),
            // The subcode carries the EWS-specific value when present.
            "Subcode" => {
                if let Some(sub) = read_soap12_code(reader, soap)? {
                    code = Some(sub);
                }
            }
            _ => reader.skip_current_element()?,
        }
    }
    reader.read_current_end()?;
    Ok(code)
}

/// Builds the error for an error status whose body held no decodable fault.
pub fn opaque_fault(status: u16, detail: impl Into<String>) -> EwsError {
    EwsError::RemoteFault(RemoteFault {
        kind: RemoteFaultKind::Opaque { status },
        response_code: None,
        message: detail.into(),
        fault: None,
    })
}
