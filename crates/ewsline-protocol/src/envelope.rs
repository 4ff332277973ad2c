//! Request envelope construction.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{EwsError, EwsResult};
use crate::operation::ValidationContext;
use crate::version::ServerVersion;
use crate::xml::{XmlNamespace, XmlWriter};

/// How the impersonated account is identified in `t:ConnectingSID`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectingIdType {
    /// User principal name.
    PrincipalName,
    /// Security identifier.
    Sid,
    /// Primary SMTP address.
    PrimarySmtpAddress,
    /// Any SMTP address of the account.
    SmtpAddress,
}

impl ConnectingIdType {
    const fn element_name(self) -> &'static str {
        match self {
            Self::PrincipalName => "PrincipalName",
            Self::Sid => "SID",
            Self::PrimarySmtpAddress => "PrimarySmtpAddress",
            Self::SmtpAddress => "SmtpAddress",
        }
    }
}

/// The account a request acts on behalf of.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImpersonatedUserId {
    /// How `id` is to be interpreted.
    pub id_type: ConnectingIdType,
    /// The identifier value.
    pub id: String,
}

impl ImpersonatedUserId {
    /// Creates an impersonation target.
    pub fn new(id_type: ConnectingIdType, id: impl Into<String>) -> Self {
        Self {
            id_type,
            id: id.into(),
        }
    }
}

/// Precision of `xs:dateTime` values in responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DateTimePrecision {
    /// Whole seconds.
    Seconds,
    /// Milliseconds.
    Milliseconds,
}

impl fmt::Display for DateTimePrecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Seconds => "Seconds",
            Self::Milliseconds => "Milliseconds",
        })
    }
}

/// A caller-supplied element written at the end of `soap:Header`.
pub trait CustomHeader: Send + Sync + fmt::Debug {
    /// Writes the header element.
    fn write(&self, writer: &mut XmlWriter) -> EwsResult<()>;
}

/// Everything that goes into `soap:Header`.
#[derive(Debug, Clone)]
pub struct EnvelopeHeaders {
    /// `t:RequestServerVersion@Version`.
    pub requested_version: ServerVersion,
    /// `t:MailboxCulture`, such as `en-US`.
    pub culture: Option<String>,
    /// `t:ExchangeImpersonation`.
    pub impersonation: Option<ImpersonatedUserId>,
    /// `t:TimeZoneContext/t:TimeZoneDefinition@Id`.
    pub time_zone: Option<String>,
    /// `t:DateTimePrecision`.
    pub date_time_precision: Option<DateTimePrecision>,
    /// Extra header elements, written last in order.
    pub custom: Vec<Arc<dyn CustomHeader>>,
}

impl Default for EnvelopeHeaders {
    fn default() -> Self {
        Self::new(ServerVersion::default())
    }
}

impl EnvelopeHeaders {
    /// Headers carrying only the requested version.
    pub fn new(requested_version: ServerVersion) -> Self {
        Self {
            requested_version,
            culture: None,
            impersonation: None,
            time_zone: None,
            date_time_precision: None,
            custom: Vec::new(),
        }
    }

    /// Checks version-gated headers against the requested version.
    pub fn validate(&self) -> EwsResult<()> {
        let context = ValidationContext::new(self.requested_version);
        if self.time_zone.is_some() {
            context.require_version("TimeZoneContext header", ServerVersion::Exchange2010)?;
        }
        if self.date_time_precision.is_some() {
            context.require_version("DateTimePrecision header", ServerVersion::Exchange2010_SP2)?;
        }
        if let Some(user) = &self.impersonation
            && user.id.trim().is_empty()
        {
            return Err(EwsError::validation("impersonated user id is empty"));
        }
        Ok(())
    }

    fn write(&self, writer: &mut XmlWriter) -> EwsResult<()> {
        writer.write_start_element(XmlNamespace::Types, "RequestServerVersion")?;
        writer.write_attribute("Version", self.requested_version)?;
        writer.write_end_element()?;

        if let Some(culture) = &self.culture {
            writer.write_element_value(XmlNamespace::Types, "MailboxCulture", culture.clone())?;
        }

        if let Some(user) = &self.impersonation {
            writer.write_start_element(XmlNamespace::Types, "ExchangeImpersonation")?;
            writer.write_start_element(XmlNamespace::Types, "ConnectingSID")?;
            writer.write_element_value(
                XmlNamespace::Types,
                user.id_type.element_name(),
                user.id.clone(),
            )?;
            writer.write_end_element()?;
            writer.write_end_element()?;
        }

        if let Some(time_zone) = &self.time_zone {
            writer.write_start_element(XmlNamespace::Types, "TimeZoneContext")?;
            writer.write_start_element(XmlNamespace::Types, "TimeZoneDefinition")?;
            writer.write_attribute("Id", time_zone.clone())?;
            writer.write_end_element()?;
            writer.write_end_element()?;
        }

        if let Some(precision) = self.date_time_precision {
            writer.write_element_value(
                XmlNamespace::Types,
                "DateTimePrecision",
                precision.to_string(),
            )?;
        }

        for header in &self.custom {
            header.write(writer)?;
        }
        Ok(())
    }
}

/// Serializes complete request envelopes.
#[derive(Debug, Clone, Copy)]
pub struct RequestEnvelope;

impl RequestEnvelope {
    /// Builds `soap:Envelope` with the header block followed by
    /// `soap:Body/m:{operation}`, whose content `write_body` supplies.
    ///
    /// The operation element is still open when `write_body` runs, so it may
    /// add attributes to it before writing children.
    pub fn build<F>(headers: &EnvelopeHeaders, operation: &str, write_body: F) -> EwsResult<Bytes>
    where
        F: FnOnce(&mut XmlWriter) -> EwsResult<()>,
    {
        let mut writer = XmlWriter::new();
        writer.write_declaration()?;

        writer.write_start_element(XmlNamespace::Soap, "Envelope")?;
        writer.write_namespace_declarations(&[
            XmlNamespace::Soap,
            XmlNamespace::Types,
            XmlNamespace::Messages,
        ])?;

        writer.write_start_element(XmlNamespace::Soap, "Header")?;
        headers.write(&mut writer)?;
        writer.write_end_element()?;

        writer.write_start_element(XmlNamespace::Soap, "Body")?;
        writer.write_start_element(XmlNamespace::Messages, operation)?;
        let depth = writer.depth();
        write_body(&mut writer)?;
        if writer.depth() != depth {
            return Err(EwsError::validation(format!(
                "{operation} body left {} element(s) unbalanced",
                writer.depth().abs_diff(depth)
            )));
        }
        writer.write_end_element()?;
        writer.write_end_element()?;

        writer.write_end_element()?;
        Ok(Bytes::from(writer.into_inner()?))
    }
}
