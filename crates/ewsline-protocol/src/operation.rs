//! Generic operation descriptions.
//!
//! Concrete operations are not types of their own. Each is a value carrying
//! the callbacks the executor needs: how to validate, how to write the body,
//! how to read one response message back.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{EwsError, EwsResult};
use crate::response::ResponseClass;
use crate::version::ServerVersion;
use crate::xml::{XmlReader, XmlWriter};

type ValidateFn = Arc<dyn Fn(&ValidationContext) -> EwsResult<()> + Send + Sync>;
type WriteBodyFn = Arc<dyn Fn(&mut XmlWriter) -> EwsResult<()> + Send + Sync>;
type ParseMessageFn<T> = Arc<dyn Fn(&mut XmlReader, ResponseClass) -> EwsResult<T> + Send + Sync>;
type ParseResponseFn<T> = Arc<dyn Fn(&mut XmlReader) -> EwsResult<T> + Send + Sync>;

/// Whether an `Error` response message is raised or returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ErrorHandlingMode {
    /// Raise the error. Only valid when exactly one message is expected.
    ThrowOnError,
    /// Return every message for per-item inspection.
    #[default]
    ReturnErrors,
}

/// What request validation may look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationContext {
    /// The version the client will request.
    pub requested_version: ServerVersion,
}

impl ValidationContext {
    /// Creates a context.
    pub const fn new(requested_version: ServerVersion) -> Self {
        Self { requested_version }
    }

    /// Fails when `feature` needs a newer version than the one requested.
    pub fn require_version(&self, feature: &str, minimum: ServerVersion) -> EwsResult<()> {
        if self.requested_version < minimum {
            return Err(EwsError::VersionTooOld {
                feature: feature.to_string(),
                required: minimum,
                requested: self.requested_version,
            });
        }
        Ok(())
    }
}

/// The parts every operation shape shares.
#[derive(Clone)]
pub struct OperationSpec {
    name: String,
    response_name: String,
    minimum_version: ServerVersion,
    validate: Option<ValidateFn>,
    write_body: WriteBodyFn,
}

impl fmt::Debug for OperationSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationSpec")
            .field("name", &self.name)
            .field("response_name", &self.response_name)
            .field("minimum_version", &self.minimum_version)
            .finish_non_exhaustive()
    }
}

impl OperationSpec {
    /// Creates a spec; the response element defaults to `{name}Response`.
    pub fn new<W>(name: impl Into<String>, write_body: W) -> Self
    where
        W: Fn(&mut XmlWriter) -> EwsResult<()> + Send + Sync + 'static,
    {
        let name = name.into();
        Self {
            response_name: format!("{name}Response"),
            name,
            minimum_version: ServerVersion::OLDEST,
            validate: None,
            write_body: Arc::new(write_body),
        }
    }

    /// The request element name under `soap:Body`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The response element name under `soap:Body`.
    pub fn response_name(&self) -> &str {
        &self.response_name
    }

    /// The oldest version this operation exists in.
    pub const fn minimum_version(&self) -> ServerVersion {
        self.minimum_version
    }

    /// Runs the version gate and the operation's own validation.
    pub fn validate(&self, context: &ValidationContext) -> EwsResult<()> {
        context.require_version(&self.name, self.minimum_version)?;
        match &self.validate {
            Some(validate) => validate(context),
            None => Ok(()),
        }
    }

    /// Writes the body content into the open operation element.
    pub fn write_body(&self, writer: &mut XmlWriter) -> EwsResult<()> {
        (self.write_body)(writer)
    }
}

/// A batched operation whose response is a list of response messages.
pub struct Operation<T> {
    spec: OperationSpec,
    response_message_name: String,
    expected_count: usize,
    error_mode: ErrorHandlingMode,
    parse_message: ParseMessageFn<T>,
}

impl<T> Clone for Operation<T> {
    fn clone(&self) -> Self {
        Self {
            spec: self.spec.clone(),
            response_message_name: self.response_message_name.clone(),
            expected_count: self.expected_count,
            error_mode: self.error_mode,
            parse_message: Arc::clone(&self.parse_message),
        }
    }
}

impl<T> fmt::Debug for Operation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("spec", &self.spec)
            .field("response_message_name", &self.response_message_name)
            .field("expected_count", &self.expected_count)
            .field("error_mode", &self.error_mode)
            .finish_non_exhaustive()
    }
}

impl<T> Operation<T> {
    /// Starts building an operation named `name`.
    pub fn builder(name: impl Into<String>) -> OperationBuilder<T> {
        OperationBuilder::new(name)
    }

    /// The shared parts.
    pub const fn spec(&self) -> &OperationSpec {
        &self.spec
    }

    /// The element name of each response message.
    pub fn response_message_name(&self) -> &str {
        &self.response_message_name
    }

    /// How many response messages the server must return.
    pub const fn expected_count(&self) -> usize {
        self.expected_count
    }

    /// Whether a failed message is raised or returned.
    pub const fn error_mode(&self) -> ErrorHandlingMode {
        self.error_mode
    }

    /// Reads the payload of one response message.
    ///
    /// The reader is positioned after the standard message elements; the
    /// callback reads what it knows and the decoder skips the rest.
    pub fn parse_message(&self, reader: &mut XmlReader, class: ResponseClass) -> EwsResult<T> {
        (self.parse_message)(reader, class)
    }
}

/// Builder for [`Operation`].
pub struct OperationBuilder<T> {
    name: String,
    response_name: Option<String>,
    response_message_name: Option<String>,
    minimum_version: ServerVersion,
    expected_count: usize,
    error_mode: ErrorHandlingMode,
    validate: Option<ValidateFn>,
    write_body: Option<WriteBodyFn>,
    parse_message: Option<ParseMessageFn<T>>,
}

impl<T> fmt::Debug for OperationBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationBuilder")
            .field("name", &self.name)
            .field("expected_count", &self.expected_count)
            .field("error_mode", &self.error_mode)
            .finish_non_exhaustive()
    }
}

impl<T> OperationBuilder<T> {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            response_name: None,
            response_message_name: None,
            minimum_version: ServerVersion::OLDEST,
            expected_count: 1,
            error_mode: ErrorHandlingMode::ReturnErrors,
            validate: None,
            write_body: None,
            parse_message: None,
        }
    }

    /// Overrides the response element name (default `{name}Response`).
    #[must_use]
    pub fn response_name(mut self, name: impl Into<String>) -> Self {
        self.response_name = Some(name.into());
        self
    }

    /// Overrides the response message element name (default
    /// `{name}ResponseMessage`).
    #[must_use]
    pub fn response_message_name(mut self, name: impl Into<String>) -> Self {
        self.response_message_name = Some(name.into());
        self
    }

    /// Sets the oldest version the operation exists in.
    #[must_use]
    pub fn minimum_version(mut self, version: ServerVersion) -> Self {
        self.minimum_version = version;
        self
    }

    /// Sets how many response messages must come back.
    #[must_use]
    pub fn expected_count(mut self, count: usize) -> Self {
        self.expected_count = count;
        self
    }

    /// Sets the error handling mode.
    #[must_use]
    pub fn error_mode(mut self, mode: ErrorHandlingMode) -> Self {
        self.error_mode = mode;
        self
    }

    /// Adds request validation, run before any I/O.
    #[must_use]
    pub fn validate<F>(mut self, validate: F) -> Self
    where
        F: Fn(&ValidationContext) -> EwsResult<()> + Send + Sync + 'static,
    {
        self.validate = Some(Arc::new(validate));
        self
    }

    /// Sets the body writer.
    #[must_use]
    pub fn write_body<F>(mut self, write_body: F) -> Self
    where
        F: Fn(&mut XmlWriter) -> EwsResult<()> + Send + Sync + 'static,
    {
        self.write_body = Some(Arc::new(write_body));
        self
    }

    /// Sets the per-message payload reader.
    #[must_use]
    pub fn parse_message<F>(mut self, parse: F) -> Self
    where
        F: Fn(&mut XmlReader, ResponseClass) -> EwsResult<T> + Send + Sync + 'static,
    {
        self.parse_message = Some(Arc::new(parse));
        self
    }

    /// Finishes the operation.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the body writer or the message reader
    /// is missing, when zero messages are expected, or when
    /// [`ErrorHandlingMode::ThrowOnError`] is combined with an expected count
    /// other than one.
    pub fn build(self) -> EwsResult<Operation<T>> {
        if self.expected_count == 0 {
            return Err(EwsError::validation(format!(
                "{}: expected response count must be at least 1",
                self.name
            )));
        }
        if self.error_mode == ErrorHandlingMode::ThrowOnError && self.expected_count != 1 {
            return Err(EwsError::validation(format!(
                "{}: ThrowOnError requires exactly one expected response, not {}",
                self.name, self.expected_count
            )));
        }
        let write_body = self
            .write_body
            .ok_or_else(|| EwsError::validation(format!("{}: no body writer", self.name)))?;
        let parse_message = self
            .parse_message
            .ok_or_else(|| EwsError::validation(format!("{}: no message reader", self.name)))?;

        let response_message_name = self
            .response_message_name
            .unwrap_or_else(|| format!("{}ResponseMessage", self.name));
        let response_name = self
            .response_name
            .unwrap_or_else(|| format!("{}Response", self.name));

        Ok(Operation {
            spec: OperationSpec {
                name: self.name,
                response_name,
                minimum_version: self.minimum_version,
                validate: self.validate,
                write_body,
            },
            response_message_name,
            expected_count: self.expected_count,
            error_mode: self.error_mode,
            parse_message,
        })
    }
}

/// An operation whose response body is a single payload element rather
/// than a list of response messages.
pub struct SingleOperation<T> {
    spec: OperationSpec,
    parse_response: ParseResponseFn<T>,
}

impl<T> Clone for SingleOperation<T> {
    fn clone(&self) -> Self {
        Self {
            spec: self.spec.clone(),
            parse_response: Arc::clone(&self.parse_response),
        }
    }
}

impl<T> fmt::Debug for SingleOperation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleOperation")
            .field("spec", &self.spec)
            .finish_non_exhaustive()
    }
}

impl<T> SingleOperation<T> {
    /// Creates a single-payload operation.
    ///
    /// `parse_response` runs with the reader inside the response element.
    pub fn new<P>(spec: OperationSpec, parse_response: P) -> Self
    where
        P: Fn(&mut XmlReader) -> EwsResult<T> + Send + Sync + 'static,
    {
        Self {
            spec,
            parse_response: Arc::new(parse_response),
        }
    }

    /// The shared parts.
    pub const fn spec(&self) -> &OperationSpec {
        &self.spec
    }

    /// Reads the payload.
    pub fn parse_response(&self, reader: &mut XmlReader) -> EwsResult<T> {
        (self.parse_response)(reader)
    }
}

impl OperationSpec {
    /// Sets the oldest version the operation exists in.
    #[must_use]
    pub fn with_minimum_version(mut self, version: ServerVersion) -> Self {
        self.minimum_version = version;
        self
    }

    /// Overrides the response element name.
    #[must_use]
    pub fn with_response_name(mut self, name: impl Into<String>) -> Self {
        self.response_name = name.into();
        self
    }

    /// Adds request validation.
    #[must_use]
    pub fn with_validation<F>(mut self, validate: F) -> Self
    where
        F: Fn(&ValidationContext) -> EwsResult<()> + Send + Sync + 'static,
    {
        self.validate = Some(Arc::new(validate));
        self
    }
}
