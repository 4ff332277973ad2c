//! Streaming XML writer with lazily emitted start tags.

use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use super::{XmlError, XmlNamespace, XmlValue};

/// Writes prefixed elements into an in-memory buffer.
///
/// A start tag is held back until the first child or text is written so that
/// attributes can still be added after [`write_start_element`]. An element
/// that receives no content is written as an empty element.
///
/// [`write_start_element`]: Self::write_start_element
pub struct XmlWriter {
    inner: Writer<Vec<u8>>,
    pending: Option<BytesStart<'static>>,
    open: Vec<String>,
}

impl std::fmt::Debug for XmlWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XmlWriter")
            .field("written", &self.inner.get_ref().len())
            .field("open", &self.open)
            .finish()
    }
}

impl Default for XmlWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl XmlWriter {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self {
            inner: Writer::new(Vec::new()),
            pending: None,
            open: Vec::new(),
        }
    }

    /// Writes the `<?xml version="1.0" encoding="utf-8"?>` declaration.
    pub fn write_declaration(&mut self) -> Result<(), XmlError> {
        self.inner
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
            .map_err(XmlError::write)
    }

    /// Opens an element. Attributes may be added until content is written.
    pub fn write_start_element(
        &mut self,
        namespace: XmlNamespace,
        local_name: &str,
    ) -> Result<(), XmlError> {
        self.flush_pending()?;
        let name = match namespace.prefix() {
            Some(prefix) => format!("{prefix}:{local_name}"),
            None => local_name.to_string(),
        };
        self.pending = Some(BytesStart::new(name.clone()));
        self.open.push(name);
        Ok(())
    }

    /// Adds an attribute to the element opened last.
    pub fn write_attribute(&mut self, name: &str, value: impl XmlValue) -> Result<(), XmlError> {
        let start = self
            .pending
            .as_mut()
            .ok_or(XmlError::InvalidWriterState("attribute written after content"))?;
        start.push_attribute((name, value.to_xml().as_str()));
        Ok(())
    }

    /// Declares `xmlns:prefix` bindings on the element opened last.
    pub fn write_namespace_declarations(
        &mut self,
        namespaces: &[XmlNamespace],
    ) -> Result<(), XmlError> {
        for namespace in namespaces {
            if let (Some(prefix), Some(uri)) = (namespace.prefix(), namespace.uri()) {
                self.write_attribute(&format!("xmlns:{prefix}"), uri.to_string())?;
            }
        }
        Ok(())
    }

    /// Writes escaped text content into the element opened last.
    pub fn write_value(&mut self, value: impl XmlValue) -> Result<(), XmlError> {
        self.flush_pending()?;
        let text = value.to_xml();
        self.inner
            .write_event(Event::Text(BytesText::new(&text)))
            .map_err(XmlError::write)
    }

    /// Closes the element opened last.
    pub fn write_end_element(&mut self) -> Result<(), XmlError> {
        let name = self
            .open
            .pop()
            .ok_or(XmlError::InvalidWriterState("end element without start"))?;
        let event = match self.pending.take() {
            Some(start) => Event::Empty(start),
            None => Event::End(BytesEnd::new(name)),
        };
        self.inner.write_event(event).map_err(XmlError::write)
    }

    /// Writes `<prefix:name>value</prefix:name>`.
    pub fn write_element_value(
        &mut self,
        namespace: XmlNamespace,
        local_name: &str,
        value: impl XmlValue,
    ) -> Result<(), XmlError> {
        self.write_start_element(namespace, local_name)?;
        self.write_value(value)?;
        self.write_end_element()
    }

    /// Number of elements opened and not yet closed.
    pub fn depth(&self) -> usize {
        self.open.len()
    }

    /// Returns the written bytes. Every opened element must have been closed.
    pub fn into_inner(mut self) -> Result<Vec<u8>, XmlError> {
        if !self.open.is_empty() {
            return Err(XmlError::InvalidWriterState("unclosed elements"));
        }
        self.flush_pending()?;
        Ok(self.inner.into_inner())
    }

    fn flush_pending(&mut self) -> Result<(), XmlError> {
        if let Some(start) = self.pending.take() {
            self.inner
                .write_event(Event::Start(start))
                .map_err(XmlError::write)?;
        }
        Ok(())
    }
}
