//! Pull cursor over one framed XML document.

use std::fmt;

use quick_xml::escape::escape;

use super::{XmlError, XmlNamespace, XmlValue};

/// An attribute of a start element. Namespace bindings are not kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlAttribute {
    /// The attribute's local name.
    pub local_name: String,
    /// The unescaped value.
    pub value: String,
}

/// A start element with its resolved namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlElement {
    /// The resolved namespace.
    pub namespace: XmlNamespace,
    /// The local name.
    pub local_name: String,
    /// Attributes in document order.
    pub attributes: Vec<XmlAttribute>,
}

impl XmlElement {
    /// Returns `true` if this element has the given namespace and local name.
    pub fn is(&self, namespace: XmlNamespace, local_name: &str) -> bool {
        self.namespace == namespace && self.local_name == local_name
    }

    /// Looks up an attribute by local name.
    pub fn attribute(&self, local_name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|attr| attr.local_name == local_name)
            .map(|attr| attr.value.as_str())
    }
}

impl fmt::Display for XmlElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.namespace.prefix() {
            Some(prefix) => write!(f, "<{prefix}:{}>", self.local_name),
            None => write!(f, "<{}>", self.local_name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum XmlNode {
    Start(XmlElement),
    End,
    Text(String),
}

/// A pull cursor over the nodes of one document.
///
/// The cursor tracks the stack of elements it has entered, so attribute
/// lookups and value reads always refer to the innermost open element, and
/// end tags are checked against the element they close.
#[derive(Debug, Clone)]
pub struct XmlReader {
    nodes: Vec<XmlNode>,
    position: usize,
    open: Vec<usize>,
}

impl XmlReader {
    pub(crate) fn from_nodes(nodes: Vec<XmlNode>) -> Self {
        Self {
            nodes,
            position: 0,
            open: Vec::new(),
        }
    }

    /// Frames a complete in-memory document.
    pub fn parse(bytes: &[u8]) -> Result<Self, XmlError> {
        super::document::parse_document(bytes)
    }

    /// Returns `true` while unread nodes remain.
    pub fn has_more(&self) -> bool {
        self.position < self.nodes.len()
    }

    /// Number of elements entered and not yet left.
    pub fn depth(&self) -> usize {
        self.open.len()
    }

    /// The next start element, if the cursor is positioned on one.
    pub fn peek_element(&self) -> Option<&XmlElement> {
        match self.nodes.get(self.position) {
            Some(XmlNode::Start(element)) => Some(element),
            _ => None,
        }
    }

    /// The innermost element entered and not yet left.
    pub fn current_element(&self) -> Option<&XmlElement> {
        self.open.last().and_then(|&index| match &self.nodes[index] {
            XmlNode::Start(element) => Some(element),
            _ => None,
        })
    }

    /// Returns `true` if the next node starts the named element.
    pub fn is_start_element(&self, namespace: XmlNamespace, local_name: &str) -> bool {
        self.peek_element()
            .is_some_and(|element| element.is(namespace, local_name))
    }

    /// Returns `true` if the next node closes the named element.
    pub fn is_end_element(&self, namespace: XmlNamespace, local_name: &str) -> bool {
        matches!(self.nodes.get(self.position), Some(XmlNode::End))
            && self
                .current_element()
                .is_some_and(|element| element.is(namespace, local_name))
    }

    /// Returns `true` if the next node closes the current element (or the
    /// document is exhausted).
    pub fn at_end_of_element(&self) -> bool {
        matches!(self.nodes.get(self.position), Some(XmlNode::End) | None)
    }

    /// Enters the named element.
    pub fn read_start_element(
        &mut self,
        namespace: XmlNamespace,
        local_name: &str,
    ) -> Result<(), XmlError> {
        self.skip_whitespace_text();
        if !self.is_start_element(namespace, local_name) {
            return Err(self.unexpected(format!("<{local_name}> in {namespace}")));
        }
        self.advance();
        Ok(())
    }

    /// Enters whatever element is next and returns a copy of it.
    pub fn read_any_start_element(&mut self) -> Result<XmlElement, XmlError> {
        self.skip_whitespace_text();
        let element = self
            .peek_element()
            .cloned()
            .ok_or_else(|| self.unexpected("a start element".to_string()))?;
        self.advance();
        Ok(element)
    }

    /// Leaves the named element. Its end tag must be next.
    pub fn read_end_element(
        &mut self,
        namespace: XmlNamespace,
        local_name: &str,
    ) -> Result<(), XmlError> {
        self.skip_whitespace_text();
        if !self.is_end_element(namespace, local_name) {
            return Err(self.unexpected(format!("</{local_name}>")));
        }
        self.advance();
        Ok(())
    }

    /// Leaves the current element, whatever it is. Its end tag must be next.
    pub fn read_current_end(&mut self) -> Result<(), XmlError> {
        self.skip_whitespace_text();
        if !matches!(self.nodes.get(self.position), Some(XmlNode::End)) {
            return Err(self.unexpected("an end tag".to_string()));
        }
        self.advance();
        Ok(())
    }

    /// Reads the text of the current element and leaves it.
    ///
    /// An element with no text yields an empty string before conversion.
    pub fn read_value<T: XmlValue>(&mut self) -> Result<T, XmlError> {
        let name = self
            .current_element()
            .map(|element| element.local_name.clone())
            .unwrap_or_default();
        let mut text = String::new();
        loop {
            match self.nodes.get(self.position) {
                Some(XmlNode::Text(chunk)) => {
                    text.push_str(chunk);
                    self.position += 1;
                }
                Some(XmlNode::End) => {
                    self.advance();
                    break;
                }
                Some(XmlNode::Start(_)) => {
                    return Err(self.unexpected(format!("text content of <{name}>")));
                }
                None => return Err(XmlError::UnexpectedEof),
            }
        }
        T::parse_xml(&text).map_err(|reason| XmlError::InvalidValue {
            name,
            value: text,
            reason,
        })
    }

    /// Reads `<name>value</name>`.
    pub fn read_element_value<T: XmlValue>(
        &mut self,
        namespace: XmlNamespace,
        local_name: &str,
    ) -> Result<T, XmlError> {
        self.read_start_element(namespace, local_name)?;
        self.read_value()
    }

    /// Reads `<name>value</name>` if the named element is next.
    pub fn read_optional_element_value<T: XmlValue>(
        &mut self,
        namespace: XmlNamespace,
        local_name: &str,
    ) -> Result<Option<T>, XmlError> {
        self.skip_whitespace_text();
        if self.is_start_element(namespace, local_name) {
            self.read_element_value(namespace, local_name).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Reads a required attribute of the current element.
    pub fn read_attribute<T: XmlValue>(&self, local_name: &str) -> Result<T, XmlError> {
        self.read_optional_attribute(local_name)?
            .ok_or_else(|| XmlError::MissingAttribute {
                element: self
                    .current_element()
                    .map(|element| element.local_name.clone())
                    .unwrap_or_default(),
                attribute: local_name.to_string(),
            })
    }

    /// Reads an optional attribute of the current element.
    pub fn read_optional_attribute<T: XmlValue>(
        &self,
        local_name: &str,
    ) -> Result<Option<T>, XmlError> {
        let Some(raw) = self
            .current_element()
            .and_then(|element| element.attribute(local_name))
        else {
            return Ok(None);
        };
        T::parse_xml(raw)
            .map(Some)
            .map_err(|reason| XmlError::InvalidValue {
                name: local_name.to_string(),
                value: raw.to_string(),
                reason,
            })
    }

    /// Skips the rest of the current element, including its end tag.
    pub fn skip_current_element(&mut self) -> Result<(), XmlError> {
        let target = self.open.len();
        if target == 0 {
            return Err(self.unexpected("an open element".to_string()));
        }
        while self.open.len() >= target {
            if !self.has_more() {
                return Err(XmlError::UnexpectedEof);
            }
            self.advance();
        }
        Ok(())
    }

    /// Skips the next element entirely.
    pub fn skip_element(&mut self) -> Result<(), XmlError> {
        self.read_any_start_element()?;
        self.skip_current_element()
    }

    /// Skips any children of the current element that have not been read,
    /// stopping before its end tag.
    pub fn skip_to_end_of_element(&mut self) -> Result<(), XmlError> {
        while !self.at_end_of_element() {
            match self.nodes.get(self.position) {
                Some(XmlNode::Start(_)) => self.skip_element()?,
                _ => self.position += 1,
            }
        }
        if self.has_more() {
            Ok(())
        } else {
            Err(XmlError::UnexpectedEof)
        }
    }

    /// Moves forward inside the current element until the named descendant
    /// starts, and enters it.
    ///
    /// Returns `false`, positioned on the current element's end tag, when no
    /// such descendant exists.
    pub fn read_to_descendant(
        &mut self,
        namespace: XmlNamespace,
        local_name: &str,
    ) -> Result<bool, XmlError> {
        let base = self.open.len();
        loop {
            match self.nodes.get(self.position) {
                Some(XmlNode::Start(element)) if element.is(namespace, local_name) => {
                    self.advance();
                    return Ok(true);
                }
                Some(XmlNode::End) if self.open.len() == base => return Ok(false),
                Some(_) => self.advance(),
                None => return Err(XmlError::UnexpectedEof),
            }
        }
    }

    /// Reconstructs the markup inside the current element and leaves it.
    ///
    /// Prefixes are normalized to the codec's own; unknown namespaces are
    /// written unprefixed.
    pub fn read_inner_xml(&mut self) -> Result<String, XmlError> {
        let target = self.open.len();
        let mut out = String::new();
        loop {
            match self.nodes.get(self.position) {
                Some(XmlNode::End) if self.open.len() == target => {
                    self.advance();
                    return Ok(out);
                }
                Some(XmlNode::End) => {
                    if let Some(element) = self.current_element() {
                        out.push_str("</");
                        push_qualified(&mut out, element);
                        out.push('>');
                    }
                    self.advance();
                }
                Some(XmlNode::Start(element)) => {
                    out.push('<');
                    push_qualified(&mut out, element);
                    for attr in &element.attributes {
                        out.push(' ');
                        out.push_str(&attr.local_name);
                        out.push_str("=\"");
                        out.push_str(&escape(attr.value.as_str()));
                        out.push('"');
                    }
                    out.push('>');
                    self.advance();
                }
                Some(XmlNode::Text(text)) => {
                    out.push_str(&escape(text.as_str()));
                    self.position += 1;
                }
                None => return Err(XmlError::UnexpectedEof),
            }
        }
    }

    fn advance(&mut self) {
        match self.nodes.get(self.position) {
            Some(XmlNode::Start(_)) => self.open.push(self.position),
            Some(XmlNode::End) => {
                self.open.pop();
            }
            _ => {}
        }
        self.position += 1;
    }

    fn skip_whitespace_text(&mut self) {
        while let Some(XmlNode::Text(text)) = self.nodes.get(self.position) {
            if !text.trim().is_empty() {
                break;
            }
            self.position += 1;
        }
    }

    fn unexpected(&self, expected: String) -> XmlError {
        let found = match self.nodes.get(self.position) {
            Some(XmlNode::Start(element)) => element.to_string(),
            Some(XmlNode::End) => match self.current_element() {
                Some(element) => format!("end of {element}"),
                None => "an end tag".to_string(),
            },
            Some(XmlNode::Text(text)) => format!("text {:?}", truncate(text)),
            None => "end of document".to_string(),
        };
        XmlError::Unexpected { expected, found }
    }
}

fn push_qualified(out: &mut String, element: &XmlElement) {
    if let Some(prefix) = element.namespace.prefix() {
        out.push_str(prefix);
        out.push(':');
    }
    out.push_str(&element.local_name);
}

fn truncate(text: &str) -> &str {
    match text.char_indices().nth(40) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}
