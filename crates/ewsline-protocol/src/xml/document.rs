//! Framing of top-level XML documents out of a byte stream.

use quick_xml::NsReader;
use quick_xml::events::{BytesStart, Event};
use tokio::io::AsyncBufRead;

use super::reader::{XmlAttribute, XmlElement, XmlNode, XmlReader};
use super::{XmlError, XmlNamespace};

enum Step {
    Continue,
    Complete,
    EndOfInput,
}

/// Accumulates the nodes of one top-level element.
#[derive(Default)]
struct DocumentBuilder {
    nodes: Vec<XmlNode>,
    depth: usize,
}

impl DocumentBuilder {
    fn accept(&mut self, namespace: XmlNamespace, event: Event<'_>) -> Result<Step, XmlError> {
        match event {
            Event::Start(start) => {
                self.nodes.push(XmlNode::Start(element(namespace, &start)?));
                self.depth += 1;
            }
            Event::Empty(start) => {
                self.nodes.push(XmlNode::Start(element(namespace, &start)?));
                self.nodes.push(XmlNode::End);
                if self.depth == 0 {
                    return Ok(Step::Complete);
                }
            }
            Event::End(_) => {
                self.nodes.push(XmlNode::End);
                self.depth = self.depth.saturating_sub(1);
                if self.depth == 0 {
                    return Ok(Step::Complete);
                }
            }
            Event::Text(text) if self.depth > 0 => {
                let text = text.unescape().map_err(XmlError::syntax)?;
                if !text.trim().is_empty() {
                    self.nodes.push(XmlNode::Text(text.into_owned()));
                }
            }
            Event::CData(data) if self.depth > 0 => {
                let text = String::from_utf8(data.into_inner().into_owned())
                    .map_err(XmlError::syntax)?;
                self.nodes.push(XmlNode::Text(text));
            }
            Event::Text(text) => {
                let text = text.unescape().map_err(XmlError::syntax)?;
                if !text.trim().is_empty() {
                    return Err(XmlError::syntax(format!(
                        "text outside of a document: {:?}",
                        text.trim()
                    )));
                }
            }
            Event::CData(_) => {
                return Err(XmlError::syntax("CDATA outside of a document"));
            }
            Event::Eof => {
                return if self.depth == 0 && self.nodes.is_empty() {
                    Ok(Step::EndOfInput)
                } else {
                    Err(XmlError::UnexpectedEof)
                };
            }
            // Declarations, comments, processing instructions and
            // inter-document whitespace carry nothing.
            _ => {}
        }
        Ok(Step::Continue)
    }

    fn finish(self) -> XmlReader {
        XmlReader::from_nodes(self.nodes)
    }
}

fn element(namespace: XmlNamespace, start: &BytesStart<'_>) -> Result<XmlElement, XmlError> {
    let local_name = std::str::from_utf8(start.local_name().as_ref())
        .map_err(XmlError::syntax)?
        .to_string();
    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(XmlError::syntax)?;
        if attr.key.as_ref().starts_with(b"xmlns") {
            continue;
        }
        let name = std::str::from_utf8(attr.key.local_name().as_ref())
            .map_err(XmlError::syntax)?
            .to_string();
        let value = attr.unescape_value().map_err(XmlError::syntax)?.into_owned();
        attributes.push(XmlAttribute {
            local_name: name,
            value,
        });
    }
    Ok(XmlElement {
        namespace,
        local_name,
        attributes,
    })
}

/// Parses one complete in-memory document.
pub(crate) fn parse_document(bytes: &[u8]) -> Result<XmlReader, XmlError> {
    let mut reader = NsReader::from_reader(bytes);
    let mut buf = Vec::new();
    let mut builder = DocumentBuilder::default();
    loop {
        buf.clear();
        let (resolved, event) = reader
            .read_resolved_event_into(&mut buf)
            .map_err(XmlError::syntax)?;
        let namespace = XmlNamespace::from_resolved(&resolved);
        match builder.accept(namespace, event)? {
            Step::Continue => {}
            Step::Complete => return Ok(builder.finish()),
            Step::EndOfInput => return Err(XmlError::UnexpectedEof),
        }
    }
}

/// Reads consecutive top-level documents from an async byte source.
///
/// A buffered response body holds one document; a streamed notification body
/// holds one document per server push. Both go through the same framing so
/// that a single decoder serves both.
///
/// ```
/// use ewsline_protocol::xml::XmlDocumentReader;
///
/// # tokio_test::block_on(async {
/// let body: &[u8] = b"<ping xmlns=\"urn:a\"/>\n<ping xmlns=\"urn:a\"/>";
/// let mut documents = XmlDocumentReader::new(body);
/// let mut count = 0;
/// while documents.next_document().await.unwrap().is_some() {
///     count += 1;
/// }
/// assert_eq!(count, 2);
/// # })
/// ```
pub struct XmlDocumentReader<R> {
    reader: NsReader<R>,
    buf: Vec<u8>,
    max_document_size: Option<usize>,
}

impl<R> std::fmt::Debug for XmlDocumentReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XmlDocumentReader")
            .field("max_document_size", &self.max_document_size)
            .finish()
    }
}

impl<R: AsyncBufRead + Unpin> XmlDocumentReader<R> {
    /// Wraps a byte source.
    pub fn new(source: R) -> Self {
        Self {
            reader: NsReader::from_reader(source),
            buf: Vec::new(),
            max_document_size: None,
        }
    }

    /// Bounds the size of any single document.
    #[must_use]
    pub fn with_max_document_size(mut self, max: Option<usize>) -> Self {
        self.max_document_size = max;
        self
    }

    /// Reads the next document.
    ///
    /// Returns `Ok(None)` when the source ends cleanly between documents and
    /// an error when it ends inside one.
    pub async fn next_document(&mut self) -> Result<Option<XmlReader>, XmlError> {
        let mut builder = DocumentBuilder::default();
        let start = self.reader.buffer_position() as u64;
        loop {
            self.buf.clear();
            let (resolved, event) = self
                .reader
                .read_resolved_event_into_async(&mut self.buf)
                .await
                .map_err(XmlError::syntax)?;
            let namespace = XmlNamespace::from_resolved(&resolved);

            let consumed = (self.reader.buffer_position() as u64).saturating_sub(start);
            if let Some(max) = self.max_document_size
                && consumed > max as u64
            {
                return Err(XmlError::DocumentTooLarge { max });
            }

            match builder.accept(namespace, event)? {
                Step::Continue => {}
                Step::Complete => return Ok(Some(builder.finish())),
                Step::EndOfInput => return Ok(None),
            }
        }
    }
}
