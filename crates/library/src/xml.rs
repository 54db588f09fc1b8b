//! Minimal owned XML tree with a VirtualDJ-compatible writer.
//!
//! Reading goes through quick-xml's streaming reader. Writing is done by
//! hand so that the output matches what VirtualDJ itself produces:
//! double-quoted declaration, CRLF line endings and one-space indentation.

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

/// XML declaration written at the top of every saved document.
pub const DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>";

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Error raised while parsing an XML document.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct XmlError(String);

impl XmlError {
    fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// A child of an element.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
}

/// An XML element with ordered attributes and children.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Get an attribute value by name.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Set an attribute, replacing an existing value in place.
    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(key, _)| *key == name) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((name, value)),
        }
    }

    pub fn push_element(&mut self, child: Element) {
        self.children.push(Node::Element(child));
    }

    /// Iterate over child elements, skipping text.
    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(element) => Some(element),
            Node::Text(_) => None,
        })
    }

    /// Concatenated text content of this element's direct text children.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|node| match node {
                Node::Text(text) => Some(text.as_str()),
                Node::Element(_) => None,
            })
            .collect()
    }
}

fn element_from_start(start: &BytesStart<'_>) -> Result<Element, XmlError> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut element = Element::new(name);
    for attr in start.attributes() {
        let attr = attr.map_err(|e| XmlError::new(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| XmlError::new(e.to_string()))?;
        element.attributes.push((key, value.into_owned()));
    }
    Ok(element)
}

fn attach(
    stack: &mut [Element],
    root: &mut Option<Element>,
    element: Element,
) -> Result<(), XmlError> {
    if let Some(parent) = stack.last_mut() {
        parent.push_element(element);
        return Ok(());
    }
    if root.is_some() {
        return Err(XmlError::new(format!(
            "multiple root elements (found <{}>)",
            element.name
        )));
    }
    *root = Some(element);
    Ok(())
}

fn push_text(stack: &mut [Element], text: &str) -> Result<(), XmlError> {
    if text.trim().is_empty() {
        return Ok(());
    }
    match stack.last_mut() {
        Some(parent) => {
            parent
                .children
                .push(Node::Text(text.replace("\r\n", "\n").replace('\r', "\n")));
            Ok(())
        }
        None => Err(XmlError::new("text outside of root element")),
    }
}

/// Parse a complete document and return its root element.
///
/// Tolerates a UTF-8 BOM and CRLF line endings. Whitespace-only text is
/// dropped; comments, processing instructions and the declaration are
/// discarded.
pub fn parse(bytes: &[u8]) -> Result<Element, XmlError> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let mut reader = Reader::from_reader(bytes);
    let mut buf = Vec::new();
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        let event = match reader.read_event_into(&mut buf) {
            Ok(event) => event,
            Err(e) => {
                return Err(XmlError::new(format!(
                    "{} at byte {}",
                    e,
                    reader.buffer_position()
                )))
            }
        };
        match event {
            Event::Start(start) => stack.push(element_from_start(&start)?),
            Event::Empty(start) => {
                let element = element_from_start(&start)?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| XmlError::new("unexpected closing tag"))?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::Text(text) => {
                let value = text.unescape().map_err(|e| XmlError::new(e.to_string()))?;
                push_text(&mut stack, &value)?;
            }
            Event::CData(data) => {
                let value = String::from_utf8_lossy(&data.into_inner()).into_owned();
                push_text(&mut stack, &value)?;
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if let Some(open) = stack.last() {
        return Err(XmlError::new(format!(
            "unexpected end of document: <{}> is not closed",
            open.name
        )));
    }
    root.ok_or_else(|| XmlError::new("document has no root element"))
}

fn escape_attribute(value: &str) -> String {
    escape(value)
        .replace('\n', "&#10;")
        .replace('\r', "&#13;")
        .replace('\t', "&#9;")
}

fn escape_text(value: &str) -> String {
    escape(value).replace('\n', "\r\n")
}

fn write_open_tag(out: &mut String, element: &Element) {
    out.push('<');
    out.push_str(&element.name);
    for (key, value) in &element.attributes {
        out.push(' ');
        out.push_str(key);
        out.push_str("=\"");
        out.push_str(&escape_attribute(value));
        out.push('"');
    }
}

/// Write an element and its children without any added whitespace.
fn write_inline(out: &mut String, element: &Element) {
    write_open_tag(out, element);
    if element.children.is_empty() {
        out.push_str(" />");
        return;
    }
    out.push('>');
    for child in &element.children {
        match child {
            Node::Element(inner) => write_inline(out, inner),
            Node::Text(text) => out.push_str(&escape_text(text)),
        }
    }
    out.push_str("</");
    out.push_str(&element.name);
    out.push('>');
}

fn write_element(out: &mut String, element: &Element, depth: usize) {
    out.extend(std::iter::repeat(' ').take(depth));
    let has_text = element
        .children
        .iter()
        .any(|child| matches!(child, Node::Text(_)));
    if element.children.is_empty() || has_text {
        // Mixed content is kept on one line so re-reading yields the same text.
        write_inline(out, element);
        out.push_str("\r\n");
        return;
    }

    write_open_tag(out, element);
    out.push_str(">\r\n");
    for child in element.child_elements() {
        write_element(out, child, depth + 1);
    }
    out.extend(std::iter::repeat(' ').take(depth));
    out.push_str("</");
    out.push_str(&element.name);
    out.push_str(">\r\n");
}

/// Serialize a document with the declaration and CRLF line endings.
pub fn to_string(root: &Element) -> String {
    let mut out = String::with_capacity(4096);
    out.push_str(DECLARATION);
    out.push_str("\r\n");
    write_element(&mut out, root, 0);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_bom_and_crlf() {
        let doc = b"\xEF\xBB\xBF<?xml version=\"1.0\" encoding=\"UTF-8\"?>\r\n<Root A=\"1\">\r\n <Child B=\"x &amp; y\" />\r\n</Root>\r\n";
        let root = parse(doc).unwrap();
        assert_eq!(root.name, "Root");
        assert_eq!(root.attr("A"), Some("1"));
        let child = root.child_elements().next().unwrap();
        assert_eq!(child.attr("B"), Some("x & y"));
        assert_eq!(root.children.len(), 1);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(parse(b"<Root><Child></Root>").is_err());
        assert!(parse(b"<Root>").is_err());
        assert!(parse(b"").is_err());
        assert!(parse(b"<A /><B />").is_err());
    }

    #[test]
    fn test_writer_layout() {
        let mut root = Element::new("Root");
        root.set_attr("Version", "8");
        let mut child = Element::new("Child");
        child.set_attr("Name", "a \"quoted\" <name>");
        root.push_element(child);

        let out = to_string(&root);
        assert_eq!(
            out,
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\r\n<Root Version=\"8\">\r\n <Child Name=\"a &quot;quoted&quot; &lt;name&gt;\" />\r\n</Root>\r\n"
        );
    }

    #[test]
    fn test_multiline_attribute_survives() {
        let mut root = Element::new("Root");
        root.set_attr("Comment", "line one\nline two\ttabbed");
        let reparsed = parse(to_string(&root).as_bytes()).unwrap();
        assert_eq!(reparsed.attr("Comment"), Some("line one\nline two\ttabbed"));
    }

    #[test]
    fn test_text_content_round_trip() {
        let doc = b"<Root><Note>first\r\nsecond &lt;b&gt;</Note></Root>";
        let root = parse(doc).unwrap();
        let note = root.child_elements().next().unwrap();
        assert_eq!(note.text(), "first\nsecond <b>");

        let reparsed = parse(to_string(&root).as_bytes()).unwrap();
        assert_eq!(reparsed, root);
    }

    #[test]
    fn test_set_attr_replaces_in_place() {
        let mut element = Element::new("Tags");
        element.set_attr("Author", "A");
        element.set_attr("Title", "T");
        element.set_attr("Author", "B");
        assert_eq!(
            element.attributes,
            vec![
                ("Author".to_string(), "B".to_string()),
                ("Title".to_string(), "T".to_string())
            ]
        );
    }
}
