//! Minimal owned XML tree used by both input documents.
//!
//! The tree keeps element names and attribute keys exactly as written
//! (including namespace prefixes such as `xsi:type`) and preserves attribute
//! and child order. Text content is kept exactly as read; only the
//! whitespace-only runs between sibling elements are dropped, since the
//! writer re-indents the tree.

use std::io::Write;
use std::path::Path;

use std::borrow::Cow;

use quick_xml::escape::escape;
use quick_xml::events::attributes::Attribute;
use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::name::QName;
use quick_xml::{Reader, Writer};
use tracing::debug;

use crate::errors::ModelError;

/// A node inside an element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
    CData(String),
    Comment(String),
}

/// An element with its ordered attributes and children.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlElement {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
}

impl XmlElement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Builder-style attribute setter.
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attr(key, value);
        self
    }

    /// Name without its namespace prefix.
    pub fn local_name(&self) -> &str {
        local_part(&self.name)
    }

    /// Value of the attribute with exactly this key.
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn has_attr(&self, key: &str) -> bool {
        self.attributes.iter().any(|(k, _)| k == key)
    }

    /// Overwrite an attribute in place, or append it if absent.
    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((key, value)),
        }
    }

    /// Child elements in document order.
    pub fn elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|node| match node {
            XmlNode::Element(element) => Some(element),
            _ => None,
        })
    }

    /// Child elements whose local name matches.
    pub fn elements_named<'a, 'n>(
        &'a self,
        name: &'n str,
    ) -> impl Iterator<Item = &'a XmlElement> + 'n
    where
        'a: 'n,
    {
        self.elements().filter(move |e| e.local_name() == name)
    }

    pub fn push_element(&mut self, element: XmlElement) {
        self.children.push(XmlNode::Element(element));
    }

    /// Drop whitespace-only text between child elements. Leaf text is kept.
    fn strip_layout_whitespace(&mut self) {
        if !self.children.iter().any(|c| matches!(c, XmlNode::Element(_))) {
            return;
        }
        self.children
            .retain(|c| !matches!(c, XmlNode::Text(t) if t.trim().is_empty()));
    }
}

/// Strip a `prefix:` from a qualified name.
pub fn local_part(name: &str) -> &str {
    name.rsplit_once(':').map_or(name, |(_, local)| local)
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Read and parse an XML file into its root element.
pub fn load_file(path: &Path) -> Result<XmlElement, ModelError> {
    let contents = std::fs::read_to_string(path)?;
    debug!(path = %path.display(), bytes = contents.len(), "parsing XML document");
    parse_str(&contents)
}

/// Parse an XML string into its root element.
pub fn parse_str(xml: &str) -> Result<XmlElement, ModelError> {
    let mut reader = Reader::from_str(xml);

    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        let event = reader.read_event().map_err(|e| {
            ModelError::Xml(format!("at byte {}: {}", reader.buffer_position(), e))
        })?;
        match event {
            Event::Start(start) => stack.push(element_from_start(&start)?),
            Event::Empty(start) => {
                let element = element_from_start(&start)?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::End(_) => {
                let mut element = stack
                    .pop()
                    .ok_or_else(|| ModelError::Xml("unbalanced end tag".into()))?;
                element.strip_layout_whitespace();
                attach(&mut stack, &mut root, element)?;
            }
            Event::Text(text) => {
                if let Some(parent) = stack.last_mut() {
                    let value = text.unescape().map_err(xml_error)?;
                    parent.children.push(XmlNode::Text(value.into_owned()));
                }
            }
            Event::CData(cdata) => {
                if let Some(parent) = stack.last_mut() {
                    let value = String::from_utf8_lossy(&cdata).into_owned();
                    parent.children.push(XmlNode::CData(value));
                }
            }
            Event::Comment(comment) => {
                if let Some(parent) = stack.last_mut() {
                    let value = String::from_utf8_lossy(&comment).into_owned();
                    parent.children.push(XmlNode::Comment(value));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(ModelError::Xml(format!("unclosed element <{}>", open.name)));
    }
    root.ok_or(ModelError::EmptyDocument)
}

fn element_from_start(start: &BytesStart<'_>) -> Result<XmlElement, ModelError> {
    let name = std::str::from_utf8(start.name().as_ref())
        .map_err(xml_error)?
        .to_string();
    let mut element = XmlElement::new(name);
    for attr in start.attributes() {
        let attr = attr.map_err(xml_error)?;
        let key = std::str::from_utf8(attr.key.as_ref())
            .map_err(xml_error)?
            .to_string();
        let value = attr.unescape_value().map_err(xml_error)?.into_owned();
        element.attributes.push((key, value));
    }
    Ok(element)
}

fn attach(
    stack: &mut [XmlElement],
    root: &mut Option<XmlElement>,
    element: XmlElement,
) -> Result<(), ModelError> {
    match stack.last_mut() {
        Some(parent) => {
            parent.push_element(element);
            Ok(())
        }
        None if root.is_none() => {
            *root = Some(element);
            Ok(())
        }
        None => Err(ModelError::Xml(format!(
            "multiple root elements (second is <{}>)",
            element.name
        ))),
    }
}

fn xml_error<E: std::fmt::Display>(err: E) -> ModelError {
    ModelError::Xml(err.to_string())
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Serialize a root element, with an XML declaration and two-space indent.
pub fn to_string(root: &XmlElement) -> Result<String, ModelError> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(xml_error)?;
    write_element(&mut writer, root)?;

    let mut bytes = writer.into_inner();
    bytes.write_all(b"\n")?;
    String::from_utf8(bytes).map_err(xml_error)
}

fn write_element<W: Write>(writer: &mut Writer<W>, element: &XmlElement) -> Result<(), ModelError> {
    let mut start = BytesStart::new(element.name.as_str());
    for (key, value) in &element.attributes {
        start.push_attribute(Attribute {
            key: QName(key.as_bytes()),
            value: Cow::Owned(escape_attr_value(value).into_bytes()),
        });
    }

    if element.children.is_empty() {
        writer.write_event(Event::Empty(start)).map_err(xml_error)?;
        return Ok(());
    }

    writer.write_event(Event::Start(start)).map_err(xml_error)?;
    for child in &element.children {
        match child {
            XmlNode::Element(inner) => write_element(writer, inner)?,
            XmlNode::Text(text) => writer
                .write_event(Event::Text(BytesText::new(text)))
                .map_err(xml_error)?,
            XmlNode::CData(text) => writer
                .write_event(Event::CData(BytesCData::new(text.as_str())))
                .map_err(xml_error)?,
            XmlNode::Comment(text) => writer
                .write_event(Event::Comment(BytesText::from_escaped(text.as_str())))
                .map_err(xml_error)?,
        }
    }
    writer
        .write_event(Event::End(BytesEnd::new(element.name.as_str())))
        .map_err(xml_error)?;
    Ok(())
}

/// Escape an attribute value so that reading it back yields the same string.
///
/// Literal line breaks and tabs inside an attribute are normalized to spaces
/// by conforming readers, so they are written as character references.
fn escape_attr_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in escape(value).chars() {
        match c {
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            '\t' => out.push_str("&#x9;"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<archimate:model xmlns:archimate="http://www.archimatetool.com/archimate" name="Demo">
  <folder name="Business" id="f-1" type="business">
    <!-- kept -->
    <element xsi:type="archimate:BusinessActor" name="Clerk &amp; Co" id="e-1">
      <documentation>Front desk</documentation>
      <property key="Owner" value="Ops"/>
    </element>
  </folder>
</archimate:model>
"#;

    #[test]
    fn test_parse_keeps_prefixes_and_order() {
        let root = parse_str(SAMPLE).unwrap();
        assert_eq!(root.name, "archimate:model");
        assert_eq!(root.local_name(), "model");
        assert_eq!(root.attr("name"), Some("Demo"));

        let folder = root.elements_named("folder").next().unwrap();
        assert!(matches!(folder.children[0], XmlNode::Comment(ref c) if c.trim() == "kept"));

        let element = folder.elements_named("element").next().unwrap();
        assert_eq!(element.attr("xsi:type"), Some("archimate:BusinessActor"));
        assert_eq!(element.attr("name"), Some("Clerk & Co"));
        let doc = element.elements_named("documentation").next().unwrap();
        assert_eq!(doc.children, vec![XmlNode::Text("Front desk".into())]);
    }

    #[test]
    fn test_written_document_parses_back_identically() {
        let root = parse_str(SAMPLE).unwrap();
        let written = to_string(&root).unwrap();
        assert!(written.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(written.contains("Clerk &amp; Co"));
        assert_eq!(parse_str(&written).unwrap(), root);
    }

    #[test]
    fn test_found_element_outlives_lookup_name() {
        let root = parse_str(SAMPLE).unwrap();
        let folder = {
            let name = String::from("folder");
            let found = root.elements_named(&name).next().unwrap();
            found
        };
        assert_eq!(folder.attr("id"), Some("f-1"));
    }

    #[test]
    fn test_text_content_kept_verbatim() {
        let xml = "<model>\n  <element id=\"e-1\">\n    \
                   <documentation>  indented first line\nsecond line\n</documentation>\n  \
                   </element>\n</model>";
        let root = parse_str(xml).unwrap();
        let element = root.elements_named("element").next().unwrap();
        assert_eq!(element.children.len(), 1, "layout whitespace is dropped");
        let doc = element.elements_named("documentation").next().unwrap();
        let expected = "  indented first line\nsecond line\n";
        assert_eq!(doc.children, vec![XmlNode::Text(expected.into())]);

        let written = to_string(&root).unwrap();
        assert!(written.contains(
            "<documentation>  indented first line\nsecond line\n</documentation>"
        ));
        assert_eq!(parse_str(&written).unwrap(), root);
    }

    #[test]
    fn test_whitespace_only_leaf_text_is_kept() {
        let root = parse_str("<model><documentation>   </documentation></model>").unwrap();
        let doc = root.elements_named("documentation").next().unwrap();
        assert_eq!(doc.children, vec![XmlNode::Text("   ".into())]);
    }

    #[test]
    fn test_attribute_line_breaks_are_escaped() {
        let root =
            parse_str(r#"<property key="addr" value="line1&#xA;line2&#x9;x&#xD;"/>"#).unwrap();
        assert_eq!(root.attr("value"), Some("line1\nline2\tx\r"));

        let written = to_string(&root).unwrap();
        assert!(written.contains(r#"value="line1&#xA;line2&#x9;x&#xD;""#), "{written}");
        assert!(!written.contains("line1\nline2"));
        assert_eq!(parse_str(&written).unwrap().attr("value"), Some("line1\nline2\tx\r"));
    }

    #[test]
    fn test_attribute_markup_is_escaped() {
        let element = XmlElement::new("property").with_attr("value", r#"a<b & "c""#);
        let written = to_string(&element).unwrap();
        assert_eq!(
            parse_str(&written).unwrap().attr("value"),
            Some(r#"a<b & "c""#)
        );
    }

    #[test]
    fn test_set_attr_overwrites_in_place() {
        let mut element = XmlElement::new("element")
            .with_attr("id", "1")
            .with_attr("name", "a");
        element.set_attr("id", "2");
        element.set_attr("extra", "x");
        assert_eq!(
            element.attributes,
            vec![
                ("id".to_string(), "2".to_string()),
                ("name".to_string(), "a".to_string()),
                ("extra".to_string(), "x".to_string()),
            ]
        );
    }

    #[test]
    fn test_malformed_documents_are_rejected() {
        assert!(matches!(parse_str("<a><b></a>"), Err(ModelError::Xml(_))));
        assert!(matches!(parse_str("<a>"), Err(ModelError::Xml(_))));
        assert!(matches!(parse_str(""), Err(ModelError::EmptyDocument)));
        assert!(matches!(parse_str("<a/><b/>"), Err(ModelError::Xml(_))));
    }
}
