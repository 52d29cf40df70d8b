//! Owned XML element tree used for every NETCONF message.
//!
//! Documents are parsed with `quick-xml` into [`XmlElement`] values that own
//! their data, so a parsed message outlives the frame buffer it came from.
//! Element names are stored exactly as written (including any prefix);
//! lookups go through the local name so prefixed and default-namespace
//! documents are handled the same way.

use std::fmt::Write as _;

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::{NetconfError, Result};

/// Deepest element nesting accepted by [`XmlElement::parse`].
///
/// Serialization, cloning and dropping recurse per level, so deeper input
/// is rejected while parsing.
pub const MAX_DEPTH: usize = 1024;

/// A child of an element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    /// Nested element
    Element(XmlElement),
    /// Character data (already unescaped)
    Text(String),
}

/// An XML element with its attributes and children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlElement {
    /// Qualified name as written, e.g. `nc:rpc` or `rpc`
    pub name: String,
    /// Attributes in document order, values unescaped
    pub attributes: Vec<(String, String)>,
    /// Child nodes in document order
    pub children: Vec<XmlNode>,
}

impl XmlElement {
    /// Create an empty element.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Add an attribute.
    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((name.into(), value.into()));
        self
    }

    /// Add a child element.
    pub fn with_child(mut self, child: XmlElement) -> Self {
        self.children.push(XmlNode::Element(child));
        self
    }

    /// Add several child elements.
    pub fn with_children(mut self, children: impl IntoIterator<Item = XmlElement>) -> Self {
        self.children
            .extend(children.into_iter().map(XmlNode::Element));
        self
    }

    /// Add a text node.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(XmlNode::Text(text.into()));
        self
    }

    /// Name without namespace prefix.
    pub fn local_name(&self) -> &str {
        local(&self.name)
    }

    /// Look up an attribute by local name.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| local(key) == name && !key.starts_with("xmlns"))
            .map(|(_, value)| value.as_str())
    }

    /// Iterate over child elements, skipping text.
    pub fn elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|node| match node {
            XmlNode::Element(el) => Some(el),
            XmlNode::Text(_) => None,
        })
    }

    /// First child element with the given local name.
    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.elements().find(|el| el.local_name() == name)
    }

    /// All child elements with the given local name.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.elements().filter(move |el| el.local_name() == name)
    }

    /// First child element, if any.
    pub fn first_element(&self) -> Option<&XmlElement> {
        self.elements().next()
    }

    /// Concatenated, trimmed text content of this element.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for node in &self.children {
            if let XmlNode::Text(t) = node {
                out.push_str(t);
            }
        }
        out.trim().to_string()
    }

    /// Text content of a child element.
    pub fn child_text(&self, name: &str) -> Option<String> {
        self.child(name).map(XmlElement::text)
    }

    /// Parse a complete document into its root element.
    pub fn parse(input: &str) -> Result<Self> {
        let mut reader = Reader::from_str(input);
        reader.trim_text(true);

        let mut stack: Vec<XmlElement> = Vec::new();
        let mut root: Option<XmlElement> = None;

        loop {
            match reader.read_event()? {
                Event::Start(start) => {
                    check_depth(&stack)?;
                    stack.push(element_from_start(&start)?);
                },
                Event::Empty(start) => {
                    check_depth(&stack)?;
                    let el = element_from_start(&start)?;
                    attach(&mut stack, &mut root, el)?;
                },
                Event::End(_) => {
                    let el = stack
                        .pop()
                        .ok_or_else(|| NetconfError::Xml("unbalanced end tag".to_string()))?;
                    attach(&mut stack, &mut root, el)?;
                },
                Event::Text(text) => {
                    let text = text.unescape()?.into_owned();
                    push_text(&mut stack, text)?;
                },
                Event::CData(data) => {
                    let text = String::from_utf8(data.into_inner().into_owned())
                        .map_err(|e| NetconfError::Xml(e.to_string()))?;
                    push_text(&mut stack, text)?;
                },
                Event::Eof => break,
                // Declarations, comments, processing instructions, doctype
                _ => {},
            }
        }

        if !stack.is_empty() {
            return Err(NetconfError::Xml("unexpected end of document".to_string()));
        }
        root.ok_or_else(|| NetconfError::Xml("document has no root element".to_string()))
    }

    /// Parse a fragment that may hold several sibling elements.
    pub fn parse_fragment(input: &str) -> Result<Vec<XmlElement>> {
        let wrapped = format!("<fragment>{input}</fragment>");
        let root = Self::parse(&wrapped)?;
        Ok(root.elements().cloned().collect())
    }

    /// Serialize to a string without XML declaration.
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write_to(&mut out);
        out
    }

    fn write_to(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        for (key, value) in &self.attributes {
            let _ = write!(out, " {}=\"{}\"", key, escape(value.as_str()));
        }
        if self.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        for node in &self.children {
            match node {
                XmlNode::Element(el) => el.write_to(out),
                XmlNode::Text(t) => out.push_str(&escape(t.as_str())),
            }
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }
}

fn check_depth(stack: &[XmlElement]) -> Result<()> {
    if stack.len() >= MAX_DEPTH {
        return Err(NetconfError::Xml(format!(
            "element nesting exceeds {MAX_DEPTH} levels"
        )));
    }
    Ok(())
}

fn local(name: &str) -> &str {
    name.rsplit_once(':').map_or(name, |(_, local)| local)
}

fn element_from_start(start: &BytesStart<'_>) -> Result<XmlElement> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut el = XmlElement::new(name);
    for attr in start.attributes() {
        let attr = attr.map_err(|e| NetconfError::Xml(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        el.attributes.push((key, value));
    }
    Ok(el)
}

fn attach(stack: &mut [XmlElement], root: &mut Option<XmlElement>, el: XmlElement) -> Result<()> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(XmlNode::Element(el));
        return Ok(());
    }
    if root.is_some() {
        return Err(NetconfError::Xml("multiple root elements".to_string()));
    }
    *root = Some(el);
    Ok(())
}

fn push_text(stack: &mut [XmlElement], text: String) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(XmlNode::Text(text));
            Ok(())
        },
        None if text.trim().is_empty() => Ok(()),
        None => Err(NetconfError::Xml("text outside of root element".to_string())),
    }
}
