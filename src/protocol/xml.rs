//! In-memory SOAP element tree
//!
//! The wire (de)serializer lives outside this crate; everything signed or
//! referenced inside the envelope is modelled as a small element tree with a
//! deterministic exclusive-canonical serialization.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Exclusive XML canonicalization algorithm identifier
pub const EXC_C14N: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";

/// A node inside an element's content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
}

/// Element with qualified name, attributes and ordered children
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XmlElement {
    pub name: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub children: Vec<XmlNode>,
}

impl XmlElement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    /// Builder: add an attribute
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Builder: add a child element
    pub fn child(mut self, child: XmlElement) -> Self {
        self.children.push(XmlNode::Element(child));
        self
    }

    /// Builder: add a child element when present
    pub fn child_opt(self, child: Option<XmlElement>) -> Self {
        match child {
            Some(child) => self.child(child),
            None => self,
        }
    }

    /// Builder: append text content
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.children.push(XmlNode::Text(text.into()));
        self
    }

    /// Builder: element with a single text child
    pub fn with_text(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(name).text(text)
    }

    /// Value of the WS-Security style identifier attribute, if any
    ///
    /// Accepts `Id`, `id` and `ID`, bare or namespace-prefixed (`wsu:Id`).
    pub fn id_attribute(&self) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(name, _)| is_id_attribute(name))
            .map(|(_, value)| value.as_str())
    }

    /// Iterate direct child elements
    pub fn child_elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|node| match node {
            XmlNode::Element(element) => Some(element),
            XmlNode::Text(_) => None,
        })
    }

    /// Collect every element (depth first, self included) whose id attribute equals `id`
    pub fn find_all_by_id<'a>(&'a self, id: &str, found: &mut Vec<&'a XmlElement>) {
        if self.id_attribute() == Some(id) {
            found.push(self);
        }
        for child in self.child_elements() {
            child.find_all_by_id(id, found);
        }
    }

    /// Exclusive canonical form of this element and its subtree
    pub fn canonicalize(&self) -> Vec<u8> {
        let mut out = String::new();
        self.write_canonical(&mut out);
        out.into_bytes()
    }

    fn write_canonical(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        // BTreeMap iteration gives the lexicographic attribute order c14n requires
        for (name, value) in &self.attributes {
            out.push(' ');
            out.push_str(name);
            out.push_str("=\"");
            escape_attribute(value, out);
            out.push('"');
        }
        out.push('>');
        for child in &self.children {
            match child {
                XmlNode::Element(element) => element.write_canonical(out),
                XmlNode::Text(text) => escape_text(text, out),
            }
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }
}

fn is_id_attribute(name: &str) -> bool {
    let local = name.rsplit(':').next().unwrap_or(name);
    matches!(local, "Id" | "id" | "ID")
}

fn escape_text(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            other => out.push(other),
        }
    }
}

fn escape_attribute(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            other => out.push(other),
        }
    }
}
