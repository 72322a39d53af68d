//! Request-body XML for LOCK and PROPPATCH.
//!
//! Bodies are parsed into a small element tree and then folded into an
//! `XmlValue` mapping. This covers the control payloads DAV clients send
//! (nested elements, self-closing elements, flat text) and nothing more:
//! mixed content keeps only its elements, repeated siblings keep the last one.
//! Callers that need every repeat walk the tree with `Element::elements`.

use quick_xml::{Reader, events::BytesStart, events::Event, events::attributes::AttrError};
use thiserror::Error;

pub const DAV_NAMESPACE: &str = "DAV:";

#[derive(Debug, Error)]
pub enum XmlError {
    #[error("malformed XML: {0}")]
    Syntax(#[from] quick_xml::Error),
    #[error("malformed XML attribute: {0}")]
    Attribute(#[from] AttrError),
    #[error("empty XML document")]
    Empty,
    #[error("unbalanced XML elements")]
    Unbalanced,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
}

/// One element: its qualified name, attributes in document order and children.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
}

/// An `xmlns:prefix="uri"` declaration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Namespace {
    pub prefix: String,
    pub uri: String,
}

/// How element names are reported by `to_mapping`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NamespaceMode {
    /// Drop every prefix: `<D:owner>` and `<owner>` both read as `owner`.
    LocalNames,
    /// Drop only the prefix bound to `DAV:`; other prefixes stay, so client
    /// property names like `Z:Win32FileAttributes` survive.
    StripDav,
}

/// Folded form of an element's content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum XmlValue {
    /// Self-closing or empty element.
    Null,
    /// Text content, or the name of a lone self-closing child
    /// (`<locktype><write/></locktype>` folds to `"write"`).
    Text(String),
    /// Child elements keyed by name, in document order.
    Map(Vec<(String, XmlValue)>),
}

impl XmlValue {
    /// Child value by name; `None` unless this is a map holding `name`.
    pub fn get(&self, name: &str) -> Option<&XmlValue> {
        match self {
            XmlValue::Map(entries) => entries
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            XmlValue::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl Element {
    /// Parse a complete document and return its root element.
    pub fn parse(xml: &str) -> Result<Element, XmlError> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            match reader.read_event()? {
                Event::Start(start) => stack.push(Element::from_start(&start)?),
                Event::Empty(start) => {
                    let element = Element::from_start(&start)?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::End(_) => {
                    let element = stack.pop().ok_or(XmlError::Unbalanced)?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::Text(text) => {
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(Node::Text(text.unescape()?.into_owned()));
                    }
                }
                Event::CData(data) => {
                    if let Some(parent) = stack.last_mut() {
                        let text = String::from_utf8_lossy(&data.into_inner()).into_owned();
                        parent.children.push(Node::Text(text));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(XmlError::Unbalanced);
        }
        root.ok_or(XmlError::Empty)
    }

    fn from_start(start: &BytesStart<'_>) -> Result<Element, XmlError> {
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr.unescape_value()?.into_owned();
            attributes.push((key, value));
        }
        Ok(Element {
            name,
            attributes,
            children: Vec::new(),
        })
    }

    /// Child elements in document order, repeats included.
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|child| match child {
            Node::Element(element) => Some(element),
            Node::Text(_) => None,
        })
    }

    /// This element's name as `mode` reports it. `dav_prefix` is the prefix
    /// the document root binds to `DAV:`.
    pub fn name_in(&self, mode: NamespaceMode, dav_prefix: Option<&str>) -> &str {
        reported_name(&self.name, mode, dav_prefix)
    }

    /// Prefixed namespaces declared on this element only (not its children).
    pub fn declared_namespaces(&self) -> Vec<Namespace> {
        self.attributes
            .iter()
            .filter_map(|(key, uri)| {
                key.strip_prefix("xmlns:").map(|prefix| Namespace {
                    prefix: prefix.to_string(),
                    uri: uri.clone(),
                })
            })
            .collect()
    }

    /// The prefix this element binds to `DAV:`, if any.
    pub fn dav_prefix(&self) -> Option<String> {
        self.declared_namespaces()
            .into_iter()
            .find(|ns| ns.uri == DAV_NAMESPACE)
            .map(|ns| ns.prefix)
    }

    /// Fold this element into `{name: value}`.
    pub fn to_mapping(&self, mode: NamespaceMode) -> XmlValue {
        let dav_prefix = match mode {
            NamespaceMode::StripDav => self.dav_prefix(),
            NamespaceMode::LocalNames => None,
        };
        let names = Names { mode, dav_prefix };
        XmlValue::Map(vec![(names.of(&self.name), self.fold(&names))])
    }

    fn fold(&self, names: &Names) -> XmlValue {
        let mut entries: Vec<(String, XmlValue)> = Vec::new();
        let mut text = String::new();
        for child in &self.children {
            match child {
                Node::Element(element) => {
                    let name = names.of(&element.name);
                    let value = element.fold(names);
                    match entries.iter_mut().find(|(key, _)| *key == name) {
                        Some(entry) => entry.1 = value,
                        None => entries.push((name, value)),
                    }
                }
                Node::Text(chunk) => text.push_str(chunk),
            }
        }

        if entries.is_empty() {
            let text = text.trim();
            return if text.is_empty() {
                XmlValue::Null
            } else {
                XmlValue::Text(text.to_string())
            };
        }
        if let [(name, XmlValue::Null)] = entries.as_slice() {
            return XmlValue::Text(name.clone());
        }
        XmlValue::Map(entries)
    }
}

struct Names {
    mode: NamespaceMode,
    dav_prefix: Option<String>,
}

impl Names {
    fn of(&self, qualified: &str) -> String {
        reported_name(qualified, self.mode, self.dav_prefix.as_deref()).to_string()
    }
}

fn reported_name<'a>(qualified: &'a str, mode: NamespaceMode, dav_prefix: Option<&str>) -> &'a str {
    match mode {
        NamespaceMode::LocalNames => qualified
            .rsplit_once(':')
            .map_or(qualified, |(_, local)| local),
        NamespaceMode::StripDav => dav_prefix
            .and_then(|prefix| qualified.strip_prefix(prefix))
            .and_then(|rest| rest.strip_prefix(':'))
            .unwrap_or(qualified),
    }
}

fn attach(
    stack: &mut [Element],
    root: &mut Option<Element>,
    element: Element,
) -> Result<(), XmlError> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(Node::Element(element));
        Ok(())
    } else if root.is_none() {
        *root = Some(element);
        Ok(())
    } else {
        Err(XmlError::Unbalanced)
    }
}
