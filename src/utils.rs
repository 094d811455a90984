use std::{borrow::Cow, collections::HashMap};

use percent_encoding::percent_decode_str;
use quick_xml::{
    NsReader,
    errors::IllFormedError,
    escape::unescape,
    events::{BytesStart, Event},
};

use crate::error::DecodeError;

/// Returns the directory part of an archive path
///
/// `OEBPS/content.opf` yields `OEBPS`, a path at the archive root yields an empty string.
pub fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

/// Checks whether an href points outside of the archive
///
/// Only absolute URLs carrying a scheme authority (`https://...`) are considered
/// remote; everything else is resolved against the archive.
pub fn is_remote_href(href: &str) -> bool {
    href.contains("://")
}

/// Resolves an href against the directory of the document declaring it
///
/// The fragment and query parts are dropped, percent-encoded octets are decoded,
/// `.` segments are skipped and `..` segments move one directory up. An href that
/// starts with `/` is resolved from the archive root.
///
/// ## Parameters
/// - `base_dir`: The directory of the declaring document, relative to the archive root
/// - `href`: The href to resolve
///
/// ## Return
/// - `Some(String)`: The archive entry name the href designates
/// - `None`: The href climbs above the archive root
pub fn resolve_href(base_dir: &str, href: &str) -> Option<String> {
    let href = href.split(['#', '?']).next().unwrap_or_default();
    let href = percent_decode_str(href)
        .decode_utf8()
        .unwrap_or(Cow::Borrowed(href));

    let (base_dir, href) = match href.strip_prefix('/') {
        Some(stripped) => ("", stripped),
        None => (base_dir, &href[..]),
    };

    let mut segments = base_dir
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<&str>>();

    for segment in href.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                // climbing above the root leaks out of the container
                segments.pop()?;
            }
            _ => segments.push(segment),
        }
    }

    Some(segments.join("/"))
}

/// Decodes raw bytes read from the archive into a string
///
/// Supports automatic detection of UTF-8 (with or without BOM), UTF-16 BE and
/// UTF-16 LE (with BOM). Data without a BOM that is not valid UTF-8 is rejected,
/// since XML documents without a BOM must be UTF-8.
pub trait DecodeBytes {
    fn decode(&self) -> Result<String, DecodeError>;
}

impl DecodeBytes for [u8] {
    fn decode(&self) -> Result<String, DecodeError> {
        if self.is_empty() {
            return Err(DecodeError::EmptyData);
        }

        match self {
            // UTF-8 BOM (0xEF, 0xBB, 0xBF)
            [0xEF, 0xBB, 0xBF, rest @ ..] => String::from_utf8(rest.to_vec()).map_err(Into::into),

            // UTF-16 BE BOM (0xFE, 0xFF)
            [0xFE, 0xFF, rest @ ..] => {
                let utf16_units: Vec<u16> = rest
                    .chunks_exact(2)
                    .map(|b| u16::from_be_bytes([b[0], b[1]]))
                    .collect();

                String::from_utf16(&utf16_units).map_err(Into::into)
            }

            // UTF-16 LE BOM (0xFF, 0xFE)
            [0xFF, 0xFE, rest @ ..] => {
                let utf16_units: Vec<u16> = rest
                    .chunks_exact(2)
                    .map(|b| u16::from_le_bytes([b[0], b[1]]))
                    .collect();

                String::from_utf16(&utf16_units).map_err(Into::into)
            }

            _ => String::from_utf8(self.to_vec()).map_err(Into::into),
        }
    }
}

impl DecodeBytes for Vec<u8> {
    fn decode(&self) -> Result<String, DecodeError> {
        self.as_slice().decode()
    }
}

/// Provides functionality for normalizing whitespace characters
///
/// Collapses every run of whitespace into a single space and removes
/// leading and trailing whitespace.
pub trait NormalizeWhitespace {
    fn normalize_whitespace(&self) -> String;
}

impl NormalizeWhitespace for &str {
    fn normalize_whitespace(&self) -> String {
        self.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

impl NormalizeWhitespace for String {
    fn normalize_whitespace(&self) -> String {
        self.as_str().normalize_whitespace()
    }
}

/// Represents an element node in an XML document
#[derive(Debug)]
pub struct XmlElement {
    /// The local name of the element (excluding namespace prefix)
    pub name: String,

    /// The namespace prefix of the element
    pub prefix: Option<String>,

    /// The namespace URI the element belongs to, if it is declared
    pub namespace: Option<String>,

    /// The attributes of the element, keyed by qualified name
    ///
    /// Namespace declarations (`xmlns`, `xmlns:*`) are not stored here.
    pub attributes: HashMap<String, String>,

    /// The character data directly inside the element, CDATA included
    pub text: Option<String>,

    /// The children of the element, in document order
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    /// Create a new element
    pub fn new(name: String) -> Self {
        Self {
            name,
            prefix: None,
            namespace: None,
            attributes: HashMap::new(),
            text: None,
            children: Vec::new(),
        }
    }

    /// Get the full tag name of the element
    ///
    /// If the element has a namespace prefix, return "prefix:name" format;
    /// otherwise, return only the element name.
    pub fn tag_name(&self) -> String {
        if let Some(prefix) = &self.prefix {
            format!("{}:{}", prefix, self.name)
        } else {
            self.name.clone()
        }
    }

    /// Gets the text content of the element and all its child elements
    pub fn text(&self) -> String {
        let mut result = String::new();
        self.collect_text(&mut result);
        result.trim().to_string()
    }

    fn collect_text(&self, result: &mut String) {
        if let Some(text_value) = &self.text {
            result.push_str(text_value);
        }

        for child in &self.children {
            child.collect_text(result);
        }
    }

    /// Returns the value of the specified attribute
    ///
    /// The exact qualified name is tried first. Otherwise the first attribute whose
    /// local name matches is returned, so `scheme` also finds `opf:scheme`.
    pub fn get_attr(&self, name: &str) -> Option<String> {
        if let Some(value) = self.attributes.get(name) {
            return Some(value.clone());
        }

        self.attributes
            .iter()
            .find(|(key, _)| {
                key.split_once(':')
                    .is_some_and(|(_, local_name)| local_name == name)
            })
            .map(|(_, value)| value.clone())
    }

    /// Find all elements with the specified name among the child elements of the current element
    pub fn find_children_by_name(&self, name: &str) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter(move |child| child.name == name)
    }

    /// Find the first child element with the specified name
    pub fn first_child(&self, name: &str) -> Option<&XmlElement> {
        self.find_children_by_name(name).next()
    }

    /// Get children elements
    pub fn children(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter()
    }

    fn push_text(&mut self, text: &str) {
        match &mut self.text {
            Some(current) => current.push_str(text),
            None => self.text = Some(text.to_string()),
        }
    }
}

/// XML parser used to parse XML content and build an XML element tree
pub struct XmlReader {}

impl XmlReader {
    /// Parses an XML from string and builds the root element
    ///
    /// Comments, processing instructions, the declaration and the doctype are skipped.
    /// Namespace declarations are resolved per scope, so every element knows the
    /// namespace URI bound to its prefix (or the default namespace).
    ///
    /// ## Parameters
    /// - `content`: The XML string to be parsed
    ///
    /// ## Return
    /// - `Ok(XmlElement)`: The root element of the XML element tree
    /// - `Err(DecodeError)`: The document is empty or not well-formed
    pub fn parse(content: &str) -> Result<XmlElement, DecodeError> {
        if content.trim().is_empty() {
            return Err(DecodeError::EmptyData);
        }

        let mut reader = NsReader::from_str(content);
        reader.config_mut().trim_text(false);

        let mut buf = Vec::new();
        let mut stack = Vec::<XmlElement>::new();
        let mut scopes = vec![HashMap::<String, String>::new()];
        let mut root = None;

        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Eof => break,

                Event::Start(e) => {
                    let (element, scope) = Self::open_element(&e, scopes.last());
                    stack.push(element);
                    scopes.push(scope);
                }

                Event::End(_) => {
                    scopes.pop();
                    if let Some(element) = stack.pop() {
                        match stack.last_mut() {
                            Some(parent) => parent.children.push(element),
                            None => set_root(&mut root, element)?,
                        }
                    }
                }

                Event::Empty(e) => {
                    let (element, _) = Self::open_element(&e, scopes.last());
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(element),
                        None => set_root(&mut root, element)?,
                    }
                }

                Event::Text(e) => {
                    if let Some(element) = stack.last_mut() {
                        element.push_text(&String::from_utf8_lossy(e.as_ref()));
                    }
                }

                Event::CData(e) => {
                    if let Some(element) = stack.last_mut() {
                        element.push_text(&String::from_utf8_lossy(e.as_ref()));
                    }
                }

                Event::GeneralRef(e) => {
                    if let Some(element) = stack.last_mut() {
                        let entity = String::from_utf8_lossy(e.as_ref()).to_string();
                        match resolve_entity(&entity) {
                            Some(resolved) => element.push_text(&resolved),
                            None => element.push_text(&format!("&{};", entity)),
                        }
                    }
                }

                // Comment, PI, Declaration, Doctype
                _ => {}
            }

            buf.clear();
        }

        if let Some(open) = stack.last() {
            let missing = IllFormedError::MissingEndTag(open.tag_name());
            return Err(quick_xml::Error::IllFormed(missing).into());
        }

        root.ok_or(DecodeError::EmptyData)
    }

    /// Parse XML from bytes and builds the root element
    pub fn parse_bytes(bytes: &[u8]) -> Result<XmlElement, DecodeError> {
        let content = bytes.decode()?;
        Self::parse(&content)
    }

    /// Builds an element from a start tag and returns it with its namespace scope
    ///
    /// The returned scope is the parent scope extended by the declarations found
    /// on this element; it is only pushed for elements that have content.
    fn open_element(
        start: &BytesStart<'_>,
        parent_scope: Option<&HashMap<String, String>>,
    ) -> (XmlElement, HashMap<String, String>) {
        let name = String::from_utf8_lossy(start.local_name().as_ref()).to_string();
        let mut element = XmlElement::new(name);
        let mut scope = parent_scope.cloned().unwrap_or_default();

        if let Some(prefix) = start.name().prefix() {
            element.prefix = Some(String::from_utf8_lossy(prefix.as_ref()).to_string());
        }

        for attr in start.attributes().flatten() {
            let attr_key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
            let raw_value = String::from_utf8_lossy(&attr.value).to_string();
            let attr_value = match unescape(&raw_value) {
                Ok(value) => value.into_owned(),
                Err(_) => raw_value.clone(),
            };

            // Namespace declarations only extend the scope
            if attr_key == "xmlns" {
                scope.insert(String::new(), attr_value);
                continue;
            }
            if let Some(prefix) = attr_key.strip_prefix("xmlns:") {
                scope.insert(prefix.to_string(), attr_value);
                continue;
            }

            element.attributes.insert(attr_key, attr_value);
        }

        let prefix = element.prefix.clone().unwrap_or_default();
        element.namespace = scope.get(&prefix).cloned();

        (element, scope)
    }
}

/// Stores a completed top-level element as the document root
///
/// A well-formed document has exactly one root element.
fn set_root(root: &mut Option<XmlElement>, element: XmlElement) -> Result<(), DecodeError> {
    if let Some(first) = root {
        return Err(DecodeError::TrailingElement {
            root: first.tag_name(),
            found: element.tag_name(),
        });
    }

    *root = Some(element);
    Ok(())
}

/// Resolves a predefined XML entity or a character reference
fn resolve_entity(entity: &str) -> Option<String> {
    match entity {
        "apos" => return Some("'".to_string()),
        "quot" => return Some("\"".to_string()),
        "lt" => return Some("<".to_string()),
        "gt" => return Some(">".to_string()),
        "amp" => return Some("&".to_string()),
        _ => {}
    }

    let code = if let Some(hex) = entity.strip_prefix("#x") {
        u32::from_str_radix(hex, 16).ok()?
    } else if let Some(dec) = entity.strip_prefix('#') {
        dec.parse::<u32>().ok()?
    } else {
        return None;
    };

    char::from_u32(code).map(|c| c.to_string())
}
