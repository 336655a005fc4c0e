#![forbid(unsafe_code)]

//! XML event types with resolved namespaces.

use std::fmt;

/// A qualified XML name: namespace URI, prefix as written, local name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QName {
    /// Namespace URI ("" for no namespace).
    pub namespace_uri: String,
    /// The prefix as it appears in the document ("" for none).
    pub prefix: String,
    /// The local name.
    pub local_name: String,
}

impl QName {
    pub fn new(
        namespace_uri: impl Into<String>,
        prefix: impl Into<String>,
        local_name: impl Into<String>,
    ) -> Self {
        Self {
            namespace_uri: namespace_uri.into(),
            prefix: prefix.into(),
            local_name: local_name.into(),
        }
    }

    /// A name with no namespace and no prefix.
    pub fn unqualified(local_name: impl Into<String>) -> Self {
        Self::new("", "", local_name)
    }

    /// The name as serialized: `prefix:local` or `local`.
    pub fn qualified(&self) -> String {
        if self.prefix.is_empty() {
            self.local_name.clone()
        } else {
            format!("{}:{}", self.prefix, self.local_name)
        }
    }

    /// Match on namespace URI and local name, ignoring the prefix.
    pub fn matches(&self, namespace_uri: &str, local_name: &str) -> bool {
        self.namespace_uri == namespace_uri && self.local_name == local_name
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace_uri.is_empty() {
            write!(f, "{}", self.local_name)
        } else {
            write!(f, "{{{}}}{}", self.namespace_uri, self.local_name)
        }
    }
}

/// An attribute with a resolved name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: QName,
    pub value: String,
}

impl Attribute {
    pub fn new(name: QName, value: impl Into<String>) -> Self {
        Self {
            name,
            value: value.into(),
        }
    }
}

/// A namespace declaration (`xmlns` or `xmlns:prefix`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NsDecl {
    /// The declared prefix ("" for the default namespace).
    pub prefix: String,
    /// The namespace URI.
    pub uri: String,
}

impl NsDecl {
    pub fn new(prefix: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            uri: uri.into(),
        }
    }
}

/// Start-element event data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartElement {
    pub name: QName,
    pub attributes: Vec<Attribute>,
    pub namespaces: Vec<NsDecl>,
}

impl StartElement {
    pub fn new(name: QName) -> Self {
        Self {
            name,
            attributes: Vec::new(),
            namespaces: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, name: QName, value: impl Into<String>) -> Self {
        self.attributes.push(Attribute::new(name, value));
        self
    }

    pub fn with_namespace(mut self, prefix: impl Into<String>, uri: impl Into<String>) -> Self {
        self.namespaces.push(NsDecl::new(prefix, uri));
        self
    }

    /// Look up an attribute value by local name, ignoring its namespace.
    pub fn attribute(&self, local_name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name.local_name == local_name)
            .map(|a| a.value.as_str())
    }
}

/// One streaming XML event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlEvent {
    StartDocument,
    StartElement(StartElement),
    EndElement { name: QName },
    Characters(String),
    Comment(String),
    EndDocument,
}

impl XmlEvent {
    pub fn start(element: StartElement) -> Self {
        XmlEvent::StartElement(element)
    }

    pub fn end(name: QName) -> Self {
        XmlEvent::EndElement { name }
    }

    pub fn text(content: impl Into<String>) -> Self {
        XmlEvent::Characters(content.into())
    }

    /// The element name if this is a start or end element event.
    pub fn element_name(&self) -> Option<&QName> {
        match self {
            XmlEvent::StartElement(start) => Some(&start.name),
            XmlEvent::EndElement { name } => Some(name),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualified_name() {
        let q = QName::new("http://example.org", "ex", "item");
        assert_eq!(q.qualified(), "ex:item");
        assert_eq!(QName::unqualified("item").qualified(), "item");
    }

    #[test]
    fn test_qname_matches_ignores_prefix() {
        let a = QName::new("http://example.org", "a", "item");
        assert!(a.matches("http://example.org", "item"));
        assert!(!a.matches("http://example.org", "other"));
        assert!(!a.matches("http://other.org", "item"));
    }

    #[test]
    fn test_display_clark_notation() {
        let q = QName::new("http://example.org", "ex", "item");
        assert_eq!(q.to_string(), "{http://example.org}item");
    }
}
