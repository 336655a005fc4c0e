#![forbid(unsafe_code)]

//! Lightweight element view over a buffered event slice.
//!
//! The security header is the one place the inbound chain buffers events
//! (synchronously, until `</wsse:Security>`); this module turns that
//! buffer into a navigable element structure while keeping the raw event
//! ranges so subtrees can be re-canonicalized byte-exact.

use vaxholm_core::{ns, Error, Result};
use vaxholm_xml::{Attribute, NsContext, NsDecl, QName, XmlEvent};

/// One element of a buffered subtree.
#[derive(Debug)]
pub struct ElementNode {
    pub name: QName,
    pub attributes: Vec<Attribute>,
    /// Namespace bindings in scope at this element (its own included).
    pub inscope: Vec<NsDecl>,
    /// Concatenated direct character content.
    pub text: String,
    pub children: Vec<ElementNode>,
    /// Index range `[start, end]` of this element's events in the buffer.
    pub range: (usize, usize),
}

impl ElementNode {
    /// First direct child with the given namespace and local name.
    pub fn child(&self, namespace_uri: &str, local_name: &str) -> Option<&ElementNode> {
        self.children
            .iter()
            .find(|c| c.name.matches(namespace_uri, local_name))
    }

    /// All direct children with the given namespace and local name.
    pub fn children_named<'a>(
        &'a self,
        namespace_uri: &'a str,
        local_name: &'a str,
    ) -> impl Iterator<Item = &'a ElementNode> {
        self.children
            .iter()
            .filter(move |c| c.name.matches(namespace_uri, local_name))
    }

    /// First descendant (depth-first) with the given name.
    pub fn find(&self, namespace_uri: &str, local_name: &str) -> Option<&ElementNode> {
        if self.name.matches(namespace_uri, local_name) {
            return Some(self);
        }
        self.children
            .iter()
            .find_map(|c| c.find(namespace_uri, local_name))
    }

    /// Attribute value by local name, ignoring the namespace.
    pub fn attribute(&self, local_name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name.local_name == local_name)
            .map(|a| a.value.as_str())
    }

    /// The element's id: `wsu:Id` or a plain `Id`.
    pub fn id_attribute(&self) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name.matches(ns::WSU, ns::attr::ID))
            .or_else(|| {
                self.attributes
                    .iter()
                    .find(|a| a.name.namespace_uri.is_empty() && a.name.local_name == ns::attr::ID)
            })
            .map(|a| a.value.as_str())
    }

    /// Text with surrounding whitespace stripped (base64 values are
    /// often wrapped on the wire).
    pub fn trimmed_text(&self) -> String {
        self.text.split_whitespace().collect()
    }
}

/// Build the element tree for a buffered subtree. `events` must start
/// with the subtree's `StartElement` and end with its `EndElement`;
/// `ancestors` are the namespace bindings in scope above it.
pub fn build_tree(events: &[XmlEvent], ancestors: &[NsDecl]) -> Result<ElementNode> {
    let mut ns = NsContext::new();
    ns.push(ancestors);

    let mut stack: Vec<ElementNode> = Vec::new();
    for (index, event) in events.iter().enumerate() {
        match event {
            XmlEvent::StartElement(start) => {
                ns.push(&start.namespaces);
                stack.push(ElementNode {
                    name: start.name.clone(),
                    attributes: start.attributes.clone(),
                    inscope: ns.bindings(),
                    text: String::new(),
                    children: Vec::new(),
                    range: (index, index),
                });
            }
            XmlEvent::EndElement { .. } => {
                ns.pop();
                let mut node = stack
                    .pop()
                    .ok_or_else(|| Error::XmlStructure("unbalanced end element".into()))?;
                node.range.1 = index;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => {
                        if index + 1 != events.len() {
                            return Err(Error::XmlStructure(
                                "trailing events after subtree root".into(),
                            ));
                        }
                        return Ok(node);
                    }
                }
            }
            XmlEvent::Characters(text) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(text);
                }
            }
            _ => {}
        }
    }
    Err(Error::XmlStructure("unterminated subtree".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaxholm_xml::reader::read_fragment;

    #[test]
    fn test_tree_navigation() {
        let events = read_fragment(
            r#"<a xmlns="urn:x" xmlns:p="urn:p"><p:b Id="1">hi</p:b><p:b Id="2"/></a>"#,
        )
        .unwrap();
        let tree = build_tree(&events, &[]).unwrap();
        assert!(tree.name.matches("urn:x", "a"));
        assert_eq!(tree.children_named("urn:p", "b").count(), 2);
        let first = tree.child("urn:p", "b").unwrap();
        assert_eq!(first.text, "hi");
        assert_eq!(first.attribute("Id"), Some("1"));
        assert_eq!(first.range, (1, 3));
    }

    #[test]
    fn test_inscope_bindings_include_ancestors() {
        let events = read_fragment(r#"<a xmlns:p="urn:p"><b/></a>"#).unwrap();
        let tree = build_tree(&events, &[NsDecl::new("s", "urn:s")]).unwrap();
        let child = &tree.children[0];
        assert!(child.inscope.iter().any(|d| d.prefix == "p"));
        assert!(child.inscope.iter().any(|d| d.prefix == "s"));
    }

    #[test]
    fn test_unbalanced_rejected() {
        let events = read_fragment("<a><b></b></a>").unwrap();
        assert!(build_tree(&events[..2], &[]).is_err());
    }
}
