#![forbid(unsafe_code)]

//! Streaming canonicalizer.
//!
//! Consumes [`XmlEvent`]s one at a time and appends canonical bytes to a
//! caller-supplied buffer. No tree is ever materialized; the only state is
//! the namespace stacks for the currently open elements. For subtree
//! canonicalization the caller seeds the in-scope namespace context of the
//! subtree's ancestors via [`Canonicalizer::with_context`].

use crate::render::{Attr, NsDecl};
use crate::{escape, C14nMode};
use std::collections::{BTreeMap, HashSet};
use vaxholm_xml::{NsContext, XmlEvent};
use vaxholm_core::{Error, Result};

pub struct Canonicalizer {
    mode: C14nMode,
    inclusive_prefixes: HashSet<String>,
    inscope: NsContext,
    /// Rendered prefix → URI bindings, one map per open element depth.
    rendered: Vec<BTreeMap<String, String>>,
    /// Qualified names of open elements, for end tags.
    open: Vec<String>,
}

impl Canonicalizer {
    pub fn new(mode: C14nMode, inclusive_prefixes: &[String]) -> Self {
        Self::with_context(mode, inclusive_prefixes, &[])
    }

    /// Create a canonicalizer whose subtree sits below ancestors with the
    /// given in-scope namespace bindings.
    pub fn with_context(
        mode: C14nMode,
        inclusive_prefixes: &[String],
        ancestor_bindings: &[vaxholm_xml::NsDecl],
    ) -> Self {
        let mut inscope = NsContext::new();
        inscope.push(ancestor_bindings);
        Self {
            mode,
            inclusive_prefixes: inclusive_prefixes.iter().cloned().collect(),
            inscope,
            rendered: vec![BTreeMap::new()],
            open: Vec::new(),
        }
    }

    /// Canonicalize one event, appending output bytes to `out`.
    pub fn transform(&mut self, event: &XmlEvent, out: &mut Vec<u8>) -> Result<()> {
        match event {
            XmlEvent::StartDocument | XmlEvent::EndDocument => Ok(()),
            XmlEvent::StartElement(start) => self.start_element(start, out),
            XmlEvent::EndElement { .. } => {
                let name = self
                    .open
                    .pop()
                    .ok_or_else(|| Error::Canonicalization("unbalanced end element".into()))?;
                out.extend_from_slice(b"</");
                out.extend_from_slice(name.as_bytes());
                out.push(b'>');
                self.rendered.pop();
                self.inscope.pop();
                Ok(())
            }
            XmlEvent::Characters(text) => {
                out.extend_from_slice(escape::escape_text(text).as_bytes());
                Ok(())
            }
            XmlEvent::Comment(text) => {
                if self.mode.with_comments() {
                    out.extend_from_slice(b"<!--");
                    out.extend_from_slice(text.as_bytes());
                    out.extend_from_slice(b"-->");
                }
                Ok(())
            }
        }
    }

    fn start_element(
        &mut self,
        start: &vaxholm_xml::StartElement,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        self.inscope.push(&start.namespaces);

        let utilized = self.utilized_prefixes(start);
        let parent_rendered = self
            .rendered
            .last()
            .cloned()
            .unwrap_or_default();

        let mut ns_decls: Vec<NsDecl> = Vec::new();
        for prefix in &utilized {
            if prefix == "xml" {
                continue;
            }
            match self.inscope.resolve(prefix) {
                Some(uri) => {
                    if parent_rendered.get(prefix).map(String::as_str) != Some(uri) {
                        ns_decls.push(NsDecl {
                            prefix: prefix.clone(),
                            uri: uri.to_owned(),
                        });
                    }
                }
                None if prefix.is_empty() => {
                    // Default namespace undeclared below a rendered one.
                    if parent_rendered.get("").is_some_and(|u| !u.is_empty()) {
                        ns_decls.push(NsDecl {
                            prefix: String::new(),
                            uri: String::new(),
                        });
                    }
                }
                None => {
                    return Err(Error::Canonicalization(format!(
                        "prefix {prefix} is not in scope"
                    )));
                }
            }
        }
        ns_decls.sort();

        let mut attrs: Vec<Attr> = start
            .attributes
            .iter()
            .map(|a| Attr {
                ns_uri: a.name.namespace_uri.clone(),
                local_name: a.name.local_name.clone(),
                qualified_name: a.name.qualified(),
                value: a.value.clone(),
            })
            .collect();
        attrs.sort();

        let elem_name = start.name.qualified();
        out.push(b'<');
        out.extend_from_slice(elem_name.as_bytes());
        for decl in &ns_decls {
            out.extend_from_slice(decl.render().as_bytes());
        }
        for attr in &attrs {
            out.extend_from_slice(attr.render().as_bytes());
        }
        out.push(b'>');

        let mut child_rendered = parent_rendered;
        for decl in &ns_decls {
            if decl.uri.is_empty() {
                child_rendered.remove(&decl.prefix);
            } else {
                child_rendered.insert(decl.prefix.clone(), decl.uri.clone());
            }
        }
        self.rendered.push(child_rendered);
        self.open.push(elem_name);
        Ok(())
    }

    /// The namespace prefixes whose declarations this element must carry.
    ///
    /// Exclusive C14N renders only "visibly utilized" prefixes: the
    /// element's own, those of its attributes, and the InclusiveNamespaces
    /// PrefixList. Inclusive C14N renders every in-scope binding.
    fn utilized_prefixes(&self, start: &vaxholm_xml::StartElement) -> Vec<String> {
        let mut set: HashSet<String> = HashSet::new();
        if self.mode.is_exclusive() {
            set.insert(start.name.prefix.clone());
            for attr in &start.attributes {
                if !attr.name.prefix.is_empty() {
                    set.insert(attr.name.prefix.clone());
                }
            }
            for p in &self.inclusive_prefixes {
                if p == "#default" {
                    set.insert(String::new());
                } else {
                    set.insert(p.clone());
                }
            }
        } else {
            for binding in self.inscope.bindings() {
                set.insert(binding.prefix);
            }
            set.insert(start.name.prefix.clone());
        }
        let mut out: Vec<String> = set.into_iter().collect();
        out.sort();
        out
    }
}

/// Canonicalize a complete event sequence in one call.
pub fn canonicalize(
    events: &[XmlEvent],
    mode: C14nMode,
    inclusive_prefixes: &[String],
) -> Result<Vec<u8>> {
    let mut canonicalizer = Canonicalizer::new(mode, inclusive_prefixes);
    let mut out = Vec::new();
    for event in events {
        canonicalizer.transform(event, &mut out)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaxholm_xml::reader::read_document;

    fn c14n(xml: &str, mode: C14nMode) -> String {
        let events = read_document(xml).unwrap();
        String::from_utf8(canonicalize(&events, mode, &[]).unwrap()).unwrap()
    }

    #[test]
    fn test_attribute_ordering() {
        let out = c14n(r#"<a z="1" b="2" a="3"/>"#, C14nMode::Exclusive);
        assert_eq!(out, r#"<a a="3" b="2" z="1"></a>"#);
    }

    #[test]
    fn test_namespaced_attrs_sort_after_plain() {
        let out = c14n(
            r#"<a xmlns:n="urn:n" n:z="1" b="2"/>"#,
            C14nMode::Exclusive,
        );
        assert_eq!(out, r#"<a xmlns:n="urn:n" b="2" n:z="1"></a>"#);
    }

    #[test]
    fn test_exclusive_drops_unused_declarations() {
        let out = c14n(
            r#"<a xmlns:used="urn:u" xmlns:unused="urn:x"><used:b/></a>"#,
            C14nMode::Exclusive,
        );
        assert_eq!(out, r#"<a><used:b xmlns:used="urn:u"></used:b></a>"#);
    }

    #[test]
    fn test_inclusive_keeps_all_declarations() {
        let out = c14n(
            r#"<a xmlns:unused="urn:x"><b/></a>"#,
            C14nMode::Inclusive,
        );
        assert_eq!(out, r#"<a xmlns:unused="urn:x"><b></b></a>"#);
    }

    #[test]
    fn test_no_redundant_redeclaration() {
        let out = c14n(
            r#"<p:a xmlns:p="urn:p"><p:b xmlns:p="urn:p"/></p:a>"#,
            C14nMode::Exclusive,
        );
        assert_eq!(out, r#"<p:a xmlns:p="urn:p"><p:b></p:b></p:a>"#);
    }

    #[test]
    fn test_self_closing_expanded() {
        assert_eq!(c14n("<a/>", C14nMode::Exclusive), "<a></a>");
    }

    #[test]
    fn test_text_escaping() {
        let out = c14n("<a>x &amp; &lt;y&gt;</a>", C14nMode::Exclusive);
        assert_eq!(out, "<a>x &amp; &lt;y&gt;</a>");
    }

    #[test]
    fn test_comments_stripped_without_comments_mode() {
        let out = c14n("<a><!--hidden-->text</a>", C14nMode::Exclusive);
        assert_eq!(out, "<a>text</a>");
    }

    #[test]
    fn test_comments_kept_with_comments_mode() {
        let out = c14n("<a><!--kept-->text</a>", C14nMode::ExclusiveWithComments);
        assert_eq!(out, "<a><!--kept-->text</a>");
    }

    #[test]
    fn test_subtree_with_ancestor_context() {
        // Canonicalize only the inner subtree; the prefix comes from the
        // seeded ancestor context and must be re-declared on the apex.
        let events = read_document(r#"<r xmlns:p="urn:p"><p:a>v</p:a></r>"#).unwrap();
        let subtree = &events[2..events.len() - 2];
        let mut canonicalizer = Canonicalizer::with_context(
            C14nMode::Exclusive,
            &[],
            &[vaxholm_xml::NsDecl::new("p", "urn:p")],
        );
        let mut out = Vec::new();
        for event in subtree {
            canonicalizer.transform(event, &mut out).unwrap();
        }
        assert_eq!(
            String::from_utf8(out).unwrap(),
            r#"<p:a xmlns:p="urn:p">v</p:a>"#
        );
    }

    #[test]
    fn test_unbound_prefix_fails() {
        let events = read_document(r#"<r xmlns:p="urn:p"><p:a>v</p:a></r>"#).unwrap();
        let subtree = &events[2..events.len() - 2];
        let mut canonicalizer = Canonicalizer::new(C14nMode::Exclusive, &[]);
        let mut out = Vec::new();
        let result: Result<()> = subtree
            .iter()
            .try_for_each(|e| canonicalizer.transform(e, &mut out));
        assert!(result.is_err());
    }

    #[test]
    fn test_default_ns_undeclared_below() {
        let out = c14n(
            r#"<a xmlns="urn:d"><b xmlns="">plain</b></a>"#,
            C14nMode::Exclusive,
        );
        assert_eq!(out, r#"<a xmlns="urn:d"><b xmlns="">plain</b></a>"#);
    }
}
