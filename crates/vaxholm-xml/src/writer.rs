#![forbid(unsafe_code)]

//! Event serialization back to XML text.

use crate::event::{NsDecl, XmlEvent};
use std::collections::HashSet;

/// Serializes [`XmlEvent`]s to XML text. Namespace declarations and
/// attributes are written in event order; canonical ordering is the
/// canonicalizer's job, not the writer's.
#[derive(Debug, Default)]
pub struct EventWriter {
    out: String,
}

impl EventWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_event(&mut self, event: &XmlEvent) {
        match event {
            XmlEvent::StartDocument | XmlEvent::EndDocument => {}
            XmlEvent::StartElement(start) => {
                self.out.push('<');
                self.out.push_str(&start.name.qualified());
                for decl in &start.namespaces {
                    if decl.prefix.is_empty() {
                        self.out
                            .push_str(&format!(" xmlns=\"{}\"", escape_attr(&decl.uri)));
                    } else {
                        self.out.push_str(&format!(
                            " xmlns:{}=\"{}\"",
                            decl.prefix,
                            escape_attr(&decl.uri)
                        ));
                    }
                }
                for attr in &start.attributes {
                    self.out.push_str(&format!(
                        " {}=\"{}\"",
                        attr.name.qualified(),
                        escape_attr(&attr.value)
                    ));
                }
                self.out.push('>');
            }
            XmlEvent::EndElement { name } => {
                self.out.push_str("</");
                self.out.push_str(&name.qualified());
                self.out.push('>');
            }
            XmlEvent::Characters(text) => {
                self.out.push_str(&escape_text(text));
            }
            XmlEvent::Comment(text) => {
                self.out.push_str("<!--");
                self.out.push_str(text);
                self.out.push_str("-->");
            }
        }
    }

    pub fn into_string(self) -> String {
        self.out
    }
}

/// Serialize an event sequence to text.
pub fn events_to_string(events: &[XmlEvent]) -> String {
    let mut writer = EventWriter::new();
    for event in events {
        writer.write_event(event);
    }
    writer.into_string()
}

/// Serialize a subtree fragment, injecting ancestor namespace bindings
/// onto the apex elements so the fragment stands alone. A binding is
/// injected when a prefix is used somewhere in the fragment but not
/// declared on the apex element itself.
pub fn fragment_to_string(events: &[XmlEvent], inscope: &[NsDecl]) -> String {
    let used = used_prefixes(events);
    let mut writer = EventWriter::new();
    let mut depth = 0usize;
    for event in events {
        match event {
            XmlEvent::StartElement(start) => {
                if depth == 0 {
                    let mut start = start.clone();
                    for decl in inscope {
                        let declared = start.namespaces.iter().any(|d| d.prefix == decl.prefix);
                        if !declared && used.contains(decl.prefix.as_str()) {
                            start.namespaces.push(decl.clone());
                        }
                    }
                    writer.write_event(&XmlEvent::StartElement(start));
                } else {
                    writer.write_event(event);
                }
                depth += 1;
            }
            XmlEvent::EndElement { .. } => {
                depth = depth.saturating_sub(1);
                writer.write_event(event);
            }
            _ => writer.write_event(event),
        }
    }
    writer.into_string()
}

fn used_prefixes(events: &[XmlEvent]) -> HashSet<String> {
    let mut used = HashSet::new();
    for event in events {
        if let XmlEvent::StartElement(start) = event {
            if !start.name.namespace_uri.is_empty() {
                used.insert(start.name.prefix.clone());
            }
            for attr in &start.attributes {
                if !attr.name.prefix.is_empty() {
                    used.insert(attr.name.prefix.clone());
                }
            }
        }
    }
    used
}

fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

fn escape_attr(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::{read_document, read_fragment};

    #[test]
    fn test_write_read_round_trip() {
        let xml = r#"<a xmlns="urn:d" xmlns:p="urn:p"><p:b attr="x &amp; y">text</p:b></a>"#;
        let events = read_document(xml).unwrap();
        let serialized = events_to_string(&events);
        let reparsed = read_document(&serialized).unwrap();
        assert_eq!(events, reparsed);
    }

    #[test]
    fn test_fragment_injects_ancestor_binding() {
        // Prefix p is declared on an ancestor outside the fragment.
        let doc = read_document(r#"<r xmlns:p="urn:p"><p:a>hi</p:a></r>"#).unwrap();
        let fragment: Vec<_> = doc[2..doc.len() - 2].to_vec();
        let inscope = [NsDecl::new("p", "urn:p")];
        let text = fragment_to_string(&fragment, &inscope);
        assert!(text.starts_with("<p:a xmlns:p=\"urn:p\">"));
        // The fragment must now parse on its own.
        let reparsed = read_fragment(&text).unwrap();
        assert_eq!(reparsed.len(), 3);
    }

    #[test]
    fn test_fragment_keeps_local_declaration() {
        let doc = read_document(r#"<r><a xmlns="urn:x">v</a></r>"#).unwrap();
        let fragment: Vec<_> = doc[2..doc.len() - 2].to_vec();
        let text = fragment_to_string(&fragment, &[NsDecl::new("", "urn:outer")]);
        // The apex already declares the default namespace; nothing injected.
        assert_eq!(text, r#"<a xmlns="urn:x">v</a>"#);
    }
}
