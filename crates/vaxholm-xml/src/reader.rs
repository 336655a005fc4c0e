#![forbid(unsafe_code)]

//! Event reader over quick-xml with namespace resolution.
//!
//! quick-xml is safe against XXE by default (it does not expand external
//! entities); DOCTYPE declarations are rejected outright.

use crate::event::{Attribute, NsDecl, QName, StartElement, XmlEvent};
use crate::nsctx::NsContext;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::VecDeque;
use vaxholm_core::{Error, Result};

/// Pull reader producing [`XmlEvent`]s with resolved namespaces.
pub struct EventReader<'a> {
    reader: Reader<&'a [u8]>,
    ns: NsContext,
    queue: VecDeque<XmlEvent>,
    depth: usize,
    started: bool,
    finished: bool,
}

impl<'a> EventReader<'a> {
    pub fn new(xml: &'a str) -> Self {
        let reader = Reader::from_str(xml);
        Self {
            reader,
            ns: NsContext::new(),
            queue: VecDeque::new(),
            depth: 0,
            started: false,
            finished: false,
        }
    }

    /// The next event, or `None` after `EndDocument`.
    pub fn next_event(&mut self) -> Result<Option<XmlEvent>> {
        if !self.started {
            self.started = true;
            return Ok(Some(XmlEvent::StartDocument));
        }
        if let Some(event) = self.queue.pop_front() {
            return Ok(Some(event));
        }
        if self.finished {
            return Ok(None);
        }
        loop {
            match self
                .reader
                .read_event()
                .map_err(|e| Error::XmlParse(e.to_string()))?
            {
                Event::Start(start) => {
                    let event = self.enter_element(&start)?;
                    self.depth += 1;
                    return Ok(Some(event));
                }
                Event::Empty(start) => {
                    // Self-closing tag: synthesize start + end.
                    let event = self.enter_element(&start)?;
                    let name = match &event {
                        XmlEvent::StartElement(s) => s.name.clone(),
                        _ => unreachable!(),
                    };
                    self.queue.push_back(XmlEvent::EndElement { name });
                    self.ns.pop();
                    return Ok(Some(event));
                }
                Event::End(end) => {
                    let name = self.resolve_name(end.name().as_ref(), true)?;
                    self.ns.pop();
                    self.depth = self.depth.saturating_sub(1);
                    return Ok(Some(XmlEvent::EndElement { name }));
                }
                Event::Text(text) => {
                    let content = text
                        .unescape()
                        .map_err(|e| Error::XmlParse(e.to_string()))?
                        .into_owned();
                    // Whitespace outside the document element is not
                    // part of the event stream.
                    if self.depth == 0 && content.trim().is_empty() {
                        continue;
                    }
                    return Ok(Some(XmlEvent::Characters(content)));
                }
                Event::CData(data) => {
                    let content = String::from_utf8(data.to_vec())
                        .map_err(|e| Error::XmlParse(format!("invalid UTF-8 in CDATA: {e}")))?;
                    return Ok(Some(XmlEvent::Characters(content)));
                }
                Event::Comment(text) => {
                    let content = text
                        .unescape()
                        .map_err(|e| Error::XmlParse(e.to_string()))?
                        .into_owned();
                    return Ok(Some(XmlEvent::Comment(content)));
                }
                Event::DocType(_) => {
                    return Err(Error::XmlParse("DOCTYPE declarations are not allowed".into()));
                }
                Event::Decl(_) | Event::PI(_) => continue,
                Event::Eof => {
                    self.finished = true;
                    return Ok(Some(XmlEvent::EndDocument));
                }
            }
        }
    }

    /// Snapshot of the namespace bindings currently in scope.
    pub fn ns_bindings(&self) -> Vec<NsDecl> {
        self.ns.bindings()
    }

    fn enter_element(&mut self, start: &BytesStart<'_>) -> Result<XmlEvent> {
        let mut declarations: Vec<NsDecl> = Vec::new();
        let mut raw_attrs: Vec<(String, String)> = Vec::new();

        for attr in start.attributes() {
            let attr = attr.map_err(|e| Error::XmlParse(e.to_string()))?;
            let key = std::str::from_utf8(attr.key.as_ref())
                .map_err(|e| Error::XmlParse(format!("invalid UTF-8 in attribute: {e}")))?
                .to_owned();
            let value = attr
                .unescape_value()
                .map_err(|e| Error::XmlParse(e.to_string()))?
                .into_owned();
            if key == "xmlns" {
                declarations.push(NsDecl::new("", value));
            } else if let Some(prefix) = key.strip_prefix("xmlns:") {
                declarations.push(NsDecl::new(prefix, value));
            } else {
                raw_attrs.push((key, value));
            }
        }

        // Declarations on this element are in scope for its own name and
        // attributes.
        self.ns.push(&declarations);

        let name = self.resolve_name(start.name().as_ref(), true)?;
        let mut attributes = Vec::with_capacity(raw_attrs.len());
        for (key, value) in raw_attrs {
            let name = self.resolve_attr_name(&key)?;
            attributes.push(Attribute::new(name, value));
        }

        Ok(XmlEvent::StartElement(StartElement {
            name,
            attributes,
            namespaces: declarations,
        }))
    }

    fn resolve_name(&self, raw: &[u8], use_default_ns: bool) -> Result<QName> {
        let raw = std::str::from_utf8(raw)
            .map_err(|e| Error::XmlParse(format!("invalid UTF-8 in name: {e}")))?;
        let (prefix, local) = match raw.split_once(':') {
            Some((p, l)) => (p, l),
            None => ("", raw),
        };
        let uri = if prefix.is_empty() {
            if use_default_ns {
                self.ns.resolve("").unwrap_or("").to_owned()
            } else {
                String::new()
            }
        } else {
            self.ns
                .resolve(prefix)
                .ok_or_else(|| Error::XmlStructure(format!("undeclared prefix: {prefix}")))?
                .to_owned()
        };
        Ok(QName::new(uri, prefix, local))
    }

    fn resolve_attr_name(&self, raw: &str) -> Result<QName> {
        // Unprefixed attributes are in no namespace.
        let (prefix, local) = match raw.split_once(':') {
            Some((p, l)) => (p, l),
            None => ("", raw),
        };
        if prefix.is_empty() {
            return Ok(QName::unqualified(local));
        }
        let uri = self
            .ns
            .resolve(prefix)
            .ok_or_else(|| Error::XmlStructure(format!("undeclared prefix: {prefix}")))?
            .to_owned();
        Ok(QName::new(uri, prefix, local))
    }
}

/// Parse a complete document into its event sequence.
pub fn read_document(xml: &str) -> Result<Vec<XmlEvent>> {
    let mut reader = EventReader::new(xml);
    let mut events = Vec::new();
    while let Some(event) = reader.next_event()? {
        events.push(event);
    }
    Ok(events)
}

/// Parse a fragment (one or more sibling elements) into events, without
/// the surrounding document markers.
pub fn read_fragment(xml: &str) -> Result<Vec<XmlEvent>> {
    let events = read_document(xml)?;
    Ok(events
        .into_iter()
        .filter(|e| !matches!(e, XmlEvent::StartDocument | XmlEvent::EndDocument))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_resolution() {
        let xml = r#"<a xmlns="urn:d" xmlns:p="urn:p"><p:b attr="1" p:x="2"/></a>"#;
        let events = read_document(xml).unwrap();
        assert_eq!(events.len(), 6);
        match &events[1] {
            XmlEvent::StartElement(s) => {
                assert_eq!(s.name.namespace_uri, "urn:d");
                assert_eq!(s.name.local_name, "a");
                assert_eq!(s.namespaces.len(), 2);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        match &events[2] {
            XmlEvent::StartElement(s) => {
                assert_eq!(s.name.namespace_uri, "urn:p");
                assert_eq!(s.name.prefix, "p");
                // Unprefixed attribute has no namespace.
                assert_eq!(s.attributes[0].name.namespace_uri, "");
                assert_eq!(s.attributes[1].name.namespace_uri, "urn:p");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_self_closing_produces_start_end() {
        let events = read_document("<a><b/></a>").unwrap();
        let names: Vec<_> = events
            .iter()
            .filter_map(|e| e.element_name())
            .map(|q| q.local_name.clone())
            .collect();
        assert_eq!(names, ["a", "b", "b", "a"]);
    }

    #[test]
    fn test_doctype_rejected() {
        let xml = "<!DOCTYPE foo [<!ENTITY x \"y\">]><a>&x;</a>";
        assert!(read_document(xml).is_err());
    }

    #[test]
    fn test_undeclared_prefix_rejected() {
        assert!(read_document("<p:a/>").is_err());
    }

    #[test]
    fn test_text_and_entities() {
        let events = read_document("<a>x &amp; y</a>").unwrap();
        assert!(events.contains(&XmlEvent::Characters("x & y".into())));
    }
}
