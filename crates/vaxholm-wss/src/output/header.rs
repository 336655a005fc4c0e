#![forbid(unsafe_code)]

//! Security header insertion.

use super::wsse;
use crate::chain::{ChainCursor, Processor, ProcessorId};
use vaxholm_core::{ns, Error, Result};
use vaxholm_xml::{QName, StartElement, XmlEvent};

/// Inserts an empty `<wsse:Security>` element at the start of the SOAP
/// header (synthesizing the header when the envelope has none). The
/// ending processors later inject their content just before the closing
/// tag.
pub struct SecurityHeaderProcessor {
    envelope: Option<QName>,
    header_done: bool,
    depth: usize,
}

impl SecurityHeaderProcessor {
    pub fn new() -> Self {
        Self {
            envelope: None,
            header_done: false,
            depth: 0,
        }
    }

    fn security_element() -> StartElement {
        StartElement::new(wsse(ns::node::SECURITY))
            .with_namespace(ns::prefix::WSSE, ns::WSSE)
            .with_namespace(ns::prefix::WSU, ns::WSU)
    }

    fn emit_security(chain: &mut ChainCursor<'_>) -> Result<()> {
        chain.forward(XmlEvent::start(Self::security_element()))?;
        chain.forward(XmlEvent::end(wsse(ns::node::SECURITY)))
    }
}

impl Default for SecurityHeaderProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for SecurityHeaderProcessor {
    fn id(&self) -> ProcessorId {
        "security-header"
    }

    fn process_event(&mut self, event: XmlEvent, chain: &mut ChainCursor<'_>) -> Result<()> {
        match event {
            XmlEvent::StartElement(ref start) => {
                self.depth += 1;
                let soap_ns = |uri: &str| uri == ns::SOAP11 || uri == ns::SOAP12;
                if self.envelope.is_none()
                    && self.depth == 1
                    && start.name.local_name == ns::node::ENVELOPE
                    && soap_ns(&start.name.namespace_uri)
                {
                    self.envelope = Some(start.name.clone());
                    return chain.forward(event);
                }
                if let Some(envelope) = self.envelope.clone() {
                    if !self.header_done && self.depth == 2 {
                        if start.name.matches(&envelope.namespace_uri, ns::node::HEADER) {
                            self.header_done = true;
                            chain.forward(event)?;
                            return Self::emit_security(chain);
                        }
                        if start.name.matches(&envelope.namespace_uri, ns::node::BODY) {
                            // Envelope without a header: synthesize one.
                            self.header_done = true;
                            let header =
                                QName::new(&envelope.namespace_uri, &envelope.prefix, ns::node::HEADER);
                            chain.forward(XmlEvent::start(StartElement::new(header.clone())))?;
                            Self::emit_security(chain)?;
                            chain.forward(XmlEvent::end(header))?;
                            return chain.forward(event);
                        }
                    }
                }
                chain.forward(event)
            }
            XmlEvent::EndElement { .. } => {
                self.depth = self.depth.saturating_sub(1);
                chain.forward(event)
            }
            XmlEvent::EndDocument => {
                if self.envelope.is_none() {
                    return Err(Error::XmlStructure("no SOAP envelope in message".into()));
                }
                if !self.header_done {
                    return Err(Error::XmlStructure("SOAP envelope has no body".into()));
                }
                chain.forward(event)
            }
            other => chain.forward(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ProcessorChain;
    use crate::context::SecurityContext;
    use vaxholm_xml::reader::read_document;
    use vaxholm_xml::writer::events_to_string;

    fn run(xml: &str) -> Result<String> {
        let mut chain = ProcessorChain::new(
            vec![Box::new(SecurityHeaderProcessor::new())],
            SecurityContext::new(),
        )?;
        for event in read_document(xml)? {
            chain.process_event(event)?;
        }
        let (events, _) = chain.finish();
        Ok(events_to_string(&events))
    }

    #[test]
    fn test_security_inserted_into_existing_header() {
        let xml = r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/"><soap:Header><app:Tag xmlns:app="urn:app"></app:Tag></soap:Header><soap:Body></soap:Body></soap:Envelope>"#;
        let out = run(xml).unwrap();
        assert!(out.contains("<soap:Header><wsse:Security"));
        assert!(out.contains("</wsse:Security><app:Tag"));
    }

    #[test]
    fn test_header_synthesized_when_absent() {
        let xml = r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/"><soap:Body></soap:Body></soap:Envelope>"#;
        let out = run(xml).unwrap();
        assert!(out.contains("<soap:Header><wsse:Security"));
        assert!(out.contains("</soap:Header><soap:Body>"));
    }

    #[test]
    fn test_non_soap_rejected() {
        assert!(run("<not-soap></not-soap>").is_err());
    }
}
