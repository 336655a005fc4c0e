#![forbid(unsafe_code)]

//! Reference digest verification.

use crate::chain::{ChainCursor, Processor, ProcessorId};
use crate::event::SecurityEvent;
use base64::Engine;
use tracing::debug;
use vaxholm_c14n::{C14nMode, Canonicalizer};
use vaxholm_core::{ns, Error, Result};
use vaxholm_crypto::digest::{self, DigestAlgorithm};
use vaxholm_xml::{NsContext, QName, XmlEvent};

struct ActiveVerify {
    digest: Box<dyn DigestAlgorithm>,
    canonicalizer: Canonicalizer,
    depth: usize,
    reference_id: String,
    expected: String,
    element: QName,
}

/// Streams referenced subtrees through canonicalization and digest as
/// they pass, comparing against the `<ds:DigestValue>` the security
/// header promised. References may target nested elements; each active
/// digest covers its own subtree. A mismatch is fatal; a verified part
/// becomes a `SignedElement` security event. References whose targets
/// never appear fail at end of stream.
pub struct ReferenceVerifyProcessor {
    after: Vec<ProcessorId>,
    ns: NsContext,
    active: Vec<ActiveVerify>,
}

impl ReferenceVerifyProcessor {
    pub fn new() -> Self {
        Self {
            after: vec!["security-header"],
            ns: NsContext::new(),
            active: Vec::new(),
        }
    }

    fn digest_event(&mut self, event: &XmlEvent) -> Result<()> {
        for active in &mut self.active {
            let mut buf = Vec::new();
            active.canonicalizer.transform(event, &mut buf)?;
            active.digest.update(&buf);
        }
        Ok(())
    }

    fn finalize_closed(&mut self, chain: &mut ChainCursor<'_>) -> Result<()> {
        while self.active.last().is_some_and(|a| a.depth == 0) {
            let active = self.active.pop().expect("active verify");
            let computed =
                base64::engine::general_purpose::STANDARD.encode(active.digest.finalize());
            if computed != active.expected {
                return Err(Error::DigestMismatch(format!(
                    "{} ({})",
                    active.reference_id, active.element
                )));
            }
            debug!(id = %active.reference_id, element = %active.element, "reference digest verified");
            chain
                .context_mut()
                .register_security_event(SecurityEvent::SignedElement {
                    element: active.element,
                    signed: true,
                });
        }
        Ok(())
    }

    fn id_attribute(start: &vaxholm_xml::StartElement) -> Option<&str> {
        start
            .attributes
            .iter()
            .find(|a| a.name.matches(ns::WSU, ns::attr::ID))
            .or_else(|| {
                start
                    .attributes
                    .iter()
                    .find(|a| a.name.namespace_uri.is_empty() && a.name.local_name == ns::attr::ID)
            })
            .map(|a| a.value.as_str())
    }
}

impl Default for ReferenceVerifyProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for ReferenceVerifyProcessor {
    fn id(&self) -> ProcessorId {
        "reference-verify"
    }

    fn run_after(&self) -> &[ProcessorId] {
        &self.after
    }

    fn process_event(&mut self, event: XmlEvent, chain: &mut ChainCursor<'_>) -> Result<()> {
        match event {
            XmlEvent::StartElement(ref start) => {
                let pending = Self::id_attribute(start)
                    .and_then(|id| chain.context_mut().take_pending_reference(id));
                if let Some(reference) = pending {
                    let mode = C14nMode::from_uri(&reference.c14n_uri).ok_or_else(|| {
                        Error::UnsupportedAlgorithm(format!("transform: {}", reference.c14n_uri))
                    })?;
                    let seed = self.ns.bindings();
                    debug!(id = %reference.id, element = %start.name, "verifying reference digest");
                    self.active.push(ActiveVerify {
                        digest: digest::from_uri(&reference.digest_uri)?,
                        canonicalizer: Canonicalizer::with_context(mode, &[], &seed),
                        depth: 0,
                        reference_id: reference.id,
                        expected: reference.digest_value,
                        element: start.name.clone(),
                    });
                }
                self.digest_event(&event)?;
                for active in &mut self.active {
                    active.depth += 1;
                }
                if let XmlEvent::StartElement(ref s) = event {
                    self.ns.push(&s.namespaces);
                }
                chain.forward(event)
            }
            XmlEvent::EndElement { .. } => {
                self.ns.pop();
                self.digest_event(&event)?;
                for active in &mut self.active {
                    active.depth -= 1;
                }
                self.finalize_closed(chain)?;
                chain.forward(event)
            }
            XmlEvent::Characters(_) | XmlEvent::Comment(_) => {
                self.digest_event(&event)?;
                chain.forward(event)
            }
            XmlEvent::EndDocument => {
                let unresolved = chain.context_mut().pending_reference_ids();
                if !unresolved.is_empty() {
                    return Err(Error::MissingElement(format!(
                        "signed reference target(s) never appeared: {}",
                        unresolved.join(", ")
                    )));
                }
                chain.forward(event)
            }
            other => chain.forward(other),
        }
    }
}
