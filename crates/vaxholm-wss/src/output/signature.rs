#![forbid(unsafe_code)]

//! Signature part selection and streaming digest computation.

use super::wsu_id;
use crate::chain::{ChainCursor, Processor, ProcessorId};
use crate::context::SignaturePartDef;
use crate::event::SecurityEvent;
use crate::properties::{SecurePart, SecurityProperties};
use tracing::debug;
use vaxholm_c14n::{C14nMode, Canonicalizer};
use vaxholm_core::{ns, Error, Result};
use vaxholm_crypto::digest::{self, DigestAlgorithm};
use vaxholm_xml::{NsContext, QName, XmlEvent};

struct ActiveDigest {
    digest: Box<dyn DigestAlgorithm>,
    canonicalizer: Canonicalizer,
    depth: usize,
    part_id: String,
    element: QName,
}

/// Selects configured message parts for signing, ensures they carry a
/// `wsu:Id`, and feeds each canonicalized subtree into a digest as the
/// events stream past. Parts may nest; every active digest sees the
/// events of its subtree. The finished digests become
/// [`SignaturePartDef`]s for the signature-ending processor; no subtree
/// is ever buffered.
pub struct SignatureProcessor {
    parts: Vec<SecurePart>,
    digest_uri: String,
    c14n_mode: C14nMode,
    after: Vec<ProcessorId>,
    ns: NsContext,
    active: Vec<ActiveDigest>,
}

impl SignatureProcessor {
    pub fn new(properties: &SecurityProperties, after: Vec<ProcessorId>) -> Result<Self> {
        let c14n_mode = C14nMode::from_uri(&properties.signature_c14n_algorithm).ok_or_else(|| {
            Error::UnsupportedAlgorithm(format!(
                "canonicalization: {}",
                properties.signature_c14n_algorithm
            ))
        })?;
        // Resolve the digest now so a bad URI fails at construction.
        digest::from_uri(&properties.signature_digest_algorithm)?;
        Ok(Self {
            parts: properties.signature_parts.clone(),
            digest_uri: properties.signature_digest_algorithm.clone(),
            c14n_mode,
            after,
            ns: NsContext::new(),
            active: Vec::new(),
        })
    }

    fn digest_event(&mut self, event: &XmlEvent) -> Result<()> {
        for active in &mut self.active {
            let mut buf = Vec::new();
            active.canonicalizer.transform(event, &mut buf)?;
            active.digest.update(&buf);
        }
        Ok(())
    }

    fn finalize_closed(&mut self, chain: &mut ChainCursor<'_>) {
        while self.active.last().is_some_and(|a| a.depth == 0) {
            let active = self.active.pop().expect("active digest");
            use base64::Engine;
            let digest_value =
                base64::engine::general_purpose::STANDARD.encode(active.digest.finalize());
            debug!(element = %active.element, id = %active.part_id, "part digest complete");
            chain.context_mut().add_signature_part(SignaturePartDef {
                id: active.part_id,
                digest_value,
                transform_uri: self.c14n_mode.uri().to_owned(),
                digest_uri: self.digest_uri.clone(),
            });
            chain
                .context_mut()
                .register_security_event(SecurityEvent::SignedElement {
                    element: active.element,
                    signed: true,
                });
        }
    }
}

impl Processor for SignatureProcessor {
    fn id(&self) -> ProcessorId {
        "signature"
    }

    fn run_after(&self) -> &[ProcessorId] {
        &self.after
    }

    fn process_event(&mut self, event: XmlEvent, chain: &mut ChainCursor<'_>) -> Result<()> {
        match event {
            XmlEvent::StartElement(start) => {
                let matched = self
                    .parts
                    .iter()
                    .any(|p| start.name.matches(&p.name.namespace_uri, &p.name.local_name));

                let mut start = start;
                if matched {
                    // Ancestor bindings seed the subtree canonicalizer.
                    let seed = self.ns.bindings();
                    let part_id = match start
                        .attributes
                        .iter()
                        .find(|a| a.name.matches(ns::WSU, ns::attr::ID))
                    {
                        Some(attr) => attr.value.clone(),
                        None => {
                            let id = chain.context_mut().next_id("id");
                            if !start.namespaces.iter().any(|d| d.prefix == ns::prefix::WSU) {
                                start = start.with_namespace(ns::prefix::WSU, ns::WSU);
                            }
                            start = start.with_attribute(wsu_id(), id.clone());
                            id
                        }
                    };
                    debug!(element = %start.name, part_id = %part_id, "signature part selected");
                    self.active.push(ActiveDigest {
                        digest: digest::from_uri(&self.digest_uri)?,
                        canonicalizer: Canonicalizer::with_context(self.c14n_mode, &[], &seed),
                        depth: 0,
                        part_id,
                        element: start.name.clone(),
                    });
                }

                let event = XmlEvent::StartElement(start);
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
                self.finalize_closed(chain);
                chain.forward(event)
            }
            XmlEvent::Characters(_) | XmlEvent::Comment(_) => {
                self.digest_event(&event)?;
                chain.forward(event)
            }
            other => chain.forward(other),
        }
    }
}
