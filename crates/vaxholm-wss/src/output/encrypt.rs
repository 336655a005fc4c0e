#![forbid(unsafe_code)]

//! Encryption of selected message parts.

use super::{algorithm_element, ds, text_element, wsse, xenc};
use crate::chain::{ChainCursor, Processor, ProcessorId};
use crate::event::{KeyUsage, SecurityEvent};
use crate::properties::{SecurePart, SecurityProperties};
use base64::Engine;
use tracing::debug;
use vaxholm_core::{ns, Error, Result};
use vaxholm_xml::writer::fragment_to_string;
use vaxholm_xml::{NsContext, NsDecl, QName, StartElement, XmlEvent};

struct ActiveEncrypt {
    part: SecurePart,
    apex: QName,
    depth: usize,
    buffer: Vec<XmlEvent>,
    seed: Vec<NsDecl>,
}

/// Replaces configured subtrees (or their content) with
/// `<xenc:EncryptedData>` placeholders carrying the base64 cipher text.
/// The subtree events are held only long enough to serialize and encrypt
/// them, then dropped.
pub struct EncryptProcessor {
    parts: Vec<SecurePart>,
    cipher_uri: String,
    session_key: Vec<u8>,
    /// Id of the `<xenc:EncryptedKey>` (or out-of-band token) the
    /// `<ds:KeyInfo>` reference points at.
    key_reference_id: String,
    after: Vec<ProcessorId>,
    ns: NsContext,
    active: Option<ActiveEncrypt>,
}

impl EncryptProcessor {
    pub fn new(
        properties: &SecurityProperties,
        session_key: Vec<u8>,
        key_reference_id: String,
        after: Vec<ProcessorId>,
    ) -> Result<Self> {
        // Resolve the cipher now; unknown URIs fail construction.
        let cipher = vaxholm_crypto::cipher::from_uri(&properties.encryption_algorithm)?;
        if session_key.len() != cipher.key_size() {
            return Err(Error::Key(format!(
                "session key is {} bytes, cipher {} needs {}",
                session_key.len(),
                properties.encryption_algorithm,
                cipher.key_size()
            )));
        }
        Ok(Self {
            parts: properties.encryption_parts.clone(),
            cipher_uri: properties.encryption_algorithm.clone(),
            session_key,
            key_reference_id,
            after,
            ns: NsContext::new(),
            active: None,
        })
    }

    fn finalize_part(&mut self, active: ActiveEncrypt, chain: &mut ChainCursor<'_>) -> Result<()> {
        let plaintext = fragment_to_string(&active.buffer, &active.seed);
        let cipher = vaxholm_crypto::cipher::from_uri(&self.cipher_uri)?;
        let ciphertext = cipher.encrypt(&self.session_key, plaintext.as_bytes())?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(&ciphertext);

        let ed_id = chain.context_mut().next_id("ED");
        debug!(element = %active.apex, id = %ed_id, content_only = active.part.content_only,
               "part encrypted");
        let enc_type = if active.part.content_only {
            ns::ENC_TYPE_CONTENT
        } else {
            ns::ENC_TYPE_ELEMENT
        };

        chain.forward(XmlEvent::start(
            StartElement::new(xenc(ns::node::ENCRYPTED_DATA))
                .with_namespace(ns::prefix::ENC, ns::ENC)
                .with_attribute(QName::unqualified(ns::attr::ID), ed_id.clone())
                .with_attribute(QName::unqualified(ns::attr::TYPE), enc_type),
        ))?;
        for event in algorithm_element(xenc(ns::node::ENCRYPTION_METHOD), &self.cipher_uri) {
            chain.forward(event)?;
        }
        chain.forward(XmlEvent::start(
            StartElement::new(ds(ns::node::KEY_INFO)).with_namespace(ns::prefix::DSIG, ns::DSIG),
        ))?;
        chain.forward(XmlEvent::start(
            StartElement::new(wsse(ns::node::SECURITY_TOKEN_REFERENCE))
                .with_namespace(ns::prefix::WSSE, ns::WSSE),
        ))?;
        chain.forward(XmlEvent::start(
            StartElement::new(wsse(ns::node::WSSE_REFERENCE)).with_attribute(
                QName::unqualified(ns::attr::URI),
                format!("#{}", self.key_reference_id),
            ),
        ))?;
        chain.forward(XmlEvent::end(wsse(ns::node::WSSE_REFERENCE)))?;
        chain.forward(XmlEvent::end(wsse(ns::node::SECURITY_TOKEN_REFERENCE)))?;
        chain.forward(XmlEvent::end(ds(ns::node::KEY_INFO)))?;
        chain.forward(XmlEvent::start(StartElement::new(xenc(ns::node::CIPHER_DATA))))?;
        for event in text_element(xenc(ns::node::CIPHER_VALUE), encoded) {
            chain.forward(event)?;
        }
        chain.forward(XmlEvent::end(xenc(ns::node::CIPHER_DATA)))?;
        chain.forward(XmlEvent::end(xenc(ns::node::ENCRYPTED_DATA)))?;

        let context = chain.context_mut();
        context.add_data_reference(ed_id);
        context.register_security_event(SecurityEvent::ContentEncrypted {
            element: active.apex,
            encrypted: true,
        });
        context.register_security_event(SecurityEvent::AlgorithmSuite {
            key_usage: KeyUsage::Enc,
            algorithm_uri: self.cipher_uri.clone(),
        });
        Ok(())
    }
}

impl Processor for EncryptProcessor {
    fn id(&self) -> ProcessorId {
        "encrypt"
    }

    fn run_after(&self) -> &[ProcessorId] {
        &self.after
    }

    fn process_event(&mut self, event: XmlEvent, chain: &mut ChainCursor<'_>) -> Result<()> {
        match event {
            XmlEvent::StartElement(start) => {
                self.ns.push(&start.namespaces);
                if let Some(active) = &mut self.active {
                    active.depth += 1;
                    active.buffer.push(XmlEvent::StartElement(start));
                    return Ok(());
                }
                let part = self
                    .parts
                    .iter()
                    .find(|p| start.name.matches(&p.name.namespace_uri, &p.name.local_name))
                    .cloned();
                match part {
                    None => chain.forward(XmlEvent::StartElement(start)),
                    Some(part) if part.content_only => {
                        // The element stays visible; its children are
                        // swallowed until the matching end tag.
                        let seed = self.ns.bindings();
                        self.active = Some(ActiveEncrypt {
                            part,
                            apex: start.name.clone(),
                            depth: 0,
                            buffer: Vec::new(),
                            seed,
                        });
                        chain.forward(XmlEvent::StartElement(start))
                    }
                    Some(part) => {
                        let mut seed = self.ns.bindings();
                        // The apex element's own declarations come with
                        // its buffered start event.
                        seed.retain(|d| !start.namespaces.iter().any(|o| o.prefix == d.prefix));
                        self.active = Some(ActiveEncrypt {
                            part,
                            apex: start.name.clone(),
                            depth: 1,
                            buffer: vec![XmlEvent::StartElement(start)],
                            seed,
                        });
                        Ok(())
                    }
                }
            }
            XmlEvent::EndElement { .. } => {
                self.ns.pop();
                if let Some(active) = &mut self.active {
                    if active.depth == 0 {
                        // Content mode: this closes the apex element.
                        let active = self.active.take().expect("active encryption");
                        self.finalize_part(active, chain)?;
                        return chain.forward(event);
                    }
                    active.depth -= 1;
                    active.buffer.push(event);
                    if active.depth == 0 && !active.part.content_only {
                        let active = self.active.take().expect("active encryption");
                        self.finalize_part(active, chain)?;
                    }
                    return Ok(());
                }
                chain.forward(event)
            }
            XmlEvent::Characters(_) | XmlEvent::Comment(_) => {
                if let Some(active) = &mut self.active {
                    active.buffer.push(event);
                    return Ok(());
                }
                chain.forward(event)
            }
            XmlEvent::EndDocument => {
                if self.active.is_some() {
                    return Err(Error::XmlStructure(
                        "document ended inside an encrypted part".into(),
                    ));
                }
                chain.forward(event)
            }
            other => chain.forward(other),
        }
    }
}
