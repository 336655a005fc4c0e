#![forbid(unsafe_code)]

//! Decryption of `<xenc:EncryptedData>` placeholders.

use crate::chain::{ChainCursor, Processor, ProcessorId};
use crate::event::{KeyUsage, SecurityEvent};
use crate::input::parse::build_tree;
use crate::properties::SecurityProperties;
use base64::Engine;
use tracing::debug;
use vaxholm_core::{ns, Error, Result};
use vaxholm_xml::reader::read_fragment;
use vaxholm_xml::{NsContext, QName, XmlEvent};

struct ActiveDecrypt {
    depth: usize,
    buffer: Vec<XmlEvent>,
    /// The element whose content was encrypted (the parent of the
    /// placeholder), for content-mode security events.
    parent: Option<QName>,
}

/// Swallows `<xenc:EncryptedData>` subtrees, decrypts the cipher text
/// with the referenced session key, re-parses the plaintext, and splices
/// the recovered events into the stream in place of the placeholder.
pub struct DecryptProcessor {
    properties: SecurityProperties,
    after: Vec<ProcessorId>,
    ns: NsContext,
    open_elements: Vec<QName>,
    active: Option<ActiveDecrypt>,
}

impl DecryptProcessor {
    pub fn new(properties: SecurityProperties) -> Self {
        Self {
            properties,
            after: vec!["security-header", "reference-verify"],
            ns: NsContext::new(),
            open_elements: Vec::new(),
            active: None,
        }
    }

    fn finalize(&mut self, active: ActiveDecrypt, chain: &mut ChainCursor<'_>) -> Result<()> {
        let tree = build_tree(&active.buffer, &self.ns.bindings())?;

        let cipher_uri = tree
            .child(ns::ENC, ns::node::ENCRYPTION_METHOD)
            .and_then(|m| m.attribute(ns::attr::ALGORITHM))
            .ok_or_else(|| Error::MissingElement("EncryptionMethod on EncryptedData".into()))?
            .to_owned();
        let enc_type = tree.attribute(ns::attr::TYPE).unwrap_or(ns::ENC_TYPE_ELEMENT);
        let content_mode = enc_type == ns::ENC_TYPE_CONTENT;
        let cipher_value = tree
            .child(ns::ENC, ns::node::CIPHER_DATA)
            .and_then(|cd| cd.child(ns::ENC, ns::node::CIPHER_VALUE))
            .ok_or_else(|| Error::MissingElement("CipherValue on EncryptedData".into()))?;
        let ciphertext = base64::engine::general_purpose::STANDARD
            .decode(cipher_value.trimmed_text())
            .map_err(|e| Error::Base64(format!("EncryptedData cipher value: {e}")))?;

        // The session key: referenced by the KeyInfo STR, or the
        // configured decryption token when no reference is present.
        let token_id = tree
            .child(ns::DSIG, ns::node::KEY_INFO)
            .and_then(|ki| ki.child(ns::WSSE, ns::node::SECURITY_TOKEN_REFERENCE))
            .and_then(|str_node| str_node.child(ns::WSSE, ns::node::WSSE_REFERENCE))
            .and_then(|r| r.attribute(ns::attr::URI))
            .and_then(|uri| uri.strip_prefix('#'))
            .map(str::to_owned)
            .or_else(|| self.properties.decryption_token.clone())
            .ok_or_else(|| Error::Key("no decryption key reference available".into()))?;
        let session_key = chain
            .context()
            .token(&token_id)
            .ok_or_else(|| Error::KeyNotFound(format!("token {token_id}")))?
            .secret_key()?
            .to_vec();

        let cipher = vaxholm_crypto::cipher::from_uri(&cipher_uri)?;
        let plaintext = cipher.decrypt(&session_key, &ciphertext)?;
        let plaintext = String::from_utf8(plaintext)
            .map_err(|e| Error::Decryption(format!("plaintext is not UTF-8: {e}")))?;
        let recovered = read_fragment(&plaintext)?;
        debug!(events = recovered.len(), content_mode, "encrypted part recovered");

        let element = if content_mode {
            active.parent.ok_or_else(|| {
                Error::XmlStructure("content-mode EncryptedData with no parent element".into())
            })?
        } else {
            recovered
                .iter()
                .find_map(|e| match e {
                    XmlEvent::StartElement(s) => Some(s.name.clone()),
                    _ => None,
                })
                .ok_or_else(|| Error::Decryption("recovered fragment has no element".into()))?
        };

        for event in recovered {
            chain.forward(event)?;
        }

        let context = chain.context_mut();
        context.register_security_event(SecurityEvent::ContentEncrypted {
            element,
            encrypted: true,
        });
        context.register_security_event(SecurityEvent::AlgorithmSuite {
            key_usage: KeyUsage::Enc,
            algorithm_uri: cipher_uri,
        });
        Ok(())
    }
}

impl Processor for DecryptProcessor {
    fn id(&self) -> ProcessorId {
        "decrypt"
    }

    fn run_after(&self) -> &[ProcessorId] {
        &self.after
    }

    fn process_event(&mut self, event: XmlEvent, chain: &mut ChainCursor<'_>) -> Result<()> {
        match event {
            XmlEvent::StartElement(ref start) => {
                if let Some(active) = &mut self.active {
                    active.depth += 1;
                    active.buffer.push(event);
                    return Ok(());
                }
                if start.name.matches(ns::ENC, ns::node::ENCRYPTED_DATA) {
                    self.active = Some(ActiveDecrypt {
                        depth: 1,
                        buffer: vec![event],
                        parent: self.open_elements.last().cloned(),
                    });
                    return Ok(());
                }
                self.ns.push(&start.namespaces);
                self.open_elements.push(start.name.clone());
                chain.forward(event)
            }
            XmlEvent::EndElement { .. } => {
                if let Some(active) = &mut self.active {
                    active.depth -= 1;
                    active.buffer.push(event);
                    if active.depth == 0 {
                        let active = self.active.take().expect("active decryption");
                        self.finalize(active, chain)?;
                    }
                    return Ok(());
                }
                self.ns.pop();
                self.open_elements.pop();
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
                        "document ended inside EncryptedData".into(),
                    ));
                }
                chain.forward(event)
            }
            other => chain.forward(other),
        }
    }
}
