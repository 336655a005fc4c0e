#![forbid(unsafe_code)]

//! Signature block emission.
//!
//! A buffering "ending" processor: collects every event that reaches it
//! (the collector phase), and when the document ends (the flush trigger)
//! replays the buffer with the complete `<ds:Signature>` block injected
//! just before `</wsse:Security>`. By flush time every selected part has
//! streamed past the signature processor, so all digests are final.

use super::{algorithm_element, ds, text_element, wsse, wsu_id};
use crate::chain::{ChainCursor, Processor, ProcessorId};
use crate::event::{KeyUsage, SecurityEvent, TokenType};
use base64::Engine;
use tracing::debug;
use vaxholm_c14n::{C14nMode, Canonicalizer};
use vaxholm_core::{ns, Error, Result};
use vaxholm_crypto::sign::{is_symmetric_uri, SignerStream, SigningKey};
use vaxholm_xml::{NsContext, NsDecl, QName, StartElement, XmlEvent};

/// Pre-resolved key identification material for `<ds:KeyInfo>`. Gathered
/// at pipeline construction so missing certificates fail before any
/// bytes are emitted.
pub enum KeyInfoData {
    IssuerSerial { issuer: String, serial: String },
    Ski { ski: Vec<u8> },
    X509 { cert: Vec<u8> },
    Thumbprint { thumbprint: Vec<u8> },
    BstEmbedded { cert: Vec<u8> },
    BstDirect { cert: Vec<u8> },
    TokenReference { token_id: String },
}

pub struct SignatureEndingProcessor {
    signature_uri: String,
    c14n_mode: C14nMode,
    key: SigningKey,
    key_info: KeyInfoData,
    buffer: Vec<XmlEvent>,
    security_end: Option<usize>,
    after: Vec<ProcessorId>,
}

impl SignatureEndingProcessor {
    pub fn new(
        signature_uri: String,
        c14n_mode: C14nMode,
        key: SigningKey,
        key_info: KeyInfoData,
    ) -> Result<Self> {
        // Resolve the signature algorithm now; an unknown URI must not
        // survive construction.
        vaxholm_crypto::sign::from_uri(&signature_uri)?;
        Ok(Self {
            signature_uri,
            c14n_mode,
            key,
            key_info,
            buffer: Vec::new(),
            security_end: None,
            after: vec!["signature"],
        })
    }

    fn flush(&mut self, chain: &mut ChainCursor<'_>) -> Result<()> {
        let end = self.security_end.ok_or_else(|| {
            Error::XmlStructure("no wsse:Security header to complete".into())
        })?;
        let buffer = std::mem::take(&mut self.buffer);

        for event in &buffer[..end] {
            chain.forward(event.clone())?;
        }
        let mut ambient = bindings_at_injection(&buffer[..end]);
        ambient.push(NsDecl::new(ns::prefix::DSIG, ns::DSIG));
        self.emit_signature(chain, &ambient)?;
        for event in &buffer[end..] {
            chain.forward(event.clone())?;
        }
        Ok(())
    }

    fn emit_signature(&mut self, chain: &mut ChainCursor<'_>, ambient: &[NsDecl]) -> Result<()> {
        let parts = chain.context_mut().take_signature_parts();
        if parts.is_empty() {
            return Err(Error::XmlStructure(
                "no signature parts were digested".into(),
            ));
        }
        let sig_id = chain.context_mut().next_id("Signature");
        let key_info_id = chain.context_mut().next_id("KeyId");
        let str_id = chain.context_mut().next_id("STRId");
        let cert_id = chain.context_mut().next_id("CertId");
        let engine = base64::engine::general_purpose::STANDARD;

        // Direct-reference BST precedes the signature in the header.
        if let KeyInfoData::BstDirect { cert } = &self.key_info {
            self.emit_bst(chain, &cert_id, &engine.encode(cert))?;
            chain
                .context_mut()
                .register_security_event(SecurityEvent::TokenPresence {
                    token_type: TokenType::X509,
                    id: cert_id.clone(),
                });
        }

        chain.forward(XmlEvent::start(
            StartElement::new(ds(ns::node::SIGNATURE))
                .with_namespace(ns::prefix::DSIG, ns::DSIG)
                .with_attribute(QName::unqualified(ns::attr::ID), sig_id.clone()),
        ))?;

        // SignedInfo is canonicalized into the signer as it is emitted.
        let mut signed_info = Vec::new();
        signed_info.push(XmlEvent::start(StartElement::new(ds(ns::node::SIGNED_INFO))));
        signed_info.extend(algorithm_element(
            ds(ns::node::CANONICALIZATION_METHOD),
            self.c14n_mode.uri(),
        ));
        signed_info.extend(algorithm_element(
            ds(ns::node::SIGNATURE_METHOD),
            &self.signature_uri,
        ));
        for part in &parts {
            signed_info.push(XmlEvent::start(
                StartElement::new(ds(ns::node::REFERENCE))
                    .with_attribute(QName::unqualified(ns::attr::URI), format!("#{}", part.id)),
            ));
            signed_info.push(XmlEvent::start(StartElement::new(ds(ns::node::TRANSFORMS))));
            signed_info.extend(algorithm_element(ds(ns::node::TRANSFORM), &part.transform_uri));
            signed_info.push(XmlEvent::end(ds(ns::node::TRANSFORMS)));
            signed_info.extend(algorithm_element(ds(ns::node::DIGEST_METHOD), &part.digest_uri));
            signed_info.extend(text_element(ds(ns::node::DIGEST_VALUE), part.digest_value.clone()));
            signed_info.push(XmlEvent::end(ds(ns::node::REFERENCE)));
        }
        signed_info.push(XmlEvent::end(ds(ns::node::SIGNED_INFO)));

        let mut signer = SignerStream::new(&self.signature_uri, self.key.clone())?;
        let mut canonicalizer = Canonicalizer::with_context(self.c14n_mode, &[], ambient);
        for event in &signed_info {
            let mut canonical = Vec::new();
            canonicalizer.transform(event, &mut canonical)?;
            signer.update(&canonical);
        }
        let signature_value = signer.sign()?;
        debug!(id = %sig_id, bytes = signature_value.len(), "signature computed");

        for event in signed_info {
            chain.forward(event)?;
        }
        for event in text_element(ds(ns::node::SIGNATURE_VALUE), engine.encode(&signature_value)) {
            chain.forward(event)?;
        }

        // KeyInfo with the configured SecurityTokenReference shape.
        chain.forward(XmlEvent::start(
            StartElement::new(ds(ns::node::KEY_INFO))
                .with_attribute(QName::unqualified(ns::attr::ID), key_info_id),
        ))?;
        chain.forward(XmlEvent::start(
            StartElement::new(wsse(ns::node::SECURITY_TOKEN_REFERENCE))
                .with_attribute(wsu_id(), str_id),
        ))?;
        match &self.key_info {
            KeyInfoData::IssuerSerial { issuer, serial } => {
                chain.forward(XmlEvent::start(StartElement::new(ds(ns::node::X509_DATA))))?;
                chain.forward(XmlEvent::start(StartElement::new(ds(
                    ns::node::X509_ISSUER_SERIAL,
                ))))?;
                for event in text_element(ds(ns::node::X509_ISSUER_NAME), issuer.clone()) {
                    chain.forward(event)?;
                }
                for event in text_element(ds(ns::node::X509_SERIAL_NUMBER), serial.clone()) {
                    chain.forward(event)?;
                }
                chain.forward(XmlEvent::end(ds(ns::node::X509_ISSUER_SERIAL)))?;
                chain.forward(XmlEvent::end(ds(ns::node::X509_DATA)))?;
            }
            KeyInfoData::Ski { ski } => {
                self.emit_key_identifier(chain, ns::X509_SKI_TYPE, &engine.encode(ski))?;
            }
            KeyInfoData::X509 { cert } => {
                self.emit_key_identifier(chain, ns::X509_V3_TYPE, &engine.encode(cert))?;
            }
            KeyInfoData::Thumbprint { thumbprint } => {
                self.emit_key_identifier(chain, ns::THUMBPRINT_TYPE, &engine.encode(thumbprint))?;
            }
            KeyInfoData::BstEmbedded { cert } => {
                chain.forward(XmlEvent::start(
                    StartElement::new(wsse(ns::node::WSSE_REFERENCE))
                        .with_attribute(QName::unqualified(ns::attr::URI), format!("#{cert_id}"))
                        .with_attribute(QName::unqualified(ns::attr::VALUE_TYPE), ns::X509_V3_TYPE),
                ))?;
                self.emit_bst(chain, &cert_id, &engine.encode(cert))?;
                chain.forward(XmlEvent::end(wsse(ns::node::WSSE_REFERENCE)))?;
            }
            KeyInfoData::BstDirect { .. } => {
                chain.forward(XmlEvent::start(
                    StartElement::new(wsse(ns::node::WSSE_REFERENCE))
                        .with_attribute(QName::unqualified(ns::attr::URI), format!("#{cert_id}"))
                        .with_attribute(QName::unqualified(ns::attr::VALUE_TYPE), ns::X509_V3_TYPE),
                ))?;
                chain.forward(XmlEvent::end(wsse(ns::node::WSSE_REFERENCE)))?;
            }
            KeyInfoData::TokenReference { token_id } => {
                chain.forward(XmlEvent::start(
                    StartElement::new(wsse(ns::node::WSSE_REFERENCE))
                        .with_attribute(QName::unqualified(ns::attr::URI), format!("#{token_id}"))
                        .with_attribute(
                            QName::unqualified(ns::attr::VALUE_TYPE),
                            ns::USERNAMETOKEN_TYPE,
                        ),
                ))?;
                chain.forward(XmlEvent::end(wsse(ns::node::WSSE_REFERENCE)))?;
            }
        }
        chain.forward(XmlEvent::end(wsse(ns::node::SECURITY_TOKEN_REFERENCE)))?;
        chain.forward(XmlEvent::end(ds(ns::node::KEY_INFO)))?;
        chain.forward(XmlEvent::end(ds(ns::node::SIGNATURE)))?;

        // Security facts established by this block.
        let context = chain.context_mut();
        context.register_security_event(SecurityEvent::SignatureValue {
            value: signature_value,
        });
        context.register_security_event(SecurityEvent::AlgorithmSuite {
            key_usage: KeyUsage::C14n,
            algorithm_uri: self.c14n_mode.uri().to_owned(),
        });
        context.register_security_event(SecurityEvent::AlgorithmSuite {
            key_usage: if is_symmetric_uri(&self.signature_uri) {
                KeyUsage::SymSig
            } else {
                KeyUsage::AsymSig
            },
            algorithm_uri: self.signature_uri.clone(),
        });
        for part in &parts {
            context.register_security_event(SecurityEvent::AlgorithmSuite {
                key_usage: KeyUsage::Dig,
                algorithm_uri: part.digest_uri.clone(),
            });
        }
        Ok(())
    }

    fn emit_key_identifier(
        &self,
        chain: &mut ChainCursor<'_>,
        value_type: &str,
        encoded: &str,
    ) -> Result<()> {
        chain.forward(XmlEvent::start(
            StartElement::new(wsse(ns::node::KEY_IDENTIFIER))
                .with_attribute(QName::unqualified(ns::attr::ENCODING_TYPE), ns::BASE64_ENCODING)
                .with_attribute(QName::unqualified(ns::attr::VALUE_TYPE), value_type),
        ))?;
        chain.forward(XmlEvent::text(encoded))?;
        chain.forward(XmlEvent::end(wsse(ns::node::KEY_IDENTIFIER)))
    }

    fn emit_bst(&self, chain: &mut ChainCursor<'_>, id: &str, encoded: &str) -> Result<()> {
        chain.forward(XmlEvent::start(
            StartElement::new(wsse(ns::node::BINARY_SECURITY_TOKEN))
                .with_attribute(QName::unqualified(ns::attr::ENCODING_TYPE), ns::BASE64_ENCODING)
                .with_attribute(QName::unqualified(ns::attr::VALUE_TYPE), ns::X509_V3_TYPE)
                .with_attribute(wsu_id(), id),
        ))?;
        chain.forward(XmlEvent::text(encoded))?;
        chain.forward(XmlEvent::end(wsse(ns::node::BINARY_SECURITY_TOKEN)))
    }
}

/// Namespace bindings in scope at the injection point, replayed from the
/// buffered prefix of the document.
fn bindings_at_injection(events: &[XmlEvent]) -> Vec<NsDecl> {
    let mut ns = NsContext::new();
    for event in events {
        match event {
            XmlEvent::StartElement(start) => ns.push(&start.namespaces),
            XmlEvent::EndElement { .. } => ns.pop(),
            _ => {}
        }
    }
    ns.bindings()
}

impl Processor for SignatureEndingProcessor {
    fn id(&self) -> ProcessorId {
        "signature-ending"
    }

    fn run_after(&self) -> &[ProcessorId] {
        &self.after
    }

    fn process_event(&mut self, event: XmlEvent, chain: &mut ChainCursor<'_>) -> Result<()> {
        match event {
            XmlEvent::EndDocument => {
                self.buffer.push(XmlEvent::EndDocument);
                self.flush(chain)
            }
            XmlEvent::EndElement { ref name }
                if self.security_end.is_none() && name.matches(ns::WSSE, ns::node::SECURITY) =>
            {
                self.security_end = Some(self.buffer.len());
                self.buffer.push(event);
                Ok(())
            }
            other => {
                self.buffer.push(other);
                Ok(())
            }
        }
    }
}
