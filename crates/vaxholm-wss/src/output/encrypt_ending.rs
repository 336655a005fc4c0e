#![forbid(unsafe_code)]

//! Encrypted-key emission.
//!
//! The second buffering "ending" processor: at document end it injects
//! the `<xenc:EncryptedKey>` (wrapped session key plus the
//! `<xenc:ReferenceList>` of encrypted parts) into the security header.
//! When the session key was established out of band only the bare
//! reference list is emitted.

use super::{algorithm_element, ds, text_element, xenc};
use crate::chain::{ChainCursor, Processor, ProcessorId};
use crate::event::{KeyUsage, SecurityEvent, TokenType};
use base64::Engine;
use tracing::debug;
use vaxholm_core::{algorithm, ns, Error, Result};
use vaxholm_xml::{QName, StartElement, XmlEvent};

/// The key-encryption key resolved at pipeline construction.
pub enum WrapKey {
    /// Key transport: the recipient's RSA public key, with issuer/serial
    /// for the `<ds:KeyInfo>` when known.
    Rsa {
        public_key: Box<rsa::RsaPublicKey>,
        issuer_serial: Option<(String, String)>,
    },
    /// Symmetric key wrap with a pre-shared key-encryption key.
    Kek(Vec<u8>),
    /// No wrapping: the session key was established out of band.
    None,
}

pub struct EncryptEndingProcessor {
    wrap_uri: String,
    wrap_key: WrapKey,
    session_key: Vec<u8>,
    /// Id of the emitted `EncryptedKey`; `None` when not wrapping.
    encrypted_key_id: Option<String>,
    buffer: Vec<XmlEvent>,
    security_end: Option<usize>,
    after: Vec<ProcessorId>,
}

impl EncryptEndingProcessor {
    pub fn new(
        wrap_uri: String,
        wrap_key: WrapKey,
        session_key: Vec<u8>,
        encrypted_key_id: Option<String>,
        after: Vec<ProcessorId>,
    ) -> Result<Self> {
        if encrypted_key_id.is_some() {
            match wrap_uri.as_str() {
                algorithm::RSA_PKCS1 | algorithm::RSA_OAEP => {
                    vaxholm_crypto::keytransport::from_uri(&wrap_uri)?;
                }
                _ => {
                    vaxholm_crypto::keywrap::from_uri(&wrap_uri)?;
                }
            }
        }
        Ok(Self {
            wrap_uri,
            wrap_key,
            session_key,
            encrypted_key_id,
            buffer: Vec::new(),
            security_end: None,
            after,
        })
    }

    fn wrap_session_key(&self) -> Result<(Vec<u8>, KeyUsage)> {
        match &self.wrap_key {
            WrapKey::Rsa { public_key, .. } => {
                let transport = vaxholm_crypto::keytransport::from_uri(&self.wrap_uri)?;
                Ok((
                    transport.encrypt(public_key, &self.session_key)?,
                    KeyUsage::AsymKeyWrap,
                ))
            }
            WrapKey::Kek(kek) => {
                let wrap = vaxholm_crypto::keywrap::from_uri(&self.wrap_uri)?;
                Ok((wrap.wrap(kek, &self.session_key)?, KeyUsage::SymKeyWrap))
            }
            WrapKey::None => Err(Error::Key(
                "no key-encryption key available to wrap the session key".into(),
            )),
        }
    }

    fn emit_reference_list(
        &self,
        chain: &mut ChainCursor<'_>,
        references: &[String],
        with_ns: bool,
    ) -> Result<()> {
        let mut start = StartElement::new(xenc(ns::node::REFERENCE_LIST));
        if with_ns {
            start = start.with_namespace(ns::prefix::ENC, ns::ENC);
        }
        chain.forward(XmlEvent::start(start))?;
        for id in references {
            chain.forward(XmlEvent::start(
                StartElement::new(xenc(ns::node::DATA_REFERENCE))
                    .with_attribute(QName::unqualified(ns::attr::URI), format!("#{id}")),
            ))?;
            chain.forward(XmlEvent::end(xenc(ns::node::DATA_REFERENCE)))?;
        }
        chain.forward(XmlEvent::end(xenc(ns::node::REFERENCE_LIST)))
    }

    fn flush(&mut self, chain: &mut ChainCursor<'_>) -> Result<()> {
        let end = self.security_end.ok_or_else(|| {
            Error::XmlStructure("no wsse:Security header to complete".into())
        })?;
        let buffer = std::mem::take(&mut self.buffer);
        for event in &buffer[..end] {
            chain.forward(event.clone())?;
        }

        let references = chain.context_mut().take_data_references();
        match self.encrypted_key_id.clone() {
            Some(ek_id) => {
                let (wrapped, wrap_usage) = self.wrap_session_key()?;
                let encoded = base64::engine::general_purpose::STANDARD.encode(&wrapped);
                debug!(id = %ek_id, parts = references.len(), "encrypted key emitted");

                chain.forward(XmlEvent::start(
                    StartElement::new(xenc(ns::node::ENCRYPTED_KEY))
                        .with_namespace(ns::prefix::ENC, ns::ENC)
                        .with_attribute(QName::unqualified(ns::attr::ID), ek_id.clone()),
                ))?;
                for event in algorithm_element(xenc(ns::node::ENCRYPTION_METHOD), &self.wrap_uri) {
                    chain.forward(event)?;
                }
                if let WrapKey::Rsa {
                    issuer_serial: Some((issuer, serial)),
                    ..
                } = &self.wrap_key
                {
                    chain.forward(XmlEvent::start(
                        StartElement::new(ds(ns::node::KEY_INFO))
                            .with_namespace(ns::prefix::DSIG, ns::DSIG),
                    ))?;
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
                    chain.forward(XmlEvent::end(ds(ns::node::KEY_INFO)))?;
                }
                chain.forward(XmlEvent::start(StartElement::new(xenc(ns::node::CIPHER_DATA))))?;
                for event in text_element(xenc(ns::node::CIPHER_VALUE), encoded) {
                    chain.forward(event)?;
                }
                chain.forward(XmlEvent::end(xenc(ns::node::CIPHER_DATA)))?;
                self.emit_reference_list(chain, &references, false)?;
                chain.forward(XmlEvent::end(xenc(ns::node::ENCRYPTED_KEY)))?;

                let context = chain.context_mut();
                context.register_security_event(SecurityEvent::TokenPresence {
                    token_type: TokenType::EncryptedKey,
                    id: ek_id,
                });
                context.register_security_event(SecurityEvent::AlgorithmSuite {
                    key_usage: wrap_usage,
                    algorithm_uri: self.wrap_uri.clone(),
                });
            }
            None => {
                if !references.is_empty() {
                    self.emit_reference_list(chain, &references, true)?;
                }
            }
        }

        for event in &buffer[end..] {
            chain.forward(event.clone())?;
        }
        Ok(())
    }
}

impl Processor for EncryptEndingProcessor {
    fn id(&self) -> ProcessorId {
        "encrypt-ending"
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
