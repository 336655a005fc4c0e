#![forbid(unsafe_code)]

//! Security header detection, parsing, and signature verification.

use crate::chain::{ChainCursor, Processor, ProcessorId};
use crate::context::PendingReference;
use crate::event::{KeyUsage, SecurityEvent, TokenType};
use crate::input::parse::{build_tree, ElementNode};
use crate::properties::SecurityProperties;
use base64::Engine;
use std::sync::Arc;
use tracing::debug;
use vaxholm_c14n::{C14nMode, Canonicalizer};
use vaxholm_core::{algorithm, ns, Error, Result};
use vaxholm_crypto::sign::{is_symmetric_uri, SignerStream, SigningKey};
use vaxholm_keys::crypto::CertSelector;
use vaxholm_keys::{Crypto, SecurityToken};
use vaxholm_xml::{NsContext, NsDecl, XmlEvent};

/// Detects the `<wsse:Security>` header, buffers it as events until its
/// end tag (the inbound chain's one synchronous buffering boundary),
/// then parses tokens, encrypted keys, and signatures out of it, verifies
/// the `SignatureValue` over the canonicalized `SignedInfo`, and replays
/// the buffered events downstream. References found in `SignedInfo`
/// become pending references the reference-verify processor consumes.
pub struct SecurityHeaderInputProcessor {
    properties: SecurityProperties,
    crypto: Arc<dyn Crypto>,
    ns: NsContext,
    buffer: Vec<XmlEvent>,
    /// Bindings in scope just above the Security element.
    seed: Vec<NsDecl>,
    buffering: bool,
    buffer_depth: usize,
    seen_security: bool,
}

impl SecurityHeaderInputProcessor {
    pub fn new(properties: SecurityProperties, crypto: Arc<dyn Crypto>) -> Self {
        Self {
            properties,
            crypto,
            ns: NsContext::new(),
            buffer: Vec::new(),
            seed: Vec::new(),
            buffering: false,
            buffer_depth: 0,
            seen_security: false,
        }
    }

    fn handle_security_header(&mut self, chain: &mut ChainCursor<'_>) -> Result<()> {
        self.seen_security = true;
        let buffer = std::mem::take(&mut self.buffer);
        let header = build_tree(&buffer, &self.seed)?;
        debug!(children = header.children.len(), "security header parsed");

        for bst in header.children_named(ns::WSSE, ns::node::BINARY_SECURITY_TOKEN) {
            self.process_binary_security_token(bst, chain)?;
        }
        for encrypted_key in header.children_named(ns::ENC, ns::node::ENCRYPTED_KEY) {
            self.process_encrypted_key(encrypted_key, chain)?;
        }
        for signature in header.children_named(ns::DSIG, ns::node::SIGNATURE) {
            self.process_signature(signature, &buffer, chain)?;
        }

        for event in buffer {
            chain.forward(event)?;
        }
        Ok(())
    }

    fn process_binary_security_token(
        &self,
        bst: &ElementNode,
        chain: &mut ChainCursor<'_>,
    ) -> Result<()> {
        let id = match bst.id_attribute() {
            Some(id) => id.to_owned(),
            None => return Ok(()),
        };
        let der = base64::engine::general_purpose::STANDARD
            .decode(bst.trimmed_text())
            .map_err(|e| Error::Base64(format!("BinarySecurityToken {id}: {e}")))?;
        let context = chain.context_mut();
        context.register_token(SecurityToken::from_certificates(id.clone(), vec![der]));
        context.register_security_event(SecurityEvent::TokenPresence {
            token_type: TokenType::X509,
            id,
        });
        Ok(())
    }

    fn process_encrypted_key(
        &self,
        encrypted_key: &ElementNode,
        chain: &mut ChainCursor<'_>,
    ) -> Result<()> {
        let wrap_uri = encrypted_key
            .child(ns::ENC, ns::node::ENCRYPTION_METHOD)
            .and_then(|m| m.attribute(ns::attr::ALGORITHM))
            .ok_or_else(|| Error::MissingElement("EncryptionMethod on EncryptedKey".into()))?
            .to_owned();
        let cipher_value = encrypted_key
            .child(ns::ENC, ns::node::CIPHER_DATA)
            .and_then(|cd| cd.child(ns::ENC, ns::node::CIPHER_VALUE))
            .ok_or_else(|| Error::MissingElement("CipherValue on EncryptedKey".into()))?;
        let wrapped = base64::engine::general_purpose::STANDARD
            .decode(cipher_value.trimmed_text())
            .map_err(|e| Error::Base64(format!("EncryptedKey cipher value: {e}")))?;

        let (session_key, wrap_usage) = match wrap_uri.as_str() {
            algorithm::RSA_PKCS1 | algorithm::RSA_OAEP => {
                let alias = self.properties.encryption_user.as_deref().ok_or_else(|| {
                    Error::Key("no decryption user configured for EncryptedKey".into())
                })?;
                let password = self.properties.decryption_password.as_deref().unwrap_or("");
                let SigningKey::Rsa(private_key) = self.crypto.private_key(alias, password)?
                else {
                    return Err(Error::Key(format!("alias {alias} is not an RSA key")));
                };
                let transport = vaxholm_crypto::keytransport::from_uri(&wrap_uri)?;
                (
                    transport.decrypt(&private_key, &wrapped)?,
                    KeyUsage::AsymKeyWrap,
                )
            }
            _ => {
                let token_id = self.properties.encryption_token.as_deref().ok_or_else(|| {
                    Error::Key("no key-encryption token configured for EncryptedKey".into())
                })?;
                let kek = chain
                    .context()
                    .token(token_id)
                    .ok_or_else(|| Error::KeyNotFound(format!("token {token_id}")))?
                    .secret_key()?
                    .to_vec();
                let wrap = vaxholm_crypto::keywrap::from_uri(&wrap_uri)?;
                (wrap.unwrap(&kek, &wrapped)?, KeyUsage::SymKeyWrap)
            }
        };

        let id = match encrypted_key.id_attribute() {
            Some(id) => id.to_owned(),
            None => chain.context_mut().next_id("EK"),
        };
        debug!(id = %id, "session key unwrapped");
        let context = chain.context_mut();
        context.register_token(SecurityToken::from_secret(id.clone(), session_key));
        context.register_security_event(SecurityEvent::TokenPresence {
            token_type: TokenType::EncryptedKey,
            id,
        });
        context.register_security_event(SecurityEvent::AlgorithmSuite {
            key_usage: wrap_usage,
            algorithm_uri: wrap_uri,
        });
        Ok(())
    }

    fn process_signature(
        &self,
        signature: &ElementNode,
        buffer: &[XmlEvent],
        chain: &mut ChainCursor<'_>,
    ) -> Result<()> {
        let signed_info = signature
            .child(ns::DSIG, ns::node::SIGNED_INFO)
            .ok_or_else(|| Error::MissingElement("SignedInfo".into()))?;

        let c14n_uri = signed_info
            .child(ns::DSIG, ns::node::CANONICALIZATION_METHOD)
            .and_then(|m| m.attribute(ns::attr::ALGORITHM))
            .ok_or_else(|| Error::MissingElement("CanonicalizationMethod".into()))?
            .to_owned();
        let c14n_mode = C14nMode::from_uri(&c14n_uri)
            .ok_or_else(|| Error::UnsupportedAlgorithm(format!("canonicalization: {c14n_uri}")))?;
        let signature_uri = signed_info
            .child(ns::DSIG, ns::node::SIGNATURE_METHOD)
            .and_then(|m| m.attribute(ns::attr::ALGORITHM))
            .ok_or_else(|| Error::MissingElement("SignatureMethod".into()))?
            .to_owned();

        let mut digest_uris = Vec::new();
        for reference in signed_info.children_named(ns::DSIG, ns::node::REFERENCE) {
            let uri = reference
                .attribute(ns::attr::URI)
                .ok_or_else(|| Error::MissingAttribute("URI on Reference".into()))?;
            let id = uri
                .strip_prefix('#')
                .ok_or_else(|| Error::InvalidUri(format!("unsupported reference URI: {uri}")))?;
            let digest_uri = reference
                .child(ns::DSIG, ns::node::DIGEST_METHOD)
                .and_then(|m| m.attribute(ns::attr::ALGORITHM))
                .ok_or_else(|| Error::MissingElement("DigestMethod".into()))?
                .to_owned();
            vaxholm_crypto::digest::from_uri(&digest_uri)?;
            let transform_uri = reference
                .child(ns::DSIG, ns::node::TRANSFORMS)
                .and_then(|t| t.child(ns::DSIG, ns::node::TRANSFORM))
                .and_then(|t| t.attribute(ns::attr::ALGORITHM))
                .unwrap_or(&c14n_uri)
                .to_owned();
            let digest_value = reference
                .child(ns::DSIG, ns::node::DIGEST_VALUE)
                .map(|v| v.trimmed_text())
                .ok_or_else(|| Error::MissingElement("DigestValue".into()))?;
            chain.context_mut().add_pending_reference(PendingReference {
                id: id.to_owned(),
                digest_uri: digest_uri.clone(),
                c14n_uri: transform_uri,
                digest_value,
            });
            digest_uris.push(digest_uri);
        }

        let signature_value = signature
            .child(ns::DSIG, ns::node::SIGNATURE_VALUE)
            .map(|v| v.trimmed_text())
            .ok_or_else(|| Error::MissingElement("SignatureValue".into()))?;
        let signature_bytes = base64::engine::general_purpose::STANDARD
            .decode(&signature_value)
            .map_err(|e| Error::Base64(format!("SignatureValue: {e}")))?;

        let key = self.resolve_verification_key(signature, chain)?;

        // Verify SignatureValue over the canonicalized raw SignedInfo
        // events, exactly as they arrived.
        let (start, end) = signed_info.range;
        let mut canonicalizer = Canonicalizer::with_context(c14n_mode, &[], &signature.inscope);
        let mut signer = SignerStream::new(&signature_uri, key)?;
        for event in &buffer[start..=end] {
            let mut canonical = Vec::new();
            canonicalizer.transform(event, &mut canonical)?;
            signer.update(&canonical);
        }
        if !signer.verify(&signature_bytes)? {
            return Err(Error::SignatureInvalid(
                "SignatureValue does not match SignedInfo".into(),
            ));
        }
        debug!("signature value verified");

        let context = chain.context_mut();
        context.register_security_event(SecurityEvent::AlgorithmSuite {
            key_usage: KeyUsage::C14n,
            algorithm_uri: c14n_uri,
        });
        context.register_security_event(SecurityEvent::AlgorithmSuite {
            key_usage: if is_symmetric_uri(&signature_uri) {
                KeyUsage::SymSig
            } else {
                KeyUsage::AsymSig
            },
            algorithm_uri: signature_uri,
        });
        for digest_uri in digest_uris {
            context.register_security_event(SecurityEvent::AlgorithmSuite {
                key_usage: KeyUsage::Dig,
                algorithm_uri: digest_uri,
            });
        }
        context.register_security_event(SecurityEvent::SignatureValue {
            value: signature_bytes,
        });
        Ok(())
    }

    /// Resolve the verification key from the `SecurityTokenReference`
    /// inside `<ds:KeyInfo>`.
    fn resolve_verification_key(
        &self,
        signature: &ElementNode,
        chain: &mut ChainCursor<'_>,
    ) -> Result<SigningKey> {
        let key_info = signature
            .child(ns::DSIG, ns::node::KEY_INFO)
            .ok_or_else(|| Error::MissingElement("KeyInfo".into()))?;
        let str_node = key_info
            .child(ns::WSSE, ns::node::SECURITY_TOKEN_REFERENCE)
            .ok_or_else(|| {
                Error::UnsupportedKeyIdentifier("KeyInfo without SecurityTokenReference".into())
            })?;

        if let Some(reference) = str_node.child(ns::WSSE, ns::node::WSSE_REFERENCE) {
            // Direct reference: a token registered earlier in the header
            // (BST or out-of-band) or embedded right here.
            if let Some(bst) = reference.child(ns::WSSE, ns::node::BINARY_SECURITY_TOKEN) {
                let der = base64::engine::general_purpose::STANDARD
                    .decode(bst.trimmed_text())
                    .map_err(|e| Error::Base64(format!("embedded token: {e}")))?;
                return self.crypto.public_key(&der);
            }
            let uri = reference
                .attribute(ns::attr::URI)
                .ok_or_else(|| Error::MissingAttribute("URI on Reference".into()))?;
            let id = uri
                .strip_prefix('#')
                .ok_or_else(|| Error::InvalidUri(format!("token reference: {uri}")))?;
            let token = chain
                .context()
                .token(id)
                .ok_or_else(|| Error::KeyNotFound(format!("referenced token: {id}")))?;
            return match token.certificates().first() {
                Some(cert) => self.crypto.public_key(cert),
                None => token.signing_key(),
            };
        }

        if let Some(identifier) = str_node.child(ns::WSSE, ns::node::KEY_IDENTIFIER) {
            let value_type = identifier.attribute(ns::attr::VALUE_TYPE).unwrap_or("");
            let data = base64::engine::general_purpose::STANDARD
                .decode(identifier.trimmed_text())
                .map_err(|e| Error::Base64(format!("KeyIdentifier: {e}")))?;
            let selector = match value_type {
                ns::X509_V3_TYPE => return self.crypto.public_key(&data),
                ns::X509_SKI_TYPE => CertSelector::Ski(data),
                ns::THUMBPRINT_TYPE => CertSelector::Thumbprint(data),
                other => {
                    return Err(Error::UnsupportedKeyIdentifier(format!(
                        "KeyIdentifier ValueType: {other}"
                    )))
                }
            };
            let chain_der = self.crypto.certificates(&selector)?;
            let leaf = chain_der
                .first()
                .ok_or_else(|| Error::Certificate("identifier matched an empty chain".into()))?;
            return self.crypto.public_key(leaf);
        }

        if let Some(x509_data) = str_node.child(ns::DSIG, ns::node::X509_DATA) {
            let issuer_serial = x509_data
                .child(ns::DSIG, ns::node::X509_ISSUER_SERIAL)
                .ok_or_else(|| Error::MissingElement("X509IssuerSerial".into()))?;
            let issuer = issuer_serial
                .child(ns::DSIG, ns::node::X509_ISSUER_NAME)
                .map(|n| n.text.trim().to_owned())
                .ok_or_else(|| Error::MissingElement("X509IssuerName".into()))?;
            let serial = issuer_serial
                .child(ns::DSIG, ns::node::X509_SERIAL_NUMBER)
                .map(|n| n.text.trim().to_owned())
                .ok_or_else(|| Error::MissingElement("X509SerialNumber".into()))?;
            let chain_der = self
                .crypto
                .certificates(&CertSelector::IssuerSerial(issuer, serial))?;
            let leaf = chain_der
                .first()
                .ok_or_else(|| Error::Certificate("issuer/serial matched an empty chain".into()))?;
            return self.crypto.public_key(leaf);
        }

        Err(Error::UnsupportedKeyIdentifier(
            "unrecognized SecurityTokenReference content".into(),
        ))
    }
}

impl Processor for SecurityHeaderInputProcessor {
    fn id(&self) -> ProcessorId {
        "security-header"
    }

    fn process_event(&mut self, event: XmlEvent, chain: &mut ChainCursor<'_>) -> Result<()> {
        match event {
            XmlEvent::StartElement(ref start) => {
                if self.buffering {
                    self.ns.push(&start.namespaces);
                    self.buffer_depth += 1;
                    self.buffer.push(event);
                    return Ok(());
                }
                if start.name.matches(ns::WSSE, ns::node::SECURITY) {
                    self.seed = self.ns.bindings();
                    self.buffering = true;
                    self.buffer_depth = 1;
                    self.ns.push(&start.namespaces);
                    self.buffer.push(event);
                    return Ok(());
                }
                self.ns.push(&start.namespaces);
                chain.forward(event)
            }
            XmlEvent::EndElement { .. } => {
                self.ns.pop();
                if self.buffering {
                    self.buffer.push(event);
                    self.buffer_depth -= 1;
                    if self.buffer_depth == 0 {
                        self.buffering = false;
                        return self.handle_security_header(chain);
                    }
                    return Ok(());
                }
                chain.forward(event)
            }
            XmlEvent::EndDocument => {
                if self.properties.require_security_header && !self.seen_security {
                    return Err(Error::MissingElement("wsse:Security header".into()));
                }
                chain.forward(event)
            }
            other => {
                if self.buffering {
                    self.buffer.push(other);
                    return Ok(());
                }
                chain.forward(other)
            }
        }
    }
}
