#![forbid(unsafe_code)]

//! Outbound and inbound pipeline facades.
//!
//! A pipeline owns one message's processor chain and security context.
//! Configuration problems (unknown algorithm URIs, missing key material,
//! unsatisfiable ordering constraints) surface here, at construction,
//! before any event flows.

use crate::chain::{Processor, ProcessorChain, ProcessorId};
use crate::context::SecurityContext;
use crate::event::SecurityEvent;
use crate::output::{
    EncryptEndingProcessor, EncryptProcessor, KeyInfoData, SecurityHeaderProcessor,
    SignatureEndingProcessor, SignatureProcessor, WrapKey,
};
use crate::input::{DecryptProcessor, ReferenceVerifyProcessor, SecurityHeaderInputProcessor};
use crate::properties::{Action, KeyIdentifierType, SecurityProperties};
use std::sync::Arc;
use vaxholm_c14n::C14nMode;
use vaxholm_core::{algorithm, Error, Result};
use vaxholm_crypto::cipher;
use vaxholm_crypto::sign::SigningKey;
use vaxholm_keys::crypto::CertSelector;
use vaxholm_keys::{Crypto, SecurityToken};
use vaxholm_xml::reader::read_document;
use vaxholm_xml::writer::events_to_string;
use vaxholm_xml::XmlEvent;

/// The secured outbound message.
pub struct OutboundResult {
    /// The secured event stream.
    pub events: Vec<XmlEvent>,
    /// The events serialized to wire text.
    pub document: String,
    /// Security facts established while securing.
    pub security_events: Vec<SecurityEvent>,
}

/// Applies the configured security actions to one outbound message.
pub struct OutboundPipeline {
    chain: ProcessorChain,
}

impl std::fmt::Debug for OutboundPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundPipeline").finish_non_exhaustive()
    }
}

impl OutboundPipeline {
    pub fn new(
        properties: &SecurityProperties,
        crypto: &dyn Crypto,
        tokens: Vec<SecurityToken>,
    ) -> Result<Self> {
        let mut context = SecurityContext::new();
        for token in tokens {
            context.register_token(token);
        }

        let encrypting = properties.actions.contains(&Action::Encrypt);
        let signing = properties.actions.contains(&Action::Signature);
        let mut processors: Vec<Box<dyn Processor>> =
            vec![Box::new(SecurityHeaderProcessor::new())];

        if encrypting {
            let (session_key, key_reference_id, wrap_key, encrypted_key_id) =
                resolve_encryption_material(properties, crypto, &mut context)?;
            processors.push(Box::new(EncryptProcessor::new(
                properties,
                session_key.clone(),
                key_reference_id,
                vec!["security-header"],
            )?));
            let mut after: Vec<ProcessorId> = vec!["encrypt"];
            if signing {
                after.push("signature-ending");
            }
            processors.push(Box::new(EncryptEndingProcessor::new(
                properties.encryption_key_transport_algorithm.clone(),
                wrap_key,
                session_key,
                encrypted_key_id,
                after,
            )?));
        }

        if signing {
            let mut after: Vec<ProcessorId> = vec!["security-header"];
            if encrypting {
                after.push("encrypt");
            }
            processors.push(Box::new(SignatureProcessor::new(properties, after)?));
            let c14n_mode =
                C14nMode::from_uri(&properties.signature_c14n_algorithm).ok_or_else(|| {
                    Error::UnsupportedAlgorithm(format!(
                        "canonicalization: {}",
                        properties.signature_c14n_algorithm
                    ))
                })?;
            let (key, key_info) = resolve_signing_material(properties, crypto, &context)?;
            processors.push(Box::new(SignatureEndingProcessor::new(
                properties.signature_algorithm.clone(),
                c14n_mode,
                key,
                key_info,
            )?));
        }

        Ok(Self {
            chain: ProcessorChain::new(processors, context)?,
        })
    }

    /// Push the whole event stream through the chain and finish.
    pub fn process(mut self, events: Vec<XmlEvent>) -> Result<OutboundResult> {
        for event in events {
            self.chain.process_event(event)?;
        }
        let (events, mut context) = self.chain.finish();
        let document = events_to_string(&events);
        Ok(OutboundResult {
            events,
            document,
            security_events: context.take_security_events(),
        })
    }

    pub fn process_document(self, xml: &str) -> Result<OutboundResult> {
        self.process(read_document(xml)?)
    }
}

/// The verified inbound message.
#[derive(Debug)]
pub struct InboundResult {
    /// The application event stream, decrypted and verified.
    pub events: Vec<XmlEvent>,
    /// The events serialized back to text.
    pub document: String,
    /// Security facts established during verification, in discovery
    /// order; feed these to the policy enforcement engine.
    pub security_events: Vec<SecurityEvent>,
}

/// Verifies and decrypts one inbound message.
pub struct InboundPipeline {
    chain: ProcessorChain,
}

impl InboundPipeline {
    pub fn new(
        properties: &SecurityProperties,
        crypto: Arc<dyn Crypto>,
        tokens: Vec<SecurityToken>,
    ) -> Result<Self> {
        let mut context = SecurityContext::new();
        for token in tokens {
            context.register_token(token);
        }
        let processors: Vec<Box<dyn Processor>> = vec![
            Box::new(SecurityHeaderInputProcessor::new(
                properties.clone(),
                crypto,
            )),
            Box::new(ReferenceVerifyProcessor::new()),
            Box::new(DecryptProcessor::new(properties.clone())),
        ];
        Ok(Self {
            chain: ProcessorChain::new(processors, context)?,
        })
    }

    pub fn process(mut self, events: Vec<XmlEvent>) -> Result<InboundResult> {
        for event in events {
            self.chain.process_event(event)?;
        }
        let (events, mut context) = self.chain.finish();
        let document = events_to_string(&events);
        Ok(InboundResult {
            events,
            document,
            security_events: context.take_security_events(),
        })
    }

    pub fn process_document(self, xml: &str) -> Result<InboundResult> {
        self.process(read_document(xml)?)
    }
}

type EncryptionMaterial = (Vec<u8>, String, WrapKey, Option<String>);

fn resolve_encryption_material(
    properties: &SecurityProperties,
    crypto: &dyn Crypto,
    context: &mut SecurityContext,
) -> Result<EncryptionMaterial> {
    if !properties.encrypt_symmetric_key {
        // Out-of-band key establishment: the token's secret is the
        // session key and the placeholder references the token id.
        let token_id = properties
            .encryption_token
            .as_deref()
            .ok_or_else(|| Error::Key("no encryption token configured".into()))?;
        let session_key = context
            .token(token_id)
            .ok_or_else(|| Error::KeyNotFound(format!("token {token_id}")))?
            .secret_key()?
            .to_vec();
        return Ok((session_key, token_id.to_owned(), WrapKey::None, None));
    }

    let session_key = cipher::generate_session_key(&properties.encryption_algorithm)?;
    let encrypted_key_id = context.next_id("EK");
    let wrap_key = match properties.encryption_key_transport_algorithm.as_str() {
        algorithm::RSA_PKCS1 | algorithm::RSA_OAEP => {
            let alias = properties
                .encryption_user
                .as_deref()
                .ok_or_else(|| Error::Key("no encryption user configured".into()))?;
            let chain = crypto.certificates(&CertSelector::Alias(alias.to_owned()))?;
            let leaf = chain
                .first()
                .ok_or_else(|| Error::Certificate(format!("empty chain for alias: {alias}")))?;
            let SigningKey::RsaPublic(public_key) = crypto.public_key(leaf)? else {
                return Err(Error::Key(format!(
                    "certificate for alias {alias} does not carry an RSA key"
                )));
            };
            let issuer_serial = crypto.issuer_serial(leaf).ok();
            WrapKey::Rsa {
                public_key: Box::new(public_key),
                issuer_serial,
            }
        }
        _ => {
            let token_id = properties
                .encryption_token
                .as_deref()
                .ok_or_else(|| Error::Key("no key-encryption token configured".into()))?;
            let kek = context
                .token(token_id)
                .ok_or_else(|| Error::KeyNotFound(format!("token {token_id}")))?
                .secret_key()?
                .to_vec();
            WrapKey::Kek(kek)
        }
    };
    Ok((
        session_key,
        encrypted_key_id.clone(),
        wrap_key,
        Some(encrypted_key_id),
    ))
}

fn resolve_signing_material(
    properties: &SecurityProperties,
    crypto: &dyn Crypto,
    context: &SecurityContext,
) -> Result<(SigningKey, KeyInfoData)> {
    if let Some(token_id) = &properties.signature_token {
        let token = context
            .token(token_id)
            .ok_or_else(|| Error::KeyNotFound(format!("token {token_id}")))?;
        return Ok((
            token.signing_key()?,
            KeyInfoData::TokenReference {
                token_id: token_id.clone(),
            },
        ));
    }

    let alias = properties
        .signature_user
        .as_deref()
        .ok_or_else(|| Error::Key("no signature user configured".into()))?;
    let password = properties
        .signature_password
        .as_deref()
        .ok_or_else(|| Error::Key(format!("no password supplied for alias: {alias}")))?;
    let key = crypto.private_key(alias, password)?;
    let chain = crypto.certificates(&CertSelector::Alias(alias.to_owned()))?;
    let leaf = chain
        .into_iter()
        .next()
        .ok_or_else(|| Error::Certificate(format!("empty chain for alias: {alias}")))?;

    let key_info = match properties.signature_key_identifier {
        KeyIdentifierType::IssuerSerial => {
            let (issuer, serial) = crypto.issuer_serial(&leaf)?;
            KeyInfoData::IssuerSerial { issuer, serial }
        }
        KeyIdentifierType::SkiKeyIdentifier => KeyInfoData::Ski {
            ski: crypto.ski(&leaf)?,
        },
        KeyIdentifierType::X509KeyIdentifier => KeyInfoData::X509 { cert: leaf },
        KeyIdentifierType::ThumbprintIdentifier => KeyInfoData::Thumbprint {
            thumbprint: crypto.thumbprint(&leaf)?,
        },
        KeyIdentifierType::BstEmbedded => KeyInfoData::BstEmbedded { cert: leaf },
        KeyIdentifierType::BstDirectReference => KeyInfoData::BstDirect { cert: leaf },
        KeyIdentifierType::TokenReference => {
            return Err(Error::UnsupportedKeyIdentifier(
                "TokenReference requires a configured signature token".into(),
            ));
        }
    };
    Ok((key, key_info))
}
