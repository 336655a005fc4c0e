//! End-to-end pipeline tests: secure a SOAP message, verify it back,
//! and run the resulting security events through the policy engine.

use std::sync::Arc;
use vaxholm_core::{algorithm, Error};
use vaxholm_keys::{KeysManager, KeystoreCrypto, SecurityToken};
use vaxholm_policy::{
    AlgorithmSuitePolicy, Assertion, ElementSelection, NormalizedPolicy, PolicyEnforcer,
};
use vaxholm_wss::{
    Action, InboundPipeline, InboundResult, KeyIdentifierType, OutboundPipeline, SecurePart,
    SecurityEvent, SecurityProperties,
};
use vaxholm_xml::reader::read_document;
use vaxholm_xml::{QName, XmlEvent};

const SOAP_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
const EXAMPLE_NS: &str = "http://example.org";

const PLAIN_MESSAGE: &str = concat!(
    r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">"#,
    r#"<soap:Header></soap:Header>"#,
    r#"<soap:Body>"#,
    r#"<b:a xmlns:b="http://example.org"><b:value>42</b:value></b:a>"#,
    r#"</soap:Body>"#,
    r#"</soap:Envelope>"#,
);

fn body_qname() -> QName {
    QName::new(SOAP_NS, "soap", "Body")
}

fn part_qname() -> QName {
    QName::new(EXAMPLE_NS, "b", "a")
}

fn signing_token() -> SecurityToken {
    SecurityToken::from_secret("sct-1", vec![0x42; 32])
}

fn signing_properties() -> SecurityProperties {
    SecurityProperties {
        actions: vec![Action::Signature],
        signature_parts: vec![SecurePart::element(body_qname()), SecurePart::element(part_qname())],
        signature_algorithm: algorithm::HMAC_SHA256.to_owned(),
        signature_key_identifier: KeyIdentifierType::TokenReference,
        signature_token: Some("sct-1".to_owned()),
        require_security_header: true,
        ..SecurityProperties::default()
    }
}

fn empty_crypto() -> Arc<KeystoreCrypto> {
    Arc::new(KeystoreCrypto::new(KeysManager::new()))
}

fn sign_message() -> String {
    let crypto = empty_crypto();
    let pipeline =
        OutboundPipeline::new(&signing_properties(), crypto.as_ref(), vec![signing_token()])
            .unwrap();
    pipeline.process_document(PLAIN_MESSAGE).unwrap().document
}

fn verify_message(document: &str) -> Result<InboundResult, Error> {
    let pipeline = InboundPipeline::new(
        &signing_properties(),
        empty_crypto(),
        vec![signing_token()],
    )?;
    pipeline.process_document(document)
}

/// Extract the events of the subtree rooted at the first element
/// matching (ns, local).
fn subtree(events: &[XmlEvent], ns: &str, local: &str) -> Vec<XmlEvent> {
    let mut collected = Vec::new();
    let mut depth = 0usize;
    for event in events {
        match event {
            XmlEvent::StartElement(start) => {
                if depth > 0 {
                    depth += 1;
                } else if start.name.matches(ns, local) {
                    depth = 1;
                }
                if depth > 0 {
                    collected.push(event.clone());
                }
            }
            XmlEvent::EndElement { .. } if depth > 0 => {
                collected.push(event.clone());
                depth -= 1;
                if depth == 0 {
                    break;
                }
            }
            other => {
                if depth > 0 {
                    collected.push(other.clone());
                }
            }
        }
    }
    collected
}

// ── Signing ──────────────────────────────────────────────────────────

#[test]
fn test_signed_message_layout() {
    let document = sign_message();
    assert!(document.contains("<wsse:Security"));
    assert!(document.contains("<ds:Signature"));
    assert!(document.contains("<ds:SignedInfo>"));
    assert!(document.contains("<ds:SignatureValue>"));
    assert!(document.contains("<wsse:SecurityTokenReference"));
    // One Reference per signed part.
    assert_eq!(document.matches("<ds:Reference").count(), 2);
    // The signature sits inside the header, before the body.
    let signature_at = document.find("<ds:Signature").unwrap();
    let body_at = document.find("<soap:Body").unwrap();
    assert!(signature_at < body_at);
}

#[test]
fn test_sign_verify_round_trip() {
    let document = sign_message();
    let result = verify_message(&document).unwrap();

    let signed: Vec<&QName> = result
        .security_events
        .iter()
        .filter_map(|e| match e {
            SecurityEvent::SignedElement { element, signed: true } => Some(element),
            _ => None,
        })
        .collect();
    assert!(signed.iter().any(|q| q.matches(SOAP_NS, "Body")));
    assert!(signed.iter().any(|q| q.matches(EXAMPLE_NS, "a")));
    assert!(result
        .security_events
        .iter()
        .any(|e| matches!(e, SecurityEvent::SignatureValue { .. })));
}

#[test]
fn test_tampered_content_fails_digest() {
    let document = sign_message().replace("<b:value>42<", "<b:value>43<");
    let err = verify_message(&document).unwrap_err();
    assert!(matches!(err, Error::DigestMismatch(_)));
}

#[test]
fn test_tampered_signature_value_fails() {
    let document = sign_message();
    // Flip the first character of the base64 signature value.
    let start = document.find("<ds:SignatureValue>").unwrap() + "<ds:SignatureValue>".len();
    let mut tampered = document.clone();
    let original = tampered.as_bytes()[start];
    let replacement = if original == b'A' { 'B' } else { 'A' };
    tampered.replace_range(start..start + 1, &replacement.to_string());
    let err = verify_message(&tampered).unwrap_err();
    assert!(matches!(err, Error::SignatureInvalid(_) | Error::Base64(_)));
}

#[test]
fn test_wrong_verification_key_fails() {
    let document = sign_message();
    let pipeline = InboundPipeline::new(
        &signing_properties(),
        empty_crypto(),
        vec![SecurityToken::from_secret("sct-1", vec![0x99; 32])],
    )
    .unwrap();
    let err = pipeline.process_document(&document).unwrap_err();
    assert!(matches!(err, Error::SignatureInvalid(_)));
}

#[test]
fn test_missing_security_header_rejected() {
    let pipeline = InboundPipeline::new(
        &signing_properties(),
        empty_crypto(),
        vec![signing_token()],
    )
    .unwrap();
    let err = pipeline.process_document(PLAIN_MESSAGE).unwrap_err();
    assert!(matches!(err, Error::MissingElement(_)));
}

// ── Signing + policy ─────────────────────────────────────────────────

#[test]
fn test_signed_elements_policy_end_to_end() {
    let document = sign_message();
    let result = verify_message(&document).unwrap();

    // Policy requires /b:a signed; Body and b:a (and nothing else) were.
    let policy = NormalizedPolicy::single(vec![Assertion::SignedElements(ElementSelection::new(
        vec![part_qname()],
    ))]);
    let mut enforcer = PolicyEnforcer::new(&policy);
    for event in &result.security_events {
        enforcer.register_event(event).unwrap();
    }
    enforcer.do_final().unwrap();
}

#[test]
fn test_algorithm_suite_policy_end_to_end() {
    let document = sign_message();
    let result = verify_message(&document).unwrap();

    let accepting = NormalizedPolicy::single(vec![Assertion::AlgorithmSuite(
        AlgorithmSuitePolicy {
            symmetric_signature: Some(algorithm::HMAC_SHA256.into()),
            digest: Some(algorithm::SHA256.into()),
            c14n: Some(algorithm::EXC_C14N.into()),
            ..Default::default()
        },
    )]);
    let mut enforcer = PolicyEnforcer::new(&accepting);
    for event in &result.security_events {
        enforcer.register_event(event).unwrap();
    }
    enforcer.do_final().unwrap();

    let rejecting = NormalizedPolicy::single(vec![Assertion::AlgorithmSuite(
        AlgorithmSuitePolicy {
            symmetric_signature: Some(algorithm::HMAC_SHA512.into()),
            ..Default::default()
        },
    )]);
    let mut enforcer = PolicyEnforcer::new(&rejecting);
    for event in &result.security_events {
        enforcer.register_event(event).unwrap();
    }
    assert!(enforcer.do_final().is_err());
}

// ── Encryption ───────────────────────────────────────────────────────

fn encryption_properties(wrap: bool) -> SecurityProperties {
    SecurityProperties {
        actions: vec![Action::Encrypt],
        encryption_parts: vec![SecurePart::element(part_qname())],
        encryption_algorithm: algorithm::AES256_CBC.to_owned(),
        encryption_key_transport_algorithm: algorithm::KW_AES256.to_owned(),
        encryption_token: Some("kek-1".to_owned()),
        encrypt_symmetric_key: wrap,
        decryption_token: Some("kek-1".to_owned()),
        ..SecurityProperties::default()
    }
}

fn kek_token() -> SecurityToken {
    SecurityToken::from_secret("kek-1", (0..32).collect())
}

#[test]
fn test_encrypt_decrypt_round_trip_unwrapped_key() {
    // Out-of-band key establishment: the token itself is the session key.
    let properties = encryption_properties(false);
    let crypto = empty_crypto();
    let outbound =
        OutboundPipeline::new(&properties, crypto.as_ref(), vec![kek_token()]).unwrap();
    let secured = outbound.process_document(PLAIN_MESSAGE).unwrap();
    assert!(secured.document.contains("<xenc:EncryptedData"));
    assert!(secured.document.contains("<xenc:ReferenceList"));
    assert!(!secured.document.contains("<xenc:EncryptedKey"));
    assert!(!secured.document.contains("<b:value>"));

    let inbound = InboundPipeline::new(&properties, crypto, vec![kek_token()]).unwrap();
    let result = inbound.process_document(&secured.document).unwrap();

    // The recovered subtree is event-identical to the original.
    let original = subtree(&read_document(PLAIN_MESSAGE).unwrap(), EXAMPLE_NS, "a");
    let recovered = subtree(&result.events, EXAMPLE_NS, "a");
    assert_eq!(original, recovered);
}

#[test]
fn test_encrypt_decrypt_round_trip_wrapped_key() {
    let properties = encryption_properties(true);
    let crypto = empty_crypto();
    let outbound =
        OutboundPipeline::new(&properties, crypto.as_ref(), vec![kek_token()]).unwrap();
    let secured = outbound.process_document(PLAIN_MESSAGE).unwrap();
    assert!(secured.document.contains("<xenc:EncryptedKey"));
    assert!(secured.document.contains("<xenc:DataReference"));

    let inbound = InboundPipeline::new(&properties, crypto, vec![kek_token()]).unwrap();
    let result = inbound.process_document(&secured.document).unwrap();

    let original = subtree(&read_document(PLAIN_MESSAGE).unwrap(), EXAMPLE_NS, "a");
    let recovered = subtree(&result.events, EXAMPLE_NS, "a");
    assert_eq!(original, recovered);

    let encrypted: Vec<&SecurityEvent> = result
        .security_events
        .iter()
        .filter(|e| matches!(e, SecurityEvent::ContentEncrypted { encrypted: true, .. }))
        .collect();
    assert!(!encrypted.is_empty());
}

#[test]
fn test_content_mode_encryption() {
    let mut properties = encryption_properties(true);
    properties.encryption_parts = vec![SecurePart::content(part_qname())];
    let crypto = empty_crypto();
    let outbound =
        OutboundPipeline::new(&properties, crypto.as_ref(), vec![kek_token()]).unwrap();
    let secured = outbound.process_document(PLAIN_MESSAGE).unwrap();
    // The selected element stays visible; only its content is replaced.
    assert!(secured.document.contains("<b:a"));
    assert!(secured.document.contains(
        &format!("Type=\"{}\"", "http://www.w3.org/2001/04/xmlenc#Content")
    ));

    let inbound = InboundPipeline::new(&properties, crypto, vec![kek_token()]).unwrap();
    let result = inbound.process_document(&secured.document).unwrap();
    // In content mode the recovered children may re-declare prefixes the
    // stripped context supplied, so compare canonical forms.
    let original = subtree(&read_document(PLAIN_MESSAGE).unwrap(), EXAMPLE_NS, "a");
    let recovered = subtree(&result.events, EXAMPLE_NS, "a");
    let c14n = |events: &[XmlEvent]| {
        vaxholm_c14n::canonicalize(events, vaxholm_c14n::C14nMode::Exclusive, &[]).unwrap()
    };
    assert_eq!(c14n(&original), c14n(&recovered));
}

#[test]
fn test_encrypted_elements_policy_end_to_end() {
    let properties = encryption_properties(true);
    let crypto = empty_crypto();
    let outbound =
        OutboundPipeline::new(&properties, crypto.as_ref(), vec![kek_token()]).unwrap();
    let secured = outbound.process_document(PLAIN_MESSAGE).unwrap();
    let inbound = InboundPipeline::new(&properties, crypto, vec![kek_token()]).unwrap();
    let result = inbound.process_document(&secured.document).unwrap();

    let policy = NormalizedPolicy::single(vec![Assertion::EncryptedElements(
        ElementSelection::new(vec![part_qname()]),
    )]);
    let mut enforcer = PolicyEnforcer::new(&policy);
    for event in &result.security_events {
        enforcer.register_event(event).unwrap();
    }
    enforcer.do_final().unwrap();
}

// ── Sign + encrypt combined ──────────────────────────────────────────

#[test]
fn test_sign_and_encrypt_end_to_end() {
    let properties = SecurityProperties {
        actions: vec![Action::Encrypt, Action::Signature],
        signature_parts: vec![SecurePart::element(body_qname())],
        signature_algorithm: algorithm::HMAC_SHA256.to_owned(),
        signature_key_identifier: KeyIdentifierType::TokenReference,
        signature_token: Some("sct-1".to_owned()),
        encryption_parts: vec![SecurePart::element(part_qname())],
        encryption_algorithm: algorithm::AES128_GCM.to_owned(),
        encryption_key_transport_algorithm: algorithm::KW_AES128.to_owned(),
        encryption_token: Some("kek-2".to_owned()),
        encrypt_symmetric_key: true,
        require_security_header: true,
        ..SecurityProperties::default()
    };
    let tokens = || {
        vec![
            signing_token(),
            SecurityToken::from_secret("kek-2", vec![7; 16]),
        ]
    };
    let crypto = empty_crypto();
    let outbound = OutboundPipeline::new(&properties, crypto.as_ref(), tokens()).unwrap();
    let secured = outbound.process_document(PLAIN_MESSAGE).unwrap();
    assert!(secured.document.contains("<ds:Signature"));
    assert!(secured.document.contains("<xenc:EncryptedKey"));
    assert!(secured.document.contains("<xenc:EncryptedData"));

    let inbound = InboundPipeline::new(&properties, crypto, tokens()).unwrap();
    let result = inbound.process_document(&secured.document).unwrap();

    let policy = NormalizedPolicy::single(vec![
        Assertion::SignedElements(ElementSelection::new(vec![body_qname()])),
        Assertion::EncryptedElements(ElementSelection::new(vec![part_qname()])),
    ]);
    let mut enforcer = PolicyEnforcer::new(&policy);
    for event in &result.security_events {
        enforcer.register_event(event).unwrap();
    }
    enforcer.do_final().unwrap();

    // The decrypted message carries the original payload again.
    assert!(result.document.contains("<b:value>42</b:value>"));
}

// ── Configuration failures ───────────────────────────────────────────

#[test]
fn test_unsupported_signature_algorithm_fails_construction() {
    let mut properties = signing_properties();
    properties.signature_algorithm = "http://example.com/fake".to_owned();
    let crypto = empty_crypto();
    let err =
        OutboundPipeline::new(&properties, crypto.as_ref(), vec![signing_token()]).unwrap_err();
    assert!(matches!(err, Error::UnsupportedAlgorithm(_)));
}

#[test]
fn test_unsupported_c14n_algorithm_fails_construction() {
    let mut properties = signing_properties();
    properties.signature_c14n_algorithm = "http://example.com/fake-c14n".to_owned();
    let crypto = empty_crypto();
    let err =
        OutboundPipeline::new(&properties, crypto.as_ref(), vec![signing_token()]).unwrap_err();
    assert!(matches!(err, Error::UnsupportedAlgorithm(_)));
}

#[test]
fn test_missing_password_fails_construction() {
    let mut manager = KeysManager::new();
    manager.add_key(
        vaxholm_keys::Key::new(
            vaxholm_keys::KeyData::Hmac(vec![1; 32]),
            vaxholm_keys::KeyUsage::Sign,
        )
        .with_name("alice")
        .with_password("secret"),
    );
    let crypto = KeystoreCrypto::new(manager);
    let properties = SecurityProperties {
        actions: vec![Action::Signature],
        signature_parts: vec![SecurePart::element(body_qname())],
        signature_algorithm: algorithm::HMAC_SHA256.to_owned(),
        signature_user: Some("alice".to_owned()),
        signature_password: None,
        ..SecurityProperties::default()
    };
    let err = OutboundPipeline::new(&properties, &crypto, Vec::new()).unwrap_err();
    assert!(err.to_string().contains("password"));
}

#[test]
fn test_missing_token_fails_construction() {
    let properties = signing_properties();
    let crypto = empty_crypto();
    // No token registered for the configured signature token id.
    let err = OutboundPipeline::new(&properties, crypto.as_ref(), Vec::new()).unwrap_err();
    assert!(matches!(err, Error::KeyNotFound(_)));
}
