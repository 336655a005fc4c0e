#![forbid(unsafe_code)]

//! The security event vocabulary.
//!
//! A security event is an immutable record of one verified or observed
//! security fact, produced by the processor chains and consumed by the
//! policy enforcement engine. The set of kinds is closed; consumers must
//! not assume any ordering beyond "finalization happens after the last
//! event".

use vaxholm_xml::QName;

/// The role a cryptographic algorithm played, independent of where in the
/// document it was found. `AlgorithmSuite` events are keyed by role, not
/// by position, and may arrive out of structural order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyUsage {
    /// Symmetric signature (HMAC)
    SymSig,
    /// Asymmetric signature (RSA, ECDSA)
    AsymSig,
    /// Digest
    Dig,
    /// Data encryption
    Enc,
    /// Symmetric key wrap
    SymKeyWrap,
    /// Asymmetric key wrap (key transport)
    AsymKeyWrap,
    /// Computed key
    CompKey,
    /// Encryption key derivation
    EncKd,
    /// Signature key derivation
    SigKd,
    /// Canonicalization
    C14n,
    /// SOAP normalization
    SoapNorm,
    /// SecurityTokenReference transform
    StrTrans,
    /// XPath
    XPath,
}

/// The kind of token a `TokenPresence` event announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    X509,
    EncryptedKey,
}

/// Discriminant of [`SecurityEvent`], used by assertion states to declare
/// their interest set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecurityEventKind {
    SignedElement,
    ContentEncrypted,
    AlgorithmSuite,
    SignatureValue,
    TokenPresence,
}

/// One observed security fact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityEvent {
    /// An element was covered (or not) by a verified signature.
    SignedElement { element: QName, signed: bool },
    /// An element (or its content) was encrypted (or not).
    ContentEncrypted { element: QName, encrypted: bool },
    /// An algorithm URI was used in the given key-usage role.
    AlgorithmSuite {
        key_usage: KeyUsage,
        algorithm_uri: String,
    },
    /// A signature value was produced or verified.
    SignatureValue { value: Vec<u8> },
    /// A security token was present in the message.
    TokenPresence { token_type: TokenType, id: String },
}

impl SecurityEvent {
    pub fn kind(&self) -> SecurityEventKind {
        match self {
            Self::SignedElement { .. } => SecurityEventKind::SignedElement,
            Self::ContentEncrypted { .. } => SecurityEventKind::ContentEncrypted,
            Self::AlgorithmSuite { .. } => SecurityEventKind::AlgorithmSuite,
            Self::SignatureValue { .. } => SecurityEventKind::SignatureValue,
            Self::TokenPresence { .. } => SecurityEventKind::TokenPresence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        let event = SecurityEvent::SignedElement {
            element: QName::unqualified("a"),
            signed: true,
        };
        assert_eq!(event.kind(), SecurityEventKind::SignedElement);

        let event = SecurityEvent::AlgorithmSuite {
            key_usage: KeyUsage::Dig,
            algorithm_uri: "uri".into(),
        };
        assert_eq!(event.kind(), SecurityEventKind::AlgorithmSuite);
    }
}
