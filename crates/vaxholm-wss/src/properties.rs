#![forbid(unsafe_code)]

//! Security processing configuration.

use std::fmt;
use vaxholm_core::algorithm;
use vaxholm_xml::QName;

/// A security action applied to the outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Signature,
    Encrypt,
}

/// A message part selected for signing or encryption, identified by
/// element QName.
#[derive(Debug, Clone)]
pub struct SecurePart {
    pub name: QName,
    /// Encrypt only the element content, keeping the element itself
    /// visible (`xenc` Content type). Ignored for signature parts.
    pub content_only: bool,
}

impl SecurePart {
    pub fn element(name: QName) -> Self {
        Self {
            name,
            content_only: false,
        }
    }

    pub fn content(name: QName) -> Self {
        Self {
            name,
            content_only: true,
        }
    }
}

/// How the signature `<ds:KeyInfo>` identifies the signing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyIdentifierType {
    /// `<ds:X509IssuerSerial>` with issuer DN and serial number.
    IssuerSerial,
    /// `<wsse:KeyIdentifier>` carrying the subject key identifier.
    SkiKeyIdentifier,
    /// `<wsse:KeyIdentifier>` carrying the whole certificate.
    X509KeyIdentifier,
    /// `<wsse:KeyIdentifier>` carrying the SHA-1 thumbprint.
    ThumbprintIdentifier,
    /// `<wsse:Reference>` to a `BinarySecurityToken` embedded in the STR.
    BstEmbedded,
    /// `<wsse:Reference>` to a `BinarySecurityToken` emitted ahead of the
    /// signature in the security header.
    BstDirectReference,
    /// `<wsse:Reference>` to a previously registered security token
    /// (signed-token reference).
    TokenReference,
}

impl fmt::Display for KeyIdentifierType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::IssuerSerial => "IssuerSerial",
            Self::SkiKeyIdentifier => "SkiKeyIdentifier",
            Self::X509KeyIdentifier => "X509KeyIdentifier",
            Self::ThumbprintIdentifier => "ThumbprintIdentifier",
            Self::BstEmbedded => "BstEmbedded",
            Self::BstDirectReference => "BstDirectReference",
            Self::TokenReference => "TokenReference",
        };
        f.write_str(name)
    }
}

/// Configuration for one message's security processing.
#[derive(Debug, Clone)]
pub struct SecurityProperties {
    /// Outbound actions to apply.
    pub actions: Vec<Action>,

    // ── Signature ────────────────────────────────────────────────────
    pub signature_parts: Vec<SecurePart>,
    pub signature_algorithm: String,
    pub signature_digest_algorithm: String,
    pub signature_c14n_algorithm: String,
    pub signature_key_identifier: KeyIdentifierType,
    /// Keystore alias of the signing key (asymmetric route).
    pub signature_user: Option<String>,
    /// Password releasing the signing key.
    pub signature_password: Option<String>,
    /// Id of a registered security token supplying the signing secret
    /// (symmetric route).
    pub signature_token: Option<String>,

    // ── Encryption ───────────────────────────────────────────────────
    pub encryption_parts: Vec<SecurePart>,
    pub encryption_algorithm: String,
    /// Key wrap / key transport algorithm for the session key.
    pub encryption_key_transport_algorithm: String,
    /// Keystore alias of the recipient's key material.
    pub encryption_user: Option<String>,
    /// Id of a registered security token supplying symmetric key
    /// material: the session key itself when `encrypt_symmetric_key` is
    /// false, or the key-encryption key for symmetric key wrap.
    pub encryption_token: Option<String>,
    /// Wrap and emit the session key as `<xenc:EncryptedKey>`. When
    /// false the key must have been established out of band.
    pub encrypt_symmetric_key: bool,

    // ── Inbound ──────────────────────────────────────────────────────
    /// Reject inbound messages without a `<wsse:Security>` header.
    pub require_security_header: bool,
    /// Id of a registered token to decrypt with when `<xenc:EncryptedData>`
    /// carries no key reference.
    pub decryption_token: Option<String>,
    /// Password releasing the decryption private key.
    pub decryption_password: Option<String>,
}

impl Default for SecurityProperties {
    fn default() -> Self {
        Self {
            actions: Vec::new(),
            signature_parts: Vec::new(),
            signature_algorithm: algorithm::RSA_SHA256.to_owned(),
            signature_digest_algorithm: algorithm::SHA256.to_owned(),
            signature_c14n_algorithm: algorithm::EXC_C14N.to_owned(),
            signature_key_identifier: KeyIdentifierType::BstDirectReference,
            signature_user: None,
            signature_password: None,
            signature_token: None,
            encryption_parts: Vec::new(),
            encryption_algorithm: algorithm::AES256_CBC.to_owned(),
            encryption_key_transport_algorithm: algorithm::RSA_OAEP.to_owned(),
            encryption_user: None,
            encryption_token: None,
            encrypt_symmetric_key: true,
            require_security_header: false,
            decryption_token: None,
            decryption_password: None,
        }
    }
}
