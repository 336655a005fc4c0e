#![forbid(unsafe_code)]

//! Per-message security tokens.

use vaxholm_core::{Error, Result};
use vaxholm_crypto::sign::SigningKey;

/// Key material bound to an identifier for the duration of one message.
/// Created by the processor that introduces the token (a received
/// `EncryptedKey`, a configured out-of-band secret, a binary security
/// token) and shared by reference with any processor that signs or
/// encrypts with it.
#[derive(Debug, Clone)]
pub struct SecurityToken {
    id: String,
    secret: Option<Vec<u8>>,
    cert_chain: Vec<Vec<u8>>,
}

impl SecurityToken {
    /// A token carrying a symmetric secret.
    pub fn from_secret(id: impl Into<String>, secret: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            secret: Some(secret),
            cert_chain: Vec::new(),
        }
    }

    /// A token carrying an X.509 certificate chain (DER, leaf first).
    pub fn from_certificates(id: impl Into<String>, cert_chain: Vec<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            secret: None,
            cert_chain,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The symmetric secret, if this token carries one.
    pub fn secret_key(&self) -> Result<&[u8]> {
        self.secret
            .as_deref()
            .ok_or_else(|| Error::Key(format!("token {} carries no secret key", self.id)))
    }

    /// A signing key derived from the token's secret (HMAC).
    pub fn signing_key(&self) -> Result<SigningKey> {
        Ok(SigningKey::Hmac(self.secret_key()?.to_vec()))
    }

    /// The certificate chain, if this token carries one.
    pub fn certificates(&self) -> &[Vec<u8>] {
        &self.cert_chain
    }
}
