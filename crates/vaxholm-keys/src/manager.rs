#![forbid(unsafe_code)]

//! Key manager with named key store.

use crate::key::{Key, KeyData, KeyUsage};
use vaxholm_core::Error;

/// Manages a collection of keys for lookup during signature/encryption
/// processing. Read-only while a message is processed; may be shared
/// across concurrent messages.
pub struct KeysManager {
    keys: Vec<Key>,
    /// Trusted CA certificates (DER-encoded).
    trusted_certs: Vec<Vec<u8>>,
}

impl KeysManager {
    /// Create an empty keys manager.
    pub fn new() -> Self {
        Self {
            keys: Vec::new(),
            trusted_certs: Vec::new(),
        }
    }

    /// Add a key to the manager.
    pub fn add_key(&mut self, key: Key) {
        self.keys.push(key);
    }

    /// Find a key by name.
    pub fn find_by_name(&self, name: &str) -> Option<&Key> {
        self.keys.iter().find(|k| k.name.as_deref() == Some(name))
    }

    /// Find the first key matching the given usage.
    pub fn find_by_usage(&self, usage: KeyUsage) -> Option<&Key> {
        self.keys
            .iter()
            .find(|k| k.usage == usage || k.usage == KeyUsage::Any)
    }

    /// Find the first key that has an RSA key.
    pub fn find_rsa(&self) -> Option<&Key> {
        self.keys
            .iter()
            .find(|k| matches!(&k.data, KeyData::Rsa { .. }))
    }

    /// Find an RSA key with a private key component.
    pub fn find_rsa_private(&self) -> Option<&Key> {
        self.keys.iter().find(|k| {
            matches!(
                &k.data,
                KeyData::Rsa {
                    private: Some(_),
                    ..
                }
            )
        })
    }

    /// Find the first AES key.
    pub fn find_aes(&self) -> Option<&Key> {
        self.keys
            .iter()
            .find(|k| matches!(&k.data, KeyData::Aes(_)))
    }

    /// Find the key whose certificate chain contains the given DER cert.
    pub fn find_by_certificate(&self, cert_der: &[u8]) -> Option<&Key> {
        self.keys
            .iter()
            .find(|k| k.x509_chain.iter().any(|c| c == cert_der))
    }

    /// Iterator over all keys.
    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.keys.iter()
    }

    /// Get the first key available (for simple single-key scenarios).
    pub fn first_key(&self) -> Result<&Key, Error> {
        self.keys
            .first()
            .ok_or_else(|| Error::KeyNotFound("no keys in manager".into()))
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Add a trusted CA certificate (DER-encoded).
    pub fn add_trusted_cert(&mut self, der: Vec<u8>) {
        self.trusted_certs.push(der);
    }

    /// Get the trusted CA certificates.
    pub fn trusted_certs(&self) -> &[Vec<u8>] {
        &self.trusted_certs
    }
}

impl Default for KeysManager {
    fn default() -> Self {
        Self::new()
    }
}
