#![forbid(unsafe_code)]

//! The crypto-provider boundary.
//!
//! Certificate storage, key lookup, and trust decisions live behind this
//! trait; the processors only ask for material by alias and never touch
//! the keystore directly.

use crate::manager::KeysManager;
use const_oid::db::rfc5912::{ID_EC_PUBLIC_KEY, RSA_ENCRYPTION, SECP_256_R_1, SECP_384_R_1};
use der::{Decode, Encode};
use vaxholm_core::{Error, Result};
use vaxholm_crypto::sign::SigningKey;
use x509_cert::Certificate;

/// Subject Key Identifier extension OID (2.5.29.14).
const SKI_OID: der::asn1::ObjectIdentifier = der::asn1::ObjectIdentifier::new_unwrap("2.5.29.14");

/// Selects a certificate chain from the store.
#[derive(Debug, Clone)]
pub enum CertSelector {
    /// By keystore alias.
    Alias(String),
    /// By subject key identifier bytes.
    Ski(Vec<u8>),
    /// By issuer distinguished name and decimal serial number.
    IssuerSerial(String, String),
    /// By SHA-1 thumbprint of the DER encoding.
    Thumbprint(Vec<u8>),
}

/// Boundary to the credential store and certificate operations.
pub trait Crypto: Send + Sync {
    /// The certificate chain matching a selector, DER-encoded, leaf first.
    fn certificates(&self, selector: &CertSelector) -> Result<Vec<Vec<u8>>>;

    /// The private key for an alias, released only with the right password.
    fn private_key(&self, alias: &str, password: &str) -> Result<SigningKey>;

    /// The Subject Key Identifier bytes of a certificate.
    fn ski(&self, cert_der: &[u8]) -> Result<Vec<u8>>;

    /// The issuer distinguished name and decimal serial number.
    fn issuer_serial(&self, cert_der: &[u8]) -> Result<(String, String)>;

    /// SHA-1 thumbprint over the DER encoding.
    fn thumbprint(&self, cert_der: &[u8]) -> Result<Vec<u8>>;

    /// The verification key contained in a certificate.
    fn public_key(&self, cert_der: &[u8]) -> Result<SigningKey>;

    /// Whether the chain anchors in a trusted certificate.
    fn validate_cert_path(&self, chain: &[Vec<u8>]) -> Result<bool>;
}

/// [`Crypto`] implementation backed by a [`KeysManager`] keystore.
pub struct KeystoreCrypto {
    manager: KeysManager,
}

impl KeystoreCrypto {
    pub fn new(manager: KeysManager) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &KeysManager {
        &self.manager
    }

    /// Scan the store for a key whose leaf certificate satisfies the
    /// predicate; certificates that fail to parse are skipped.
    fn find_chain(
        &self,
        matches: impl Fn(&Self, &[u8]) -> Result<bool>,
    ) -> Result<Vec<Vec<u8>>> {
        for key in self.manager.keys() {
            if let Some(leaf) = key.x509_chain.first() {
                if matches(self, leaf).unwrap_or(false) {
                    return Ok(key.x509_chain.clone());
                }
            }
        }
        Err(Error::Certificate(
            "no certificate in the store matches the identifier".into(),
        ))
    }

    fn parse(cert_der: &[u8]) -> Result<Certificate> {
        Certificate::from_der(cert_der)
            .map_err(|e| Error::Certificate(format!("failed to parse certificate: {e}")))
    }
}

impl Crypto for KeystoreCrypto {
    fn certificates(&self, selector: &CertSelector) -> Result<Vec<Vec<u8>>> {
        match selector {
            CertSelector::Alias(alias) => {
                let key = self
                    .manager
                    .find_by_name(alias)
                    .ok_or_else(|| Error::KeyNotFound(format!("no key for alias: {alias}")))?;
                if key.x509_chain.is_empty() {
                    return Err(Error::Certificate(format!(
                        "no certificates for alias: {alias}"
                    )));
                }
                Ok(key.x509_chain.clone())
            }
            CertSelector::Ski(ski) => self.find_chain(|crypto, leaf| {
                Ok(crypto.ski(leaf).map(|s| s == *ski).unwrap_or(false))
            }),
            CertSelector::IssuerSerial(issuer, serial) => self.find_chain(|crypto, leaf| {
                let (i, s) = crypto.issuer_serial(leaf)?;
                Ok(i == *issuer && s == *serial)
            }),
            CertSelector::Thumbprint(thumbprint) => self.find_chain(|crypto, leaf| {
                Ok(crypto.thumbprint(leaf)? == *thumbprint)
            }),
        }
    }

    fn private_key(&self, alias: &str, password: &str) -> Result<SigningKey> {
        let key = self
            .manager
            .find_by_name(alias)
            .ok_or_else(|| Error::KeyNotFound(format!("no key for alias: {alias}")))?;
        match &key.password {
            Some(expected) if expected == password => {}
            Some(_) => {
                return Err(Error::Key(format!("wrong password for alias: {alias}")));
            }
            None => {}
        }
        let signing_key = key
            .to_signing_key()
            .ok_or_else(|| Error::Key(format!("alias {alias} has no signing key")))?;
        match signing_key {
            SigningKey::RsaPublic(_) | SigningKey::EcP256Public(_) | SigningKey::EcP384Public(_) => {
                Err(Error::Key(format!("alias {alias} has no private key")))
            }
            other => Ok(other),
        }
    }

    fn ski(&self, cert_der: &[u8]) -> Result<Vec<u8>> {
        let cert = Self::parse(cert_der)?;
        let extensions = cert
            .tbs_certificate
            .extensions
            .as_deref()
            .unwrap_or_default();
        for ext in extensions {
            if ext.extn_id == SKI_OID {
                // The extension value is an OCTET STRING wrapping the SKI.
                let inner = der::asn1::OctetString::from_der(ext.extn_value.as_bytes())
                    .map_err(|e| Error::Certificate(format!("malformed SKI extension: {e}")))?;
                return Ok(inner.as_bytes().to_vec());
            }
        }
        Err(Error::Certificate(
            "certificate has no SubjectKeyIdentifier extension".into(),
        ))
    }

    fn issuer_serial(&self, cert_der: &[u8]) -> Result<(String, String)> {
        let cert = Self::parse(cert_der)?;
        let issuer = cert.tbs_certificate.issuer.to_string();
        let serial = decimal_from_be_bytes(cert.tbs_certificate.serial_number.as_bytes());
        Ok((issuer, serial))
    }

    fn thumbprint(&self, cert_der: &[u8]) -> Result<Vec<u8>> {
        use sha1::{Digest, Sha1};
        let mut hasher = Sha1::new();
        hasher.update(cert_der);
        Ok(hasher.finalize().to_vec())
    }

    fn public_key(&self, cert_der: &[u8]) -> Result<SigningKey> {
        let cert = Self::parse(cert_der)?;
        let spki = &cert.tbs_certificate.subject_public_key_info;
        let key_bits = spki
            .subject_public_key
            .as_bytes()
            .ok_or_else(|| Error::Certificate("unaligned public key bits".into()))?;
        if spki.algorithm.oid == RSA_ENCRYPTION {
            use rsa::pkcs1::DecodeRsaPublicKey;
            let public = rsa::RsaPublicKey::from_pkcs1_der(key_bits)
                .map_err(|e| Error::Certificate(format!("invalid RSA public key: {e}")))?;
            return Ok(SigningKey::RsaPublic(public));
        }
        if spki.algorithm.oid == ID_EC_PUBLIC_KEY {
            let params = spki
                .algorithm
                .parameters
                .as_ref()
                .ok_or_else(|| Error::Certificate("EC key without curve parameters".into()))?;
            let curve = params
                .decode_as::<der::asn1::ObjectIdentifier>()
                .map_err(|e| Error::Certificate(format!("invalid EC parameters: {e}")))?;
            if curve == SECP_256_R_1 {
                let vk = p256::ecdsa::VerifyingKey::from_sec1_bytes(key_bits)
                    .map_err(|e| Error::Certificate(format!("invalid P-256 key: {e}")))?;
                return Ok(SigningKey::EcP256Public(vk));
            }
            if curve == SECP_384_R_1 {
                let vk = p384::ecdsa::VerifyingKey::from_sec1_bytes(key_bits)
                    .map_err(|e| Error::Certificate(format!("invalid P-384 key: {e}")))?;
                return Ok(SigningKey::EcP384Public(vk));
            }
            return Err(Error::Certificate(format!("unsupported curve: {curve}")));
        }
        Err(Error::Certificate(format!(
            "unsupported public key algorithm: {}",
            spki.algorithm.oid
        )))
    }

    fn validate_cert_path(&self, chain: &[Vec<u8>]) -> Result<bool> {
        // Direct trust: the chain anchors when one of its certificates is
        // byte-identical to a configured trust anchor. Full path building
        // is the trust provider's concern, outside this boundary.
        let trusted = self.manager.trusted_certs();
        if trusted.is_empty() {
            return Ok(false);
        }
        Ok(chain.iter().any(|c| trusted.iter().any(|t| t == c)))
    }
}

/// Render a big-endian unsigned integer as its decimal string.
fn decimal_from_be_bytes(bytes: &[u8]) -> String {
    let mut digits: Vec<u8> = vec![0];
    for &byte in bytes {
        let mut carry = byte as u32;
        for d in digits.iter_mut() {
            let v = (*d as u32) * 256 + carry;
            *d = (v % 10) as u8;
            carry = v / 10;
        }
        while carry > 0 {
            digits.push((carry % 10) as u8);
            carry /= 10;
        }
    }
    digits
        .iter()
        .rev()
        .map(|d| char::from(b'0' + d))
        .collect()
}

/// Re-encode a parsed certificate to DER (used by tests and callers that
/// normalize incoming chains).
pub fn reencode_der(cert: &Certificate) -> Result<Vec<u8>> {
    cert.to_der()
        .map_err(|e| Error::Certificate(format!("DER encoding failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{Key, KeyData, KeyUsage};

    #[test]
    fn test_decimal_conversion() {
        assert_eq!(decimal_from_be_bytes(&[0]), "0");
        assert_eq!(decimal_from_be_bytes(&[1]), "1");
        assert_eq!(decimal_from_be_bytes(&[1, 0]), "256");
        assert_eq!(decimal_from_be_bytes(&[0xFF, 0xFF]), "65535");
        assert_eq!(decimal_from_be_bytes(&[0x01, 0x00, 0x00]), "65536");
    }

    #[test]
    fn test_private_key_requires_password() {
        let mut manager = KeysManager::new();
        manager.add_key(
            Key::new(KeyData::Hmac(vec![1; 16]), KeyUsage::Sign)
                .with_name("alice")
                .with_password("secret"),
        );
        let crypto = KeystoreCrypto::new(manager);
        assert!(crypto.private_key("alice", "secret").is_ok());
        assert!(crypto.private_key("alice", "wrong").is_err());
        assert!(crypto.private_key("nobody", "secret").is_err());
    }

    #[test]
    fn test_certificates_missing_alias() {
        let crypto = KeystoreCrypto::new(KeysManager::new());
        assert!(crypto
            .certificates(&CertSelector::Alias("ghost".into()))
            .is_err());
    }

    #[test]
    fn test_validate_cert_path_direct_trust() {
        let mut manager = KeysManager::new();
        manager.add_trusted_cert(vec![1, 2, 3]);
        let crypto = KeystoreCrypto::new(manager);
        assert!(crypto.validate_cert_path(&[vec![1, 2, 3]]).unwrap());
        assert!(!crypto.validate_cert_path(&[vec![4, 5, 6]]).unwrap());
    }
}
