#![forbid(unsafe_code)]

//! Key material, security tokens, and the crypto-provider boundary for
//! the Vaxholm WS-Security library.

pub mod crypto;
pub mod key;
pub mod manager;
pub mod token;

pub use crypto::{CertSelector, Crypto, KeystoreCrypto};
pub use key::{Key, KeyData, KeyUsage};
pub use manager::KeysManager;
pub use token::SecurityToken;
