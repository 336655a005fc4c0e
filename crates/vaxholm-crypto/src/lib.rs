#![forbid(unsafe_code)]

//! Cryptographic algorithm registries for the Vaxholm WS-Security library.
//!
//! Every algorithm is identified by its interoperable XML Security URI and
//! resolved through a factory function; an unknown URI is a
//! construction-time error, never a runtime surprise.

pub mod cipher;
pub mod digest;
pub mod keytransport;
pub mod keywrap;
pub mod registry;
pub mod sign;

pub use registry::AlgorithmRegistry;
pub use sign::{SignerStream, SigningKey};
