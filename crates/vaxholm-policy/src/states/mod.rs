#![forbid(unsafe_code)]

//! Concrete assertion state implementations.

pub mod algorithm_suite;
pub mod encrypted_elements;
pub mod signed_elements;

pub use algorithm_suite::AlgorithmSuiteAssertionState;
pub use encrypted_elements::EncryptedElementsAssertionState;
pub use signed_elements::SignedElementsAssertionState;
