#![forbid(unsafe_code)]

//! Streaming WS-SecurityPolicy enforcement.
//!
//! The [`PolicyEnforcer`] consumes the security events the processor
//! pipeline emits and decides, incrementally and at end of stream,
//! whether the message satisfies at least one alternative of a
//! normalized policy. Policies arrive already flattened to an
//! OR-of-ANDs of typed assertions; this crate never parses policy XML.

pub mod assertion;
pub mod enforcer;
pub mod model;
pub mod states;

pub use assertion::{Assertable, AssertionState};
pub use enforcer::PolicyEnforcer;
pub use model::{AlgorithmSuitePolicy, Assertion, ElementSelection, NormalizedPolicy};
