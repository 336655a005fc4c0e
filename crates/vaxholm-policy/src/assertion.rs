#![forbid(unsafe_code)]

//! The assertion evaluation contract.

use crate::model::Assertion;
use crate::states::{
    AlgorithmSuiteAssertionState, EncryptedElementsAssertionState, SignedElementsAssertionState,
};
use vaxholm_core::Result;
use vaxholm_wss::{SecurityEvent, SecurityEventKind};

/// One evaluation unit bound to one policy assertion.
///
/// `assert_event` returns `Ok(true)` while the assertion holds,
/// `Ok(false)` after a soft mismatch (recorded, correctable in
/// principle, judged at finalization), and `Err` on a hard violation:
/// a structurally contradictory event that eliminates the containing
/// alternative immediately.
pub trait Assertable: Send {
    fn name(&self) -> &'static str;

    /// The event kinds this assertion wants to see.
    fn interested_in(&self) -> &'static [SecurityEventKind];

    fn assert_event(&mut self, event: &SecurityEvent) -> Result<bool>;

    fn is_asserted(&self) -> bool;

    fn error_message(&self) -> Option<&str>;
}

/// Common asserted/error bookkeeping embedded by the concrete states.
#[derive(Debug)]
pub struct AssertionState {
    asserted: bool,
    error_message: Option<String>,
}

impl AssertionState {
    pub fn new(asserted: bool) -> Self {
        Self {
            asserted,
            error_message: None,
        }
    }

    pub fn is_asserted(&self) -> bool {
        self.asserted
    }

    pub fn set_asserted(&mut self, asserted: bool) {
        self.asserted = asserted;
    }

    /// Record a soft violation.
    pub fn set_error(&mut self, message: impl Into<String>) {
        self.asserted = false;
        self.error_message = Some(message.into());
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }
}

/// Registry mapping each assertion type to a fresh state. Called once
/// per alternative per assertion so state is never shared across
/// alternatives.
pub fn build_state(assertion: &Assertion) -> Box<dyn Assertable> {
    match assertion {
        Assertion::AlgorithmSuite(policy) => {
            Box::new(AlgorithmSuiteAssertionState::new(policy.clone()))
        }
        Assertion::SignedElements(selection) => {
            Box::new(SignedElementsAssertionState::new(selection.clone()))
        }
        Assertion::EncryptedElements(selection) => {
            Box::new(EncryptedElementsAssertionState::new(selection.clone()))
        }
    }
}
