#![forbid(unsafe_code)]

//! Signed-elements assertion: every selected element must be covered by
//! a verified signature. Signed elements the policy does not mention
//! are always permitted.

use crate::assertion::{Assertable, AssertionState};
use crate::model::ElementSelection;
use vaxholm_core::{Error, Result};
use vaxholm_wss::{SecurityEvent, SecurityEventKind};
use vaxholm_xml::QName;

pub struct SignedElementsAssertionState {
    state: AssertionState,
    /// Selected elements and what the stream has said about them so far.
    required: Vec<(QName, Option<bool>)>,
}

impl SignedElementsAssertionState {
    pub fn new(selection: ElementSelection) -> Self {
        Self {
            state: AssertionState::new(false),
            required: selection
                .elements
                .into_iter()
                .map(|name| (name, None))
                .collect(),
        }
    }
}

impl Assertable for SignedElementsAssertionState {
    fn name(&self) -> &'static str {
        "SignedElements"
    }

    fn interested_in(&self) -> &'static [SecurityEventKind] {
        &[SecurityEventKind::SignedElement]
    }

    fn assert_event(&mut self, event: &SecurityEvent) -> Result<bool> {
        let SecurityEvent::SignedElement { element, signed } = event else {
            return Ok(self.state.is_asserted());
        };
        if let Some((name, seen)) = self
            .required
            .iter_mut()
            .find(|(name, _)| element.matches(&name.namespace_uri, &name.local_name))
        {
            if *signed {
                *seen = Some(true);
            } else {
                // An unsigned report after the element was already seen
                // signed is structurally contradictory and eliminates the
                // alternative outright; before that it is an ordinary
                // mismatch, judged at finalization.
                if *seen == Some(true) {
                    return Err(Error::PolicyViolation(format!(
                        "element {name} must be signed"
                    )));
                }
                *seen = Some(false);
                self.state.set_error(format!("element {name} must be signed"));
                return Ok(false);
            }
        }
        if self.required.iter().all(|(_, seen)| *seen == Some(true)) {
            self.state.set_asserted(true);
        }
        Ok(self.state.is_asserted())
    }

    fn is_asserted(&self) -> bool {
        self.state.is_asserted()
    }

    fn error_message(&self) -> Option<&str> {
        self.state.error_message()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed(ns: &str, local: &str, signed: bool) -> SecurityEvent {
        SecurityEvent::SignedElement {
            element: QName::new(ns, "", local),
            signed,
        }
    }

    fn selection() -> ElementSelection {
        ElementSelection::new(vec![QName::new("http://example.org", "b", "a")])
    }

    #[test]
    fn test_asserts_once_required_element_signed() {
        let mut state = SignedElementsAssertionState::new(selection());
        assert!(!state.is_asserted());
        state
            .assert_event(&signed("http://schemas.xmlsoap.org/soap/envelope/", "Body", true))
            .unwrap();
        assert!(!state.is_asserted());
        state.assert_event(&signed("http://example.org", "a", true)).unwrap();
        assert!(state.is_asserted());
    }

    #[test]
    fn test_extra_signed_elements_permitted() {
        let mut state = SignedElementsAssertionState::new(selection());
        state.assert_event(&signed("http://example.org", "a", true)).unwrap();
        state.assert_event(&signed("http://example.com", "b", true)).unwrap();
        assert!(state.is_asserted());
    }

    #[test]
    fn test_contradicting_signed_report_is_hard_violation() {
        let mut state = SignedElementsAssertionState::new(selection());
        state.assert_event(&signed("http://example.org", "a", true)).unwrap();
        let err = state
            .assert_event(&signed("http://example.org", "a", false))
            .unwrap_err();
        assert!(err.to_string().contains("{http://example.org}a"));
    }

    #[test]
    fn test_first_unsigned_report_is_soft_mismatch() {
        let mut state = SignedElementsAssertionState::new(selection());
        let held = state
            .assert_event(&signed("http://example.org", "a", false))
            .unwrap();
        assert!(!held);
        assert!(!state.is_asserted());
        assert!(state.error_message().unwrap().contains("must be signed"));
        // A later signed report corrects the mismatch.
        state.assert_event(&signed("http://example.org", "a", true)).unwrap();
        assert!(state.is_asserted());
    }
}
