#![forbid(unsafe_code)]

//! Encrypted-elements assertion: every selected element must have been
//! encrypted. Additional encrypted elements are always permitted.

use crate::assertion::{Assertable, AssertionState};
use crate::model::ElementSelection;
use vaxholm_core::{Error, Result};
use vaxholm_wss::{SecurityEvent, SecurityEventKind};
use vaxholm_xml::QName;

pub struct EncryptedElementsAssertionState {
    state: AssertionState,
    required: Vec<(QName, Option<bool>)>,
}

impl EncryptedElementsAssertionState {
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

impl Assertable for EncryptedElementsAssertionState {
    fn name(&self) -> &'static str {
        "EncryptedElements"
    }

    fn interested_in(&self) -> &'static [SecurityEventKind] {
        &[SecurityEventKind::ContentEncrypted]
    }

    fn assert_event(&mut self, event: &SecurityEvent) -> Result<bool> {
        let SecurityEvent::ContentEncrypted { element, encrypted } = event else {
            return Ok(self.state.is_asserted());
        };
        if let Some((name, seen)) = self
            .required
            .iter_mut()
            .find(|(name, _)| element.matches(&name.namespace_uri, &name.local_name))
        {
            if *encrypted {
                *seen = Some(true);
            } else {
                // Contradicting an earlier encrypted report is fatal for
                // the alternative; a first unencrypted report is a soft
                // mismatch.
                if *seen == Some(true) {
                    return Err(Error::PolicyViolation(format!(
                        "element {name} must be encrypted"
                    )));
                }
                *seen = Some(false);
                self.state.set_error(format!("element {name} must be encrypted"));
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

    fn encrypted(ns: &str, local: &str, encrypted: bool) -> SecurityEvent {
        SecurityEvent::ContentEncrypted {
            element: QName::new(ns, "", local),
            encrypted,
        }
    }

    #[test]
    fn test_asserts_when_required_element_encrypted() {
        let selection = ElementSelection::new(vec![QName::new("http://example.org", "b", "a")]);
        let mut state = EncryptedElementsAssertionState::new(selection);
        state
            .assert_event(&encrypted("http://schemas.xmlsoap.org/soap/envelope/", "Body", true))
            .unwrap();
        assert!(!state.is_asserted());
        state
            .assert_event(&encrypted("http://example.org", "a", true))
            .unwrap();
        assert!(state.is_asserted());
        // Extra encrypted elements are fine.
        state
            .assert_event(&encrypted("http://example.com", "b", true))
            .unwrap();
        assert!(state.is_asserted());
    }

    #[test]
    fn test_contradicting_encrypted_report_is_hard_violation() {
        let selection = ElementSelection::new(vec![QName::new("http://example.org", "b", "a")]);
        let mut state = EncryptedElementsAssertionState::new(selection);
        state
            .assert_event(&encrypted("http://example.org", "a", true))
            .unwrap();
        assert!(state
            .assert_event(&encrypted("http://example.org", "a", false))
            .is_err());
    }

    #[test]
    fn test_first_unencrypted_report_is_soft_mismatch() {
        let selection = ElementSelection::new(vec![QName::new("http://example.org", "b", "a")]);
        let mut state = EncryptedElementsAssertionState::new(selection);
        let held = state
            .assert_event(&encrypted("http://example.org", "a", false))
            .unwrap();
        assert!(!held);
        assert!(state.error_message().unwrap().contains("must be encrypted"));
    }
}
