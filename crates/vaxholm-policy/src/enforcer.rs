#![forbid(unsafe_code)]

//! The policy enforcement engine.

use crate::assertion::{build_state, Assertable};
use crate::model::NormalizedPolicy;
use tracing::debug;
use vaxholm_core::{Error, Result};
use vaxholm_wss::SecurityEvent;

struct Alternative {
    viable: bool,
    states: Vec<Box<dyn Assertable>>,
    /// Message of the hard violation that eliminated this alternative.
    hard_error: Option<String>,
}

impl Alternative {
    fn asserted_count(&self) -> usize {
        self.states.iter().filter(|s| s.is_asserted()).count()
    }

    fn diagnostics(&self) -> Vec<String> {
        let mut messages: Vec<String> = self.hard_error.iter().cloned().collect();
        for state in &self.states {
            if !state.is_asserted() {
                messages.push(
                    state
                        .error_message()
                        .map(str::to_owned)
                        .unwrap_or_else(|| format!("assertion {} was not satisfied", state.name())),
                );
            }
        }
        messages
    }
}

/// Routes incoming security events to every interested assertion state
/// in every still-viable alternative, prunes alternatives a hard
/// violation has eliminated, and yields the final verdict at end of
/// stream. Owned by one message; never reused.
pub struct PolicyEnforcer {
    alternatives: Vec<Alternative>,
}

impl PolicyEnforcer {
    /// Build the engine from a normalized policy. Every alternative gets
    /// its own assertion states, so partial success in one alternative
    /// never leaks into another.
    pub fn new(policy: &NormalizedPolicy) -> Self {
        let alternatives = policy
            .alternatives
            .iter()
            .map(|assertions| Alternative {
                viable: true,
                states: assertions.iter().map(build_state).collect(),
                hard_error: None,
            })
            .collect();
        Self { alternatives }
    }

    /// Register one security event. Fails only when the event's hard
    /// violations leave no viable alternative; soft mismatches are
    /// collected and judged at [`PolicyEnforcer::do_final`].
    pub fn register_event(&mut self, event: &SecurityEvent) -> Result<()> {
        let kind = event.kind();
        for (index, alternative) in self.alternatives.iter_mut().enumerate() {
            if !alternative.viable {
                continue;
            }
            for state in &mut alternative.states {
                if !state.interested_in().contains(&kind) {
                    continue;
                }
                if let Err(violation) = state.assert_event(event) {
                    debug!(alternative = index, %violation, "alternative eliminated");
                    alternative.viable = false;
                    alternative.hard_error = Some(violation.to_string());
                    break;
                }
            }
        }
        if self.alternatives.iter().all(|a| !a.viable) {
            return Err(Error::PolicyViolation(self.best_diagnostics()));
        }
        Ok(())
    }

    /// End-of-stream verdict: succeeds iff some viable alternative has
    /// every assertion asserted, short-circuiting on the first.
    pub fn do_final(&mut self) -> Result<()> {
        for alternative in &self.alternatives {
            if alternative.viable && alternative.states.iter().all(|s| s.is_asserted()) {
                return Ok(());
            }
        }
        Err(Error::PolicyViolation(self.best_diagnostics()))
    }

    /// Diagnostics from the alternative that came closest to success.
    fn best_diagnostics(&self) -> String {
        self.alternatives
            .iter()
            .max_by_key(|a| a.asserted_count())
            .map(|a| a.diagnostics().join("; "))
            .unwrap_or_else(|| "policy has no alternatives".to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AlgorithmSuitePolicy, Assertion, ElementSelection};
    use vaxholm_core::algorithm;
    use vaxholm_wss::KeyUsage;
    use vaxholm_xml::QName;

    fn signed_elements_policy() -> NormalizedPolicy {
        NormalizedPolicy::single(vec![Assertion::SignedElements(ElementSelection::new(
            vec![QName::new("http://example.org", "b", "a")],
        ))])
    }

    fn signed(ns: &str, local: &str, signed: bool) -> SecurityEvent {
        SecurityEvent::SignedElement {
            element: QName::new(ns, "", local),
            signed,
        }
    }

    #[test]
    fn test_signed_elements_policy_satisfied() {
        let mut enforcer = PolicyEnforcer::new(&signed_elements_policy());
        enforcer
            .register_event(&signed("http://schemas.xmlsoap.org/soap/envelope/", "Body", true))
            .unwrap();
        enforcer.register_event(&signed("http://example.org", "a", true)).unwrap();
        // Additional signed elements are also allowed.
        enforcer.register_event(&signed("http://example.com", "b", true)).unwrap();
        enforcer.do_final().unwrap();
    }

    #[test]
    fn test_contradictory_event_fails_at_registration() {
        let mut enforcer = PolicyEnforcer::new(&signed_elements_policy());
        enforcer
            .register_event(&signed("http://schemas.xmlsoap.org/soap/envelope/", "Body", true))
            .unwrap();
        enforcer.register_event(&signed("http://example.org", "a", true)).unwrap();
        let err = enforcer
            .register_event(&signed("http://example.org", "a", false))
            .unwrap_err();
        assert!(matches!(err, Error::PolicyViolation(_)));
        assert!(err.to_string().contains("{http://example.org}a"));
    }

    #[test]
    fn test_unsigned_report_fails_at_final_with_element_in_cause() {
        let mut enforcer = PolicyEnforcer::new(&signed_elements_policy());
        enforcer
            .register_event(&signed("http://schemas.xmlsoap.org/soap/envelope/", "Body", true))
            .unwrap();
        enforcer.register_event(&signed("http://example.org", "a", false)).unwrap();
        let err = enforcer.do_final().unwrap_err();
        assert!(err.to_string().contains("{http://example.org}a"));
    }

    #[test]
    fn test_unseen_required_element_fails_at_final() {
        let mut enforcer = PolicyEnforcer::new(&signed_elements_policy());
        enforcer
            .register_event(&signed("http://schemas.xmlsoap.org/soap/envelope/", "Body", true))
            .unwrap();
        assert!(enforcer.do_final().is_err());
    }

    #[test]
    fn test_algorithm_suite_mismatch_rejected_at_final() {
        let policy = NormalizedPolicy::single(vec![Assertion::AlgorithmSuite(
            AlgorithmSuitePolicy {
                asymmetric_signature: Some(algorithm::RSA_SHA256.into()),
                ..Default::default()
            },
        )]);
        let mut enforcer = PolicyEnforcer::new(&policy);
        enforcer
            .register_event(&SecurityEvent::AlgorithmSuite {
                key_usage: KeyUsage::AsymSig,
                algorithm_uri: algorithm::RSA_SHA1.into(),
            })
            .unwrap();
        let err = enforcer.do_final().unwrap_err();
        assert!(err.to_string().contains("does not meet policy"));
    }

    #[test]
    fn test_algorithm_suite_match_accepted() {
        let policy = NormalizedPolicy::single(vec![Assertion::AlgorithmSuite(
            AlgorithmSuitePolicy {
                asymmetric_signature: Some(algorithm::RSA_SHA256.into()),
                ..Default::default()
            },
        )]);
        let mut enforcer = PolicyEnforcer::new(&policy);
        enforcer
            .register_event(&SecurityEvent::AlgorithmSuite {
                key_usage: KeyUsage::AsymSig,
                algorithm_uri: algorithm::RSA_SHA256.into(),
            })
            .unwrap();
        enforcer.do_final().unwrap();
    }

    #[test]
    fn test_second_alternative_satisfies_policy() {
        let policy = NormalizedPolicy {
            alternatives: vec![
                vec![Assertion::SignedElements(ElementSelection::new(vec![
                    QName::new("urn:never", "n", "present"),
                ]))],
                vec![Assertion::SignedElements(ElementSelection::new(vec![
                    QName::new("http://example.org", "b", "a"),
                ]))],
            ],
        };
        let mut enforcer = PolicyEnforcer::new(&policy);
        enforcer.register_event(&signed("http://example.org", "a", true)).unwrap();
        enforcer.do_final().unwrap();
    }

    #[test]
    fn test_hard_violation_eliminates_only_one_alternative() {
        let policy = NormalizedPolicy {
            alternatives: vec![
                vec![Assertion::SignedElements(ElementSelection::new(vec![
                    QName::new("urn:one", "o", "x"),
                ]))],
                vec![Assertion::SignedElements(ElementSelection::new(vec![
                    QName::new("urn:two", "t", "y"),
                ]))],
            ],
        };
        let mut enforcer = PolicyEnforcer::new(&policy);
        // Contradictory reports kill the first alternative, leaving the
        // second viable.
        enforcer.register_event(&signed("urn:one", "x", true)).unwrap();
        enforcer.register_event(&signed("urn:one", "x", false)).unwrap();
        enforcer.register_event(&signed("urn:two", "y", true)).unwrap();
        enforcer.do_final().unwrap();
    }

    #[test]
    fn test_independent_state_per_alternative() {
        // Two alternatives referencing syntactically identical
        // assertions get independent state.
        let selection = ElementSelection::new(vec![QName::new("urn:e", "e", "x")]);
        let policy = NormalizedPolicy {
            alternatives: vec![
                vec![Assertion::SignedElements(selection.clone())],
                vec![
                    Assertion::SignedElements(selection),
                    Assertion::AlgorithmSuite(AlgorithmSuitePolicy {
                        digest: Some(algorithm::SHA256.into()),
                        ..Default::default()
                    }),
                ],
            ],
        };
        let mut enforcer = PolicyEnforcer::new(&policy);
        enforcer.register_event(&signed("urn:e", "x", true)).unwrap();
        enforcer
            .register_event(&SecurityEvent::AlgorithmSuite {
                key_usage: KeyUsage::Dig,
                algorithm_uri: algorithm::SHA1.into(),
            })
            .unwrap();
        // First alternative succeeds even though the second's algorithm
        // suite assertion failed.
        enforcer.do_final().unwrap();
    }
}
