#![forbid(unsafe_code)]

//! Algorithm-suite assertion: every algorithm the message used, in
//! every key-usage role the policy constrains, must match the declared
//! URI. Roles the policy leaves open always pass.

use crate::assertion::{Assertable, AssertionState};
use crate::model::AlgorithmSuitePolicy;
use vaxholm_core::Result;
use vaxholm_wss::{KeyUsage, SecurityEvent, SecurityEventKind};

pub struct AlgorithmSuiteAssertionState {
    state: AssertionState,
    policy: AlgorithmSuitePolicy,
}

impl AlgorithmSuiteAssertionState {
    pub fn new(policy: AlgorithmSuitePolicy) -> Self {
        Self {
            // Holds until an event contradicts it.
            state: AssertionState::new(true),
            policy,
        }
    }

    fn expectation(&self, key_usage: KeyUsage) -> (Option<&String>, &'static str) {
        match key_usage {
            KeyUsage::SymSig => (
                self.policy.symmetric_signature.as_ref(),
                "Symmetric signature",
            ),
            KeyUsage::AsymSig => (
                self.policy.asymmetric_signature.as_ref(),
                "Asymmetric signature",
            ),
            KeyUsage::Dig => (self.policy.digest.as_ref(), "Digest"),
            KeyUsage::Enc => (self.policy.encryption.as_ref(), "Encryption"),
            KeyUsage::SymKeyWrap => (
                self.policy.symmetric_key_wrap.as_ref(),
                "Symmetric key wrap",
            ),
            KeyUsage::AsymKeyWrap => (
                self.policy.asymmetric_key_wrap.as_ref(),
                "Asymmetric key wrap",
            ),
            KeyUsage::CompKey => (self.policy.computed_key.as_ref(), "Computed key"),
            KeyUsage::EncKd => (
                self.policy.encryption_key_derivation.as_ref(),
                "Encryption key derivation",
            ),
            KeyUsage::SigKd => (
                self.policy.signature_key_derivation.as_ref(),
                "Signature key derivation",
            ),
            KeyUsage::C14n => (self.policy.c14n.as_ref(), "C14N"),
            KeyUsage::SoapNorm => (
                self.policy.soap_normalization.as_ref(),
                "Soap normalization",
            ),
            KeyUsage::StrTrans => (self.policy.str_transform.as_ref(), "STR transformation"),
            KeyUsage::XPath => (self.policy.xpath.as_ref(), "XPath"),
        }
    }
}

impl Assertable for AlgorithmSuiteAssertionState {
    fn name(&self) -> &'static str {
        "AlgorithmSuite"
    }

    fn interested_in(&self) -> &'static [SecurityEventKind] {
        &[SecurityEventKind::AlgorithmSuite]
    }

    fn assert_event(&mut self, event: &SecurityEvent) -> Result<bool> {
        let SecurityEvent::AlgorithmSuite {
            key_usage,
            algorithm_uri,
        } = event
        else {
            return Ok(self.state.is_asserted());
        };
        let (expected, role) = self.expectation(*key_usage);
        if let Some(expected) = expected {
            if expected != algorithm_uri {
                let message = format!("{role} algorithm {algorithm_uri} does not meet policy");
                self.state.set_error(message);
                return Ok(false);
            }
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
    use vaxholm_core::algorithm;

    fn suite_event(key_usage: KeyUsage, uri: &str) -> SecurityEvent {
        SecurityEvent::AlgorithmSuite {
            key_usage,
            algorithm_uri: uri.into(),
        }
    }

    #[test]
    fn test_matching_algorithm_holds() {
        let mut state = AlgorithmSuiteAssertionState::new(AlgorithmSuitePolicy {
            asymmetric_signature: Some(algorithm::RSA_SHA256.into()),
            ..Default::default()
        });
        assert!(state
            .assert_event(&suite_event(KeyUsage::AsymSig, algorithm::RSA_SHA256))
            .unwrap());
        assert!(state.is_asserted());
    }

    #[test]
    fn test_mismatch_is_soft_violation() {
        let mut state = AlgorithmSuiteAssertionState::new(AlgorithmSuitePolicy {
            asymmetric_signature: Some(algorithm::RSA_SHA256.into()),
            ..Default::default()
        });
        let held = state
            .assert_event(&suite_event(KeyUsage::AsymSig, algorithm::RSA_SHA1))
            .unwrap();
        assert!(!held);
        assert!(!state.is_asserted());
        assert!(state.error_message().unwrap().contains("rsa-sha1"));
    }

    #[test]
    fn test_unconstrained_role_always_passes() {
        let mut state = AlgorithmSuiteAssertionState::new(AlgorithmSuitePolicy {
            asymmetric_signature: Some(algorithm::RSA_SHA256.into()),
            ..Default::default()
        });
        assert!(state
            .assert_event(&suite_event(KeyUsage::Dig, algorithm::SHA1))
            .unwrap());
        assert!(state
            .assert_event(&suite_event(KeyUsage::C14n, algorithm::EXC_C14N))
            .unwrap());
        assert!(state.is_asserted());
    }
}
