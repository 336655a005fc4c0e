#![forbid(unsafe_code)]

//! Normalized policy model.
//!
//! The external policy parser flattens arbitrary `All`/`ExactlyOne`
//! nesting into this OR-of-ANDs form before the engine sees it.

use vaxholm_xml::QName;

/// A normalized policy: the message must satisfy every assertion of at
/// least one alternative.
#[derive(Debug, Clone)]
pub struct NormalizedPolicy {
    pub alternatives: Vec<Vec<Assertion>>,
}

impl NormalizedPolicy {
    /// A policy with a single alternative.
    pub fn single(assertions: Vec<Assertion>) -> Self {
        Self {
            alternatives: vec![assertions],
        }
    }
}

/// The closed set of assertion types the engine evaluates.
#[derive(Debug, Clone)]
pub enum Assertion {
    AlgorithmSuite(AlgorithmSuitePolicy),
    SignedElements(ElementSelection),
    EncryptedElements(ElementSelection),
}

impl Assertion {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AlgorithmSuite(_) => "AlgorithmSuite",
            Self::SignedElements(_) => "SignedElements",
            Self::EncryptedElements(_) => "EncryptedElements",
        }
    }
}

/// Expected algorithm URI per key-usage role. A role left `None` is
/// unconstrained; absence of a constraint is never a violation.
#[derive(Debug, Clone, Default)]
pub struct AlgorithmSuitePolicy {
    pub symmetric_signature: Option<String>,
    pub asymmetric_signature: Option<String>,
    pub digest: Option<String>,
    pub encryption: Option<String>,
    pub symmetric_key_wrap: Option<String>,
    pub asymmetric_key_wrap: Option<String>,
    pub computed_key: Option<String>,
    pub encryption_key_derivation: Option<String>,
    pub signature_key_derivation: Option<String>,
    pub c14n: Option<String>,
    pub soap_normalization: Option<String>,
    pub str_transform: Option<String>,
    pub xpath: Option<String>,
}

/// The elements a SignedElements / EncryptedElements assertion covers,
/// resolved from the policy's XPath expressions to qualified names by
/// the external policy parser.
#[derive(Debug, Clone)]
pub struct ElementSelection {
    pub elements: Vec<QName>,
}

impl ElementSelection {
    pub fn new(elements: Vec<QName>) -> Self {
        Self { elements }
    }

    pub fn covers(&self, name: &QName) -> bool {
        self.elements
            .iter()
            .any(|e| name.matches(&e.namespace_uri, &e.local_name))
    }
}
