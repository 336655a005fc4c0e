#![forbid(unsafe_code)]

//! Per-message security context.
//!
//! The context is the explicit side channel between processors: security
//! events are registered here as they are established, tokens are shared
//! by id, and the signature processors hand part definitions and pending
//! references to their counterparts through it. One context belongs to
//! exactly one message; nothing in it outlives the message.

use crate::event::SecurityEvent;
use std::collections::HashMap;
use tracing::debug;
use vaxholm_keys::SecurityToken;

/// One pending outbound reference: a part selected for signing, its digest
/// filled in once the subtree has streamed past the digester.
#[derive(Debug, Clone)]
pub struct SignaturePartDef {
    /// The wsu:Id of the referenced element.
    pub id: String,
    /// Base64 digest value.
    pub digest_value: String,
    /// The transform (canonicalization) algorithm applied to the part.
    pub transform_uri: String,
    /// The digest algorithm.
    pub digest_uri: String,
}

/// One inbound reference awaiting its target element: parsed from
/// `<ds:SignedInfo>`, consumed when the referenced element streams by.
#[derive(Debug, Clone)]
pub struct PendingReference {
    pub id: String,
    pub digest_uri: String,
    pub c14n_uri: String,
    /// Expected base64 digest value.
    pub digest_value: String,
}

/// Mutable state shared along one message's processor chain.
#[derive(Default)]
pub struct SecurityContext {
    events: Vec<SecurityEvent>,
    tokens: HashMap<String, SecurityToken>,
    signature_parts: Vec<SignaturePartDef>,
    pending_references: Vec<PendingReference>,
    data_references: Vec<String>,
    id_counter: u64,
}

impl SecurityContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a security fact. Explicit, never implicit: processors call
    /// this at the moment the fact is established.
    pub fn register_security_event(&mut self, event: SecurityEvent) {
        debug!(?event, "security event registered");
        self.events.push(event);
    }

    /// The events registered so far, in registration order.
    pub fn security_events(&self) -> &[SecurityEvent] {
        &self.events
    }

    pub fn take_security_events(&mut self) -> Vec<SecurityEvent> {
        std::mem::take(&mut self.events)
    }

    /// Register a per-message security token under its id.
    pub fn register_token(&mut self, token: SecurityToken) {
        self.tokens.insert(token.id().to_owned(), token);
    }

    pub fn token(&self, id: &str) -> Option<&SecurityToken> {
        self.tokens.get(id)
    }

    pub fn add_signature_part(&mut self, part: SignaturePartDef) {
        self.signature_parts.push(part);
    }

    pub fn take_signature_parts(&mut self) -> Vec<SignaturePartDef> {
        std::mem::take(&mut self.signature_parts)
    }

    pub fn add_pending_reference(&mut self, reference: PendingReference) {
        self.pending_references.push(reference);
    }

    /// Claim the pending reference for an id, if one exists.
    pub fn take_pending_reference(&mut self, id: &str) -> Option<PendingReference> {
        let pos = self.pending_references.iter().position(|r| r.id == id)?;
        Some(self.pending_references.remove(pos))
    }

    /// Ids of references whose target elements have not streamed by yet.
    pub fn pending_reference_ids(&self) -> Vec<String> {
        self.pending_references
            .iter()
            .map(|r| r.id.clone())
            .collect()
    }

    /// Record the id of an emitted `<xenc:EncryptedData>` element.
    pub fn add_data_reference(&mut self, id: String) {
        self.data_references.push(id);
    }

    pub fn take_data_references(&mut self) -> Vec<String> {
        std::mem::take(&mut self.data_references)
    }

    /// A fresh id, unique within this message.
    pub fn next_id(&mut self, prefix: &str) -> String {
        self.id_counter += 1;
        format!("{prefix}-{}", self.id_counter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_generation_unique() {
        let mut ctx = SecurityContext::new();
        let a = ctx.next_id("id");
        let b = ctx.next_id("id");
        let c = ctx.next_id("EK");
        assert_ne!(a, b);
        assert_eq!(a, "id-1");
        assert_eq!(c, "EK-3");
    }

    #[test]
    fn test_pending_reference_claim() {
        let mut ctx = SecurityContext::new();
        ctx.add_pending_reference(PendingReference {
            id: "id-1".into(),
            digest_uri: "d".into(),
            c14n_uri: "c".into(),
            digest_value: "v".into(),
        });
        assert!(ctx.take_pending_reference("other").is_none());
        assert!(ctx.take_pending_reference("id-1").is_some());
        assert!(ctx.take_pending_reference("id-1").is_none());
        assert!(ctx.pending_reference_ids().is_empty());
    }
}
