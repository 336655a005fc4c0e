#![forbid(unsafe_code)]

//! Streaming WS-Security processor pipeline.
//!
//! Outbound, application XML events flow through an ordered chain of
//! processors (encrypt, sign, and their buffering "ending" counterparts)
//! that transform the stream into a secured SOAP message. Inbound, wire
//! events flow through the symmetric chain (security-header parse and
//! verification, reference digest checks, decryption). Both directions
//! register [`event::SecurityEvent`]s into the [`context::SecurityContext`]
//! as security facts are established; a policy engine consumes them.

pub mod chain;
pub mod context;
pub mod event;
pub mod input;
pub mod output;
pub mod pipeline;
pub mod properties;

pub use chain::{ChainCursor, Processor, ProcessorChain, ProcessorId};
pub use context::{PendingReference, SecurityContext, SignaturePartDef};
pub use event::{KeyUsage, SecurityEvent, SecurityEventKind, TokenType};
pub use pipeline::{InboundPipeline, InboundResult, OutboundPipeline, OutboundResult};
pub use properties::{Action, KeyIdentifierType, SecurePart, SecurityProperties};
