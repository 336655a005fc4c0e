#![forbid(unsafe_code)]

//! Streaming XML event model for the Vaxholm WS-Security library.
//!
//! The security processors operate on [`XmlEvent`]s rather than a
//! materialized tree: a reader turns wire bytes into events with resolved
//! namespaces, processors transform or synthesize events, and a writer
//! serializes the resulting stream back to bytes.

pub mod event;
pub mod nsctx;
pub mod reader;
pub mod writer;

pub use event::{Attribute, NsDecl, QName, StartElement, XmlEvent};
pub use nsctx::NsContext;
pub use reader::EventReader;
pub use writer::EventWriter;
