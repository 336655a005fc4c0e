#![forbid(unsafe_code)]

//! Core types shared across the Vaxholm streaming WS-Security workspace.

pub mod algorithm;
pub mod error;
pub mod ns;

pub use error::{Error, Result};
