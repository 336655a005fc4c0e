#![forbid(unsafe_code)]

pub use vaxholm_c14n as c14n;
pub use vaxholm_core as core;
pub use vaxholm_crypto as crypto;
pub use vaxholm_keys as keys;
pub use vaxholm_policy as policy;
pub use vaxholm_wss as wss;
pub use vaxholm_xml as xml;
