#![forbid(unsafe_code)]

//! Output processors: transform the outbound application event stream
//! into a secured SOAP message.

pub mod encrypt;
pub mod encrypt_ending;
pub mod header;
pub mod signature;
pub mod signature_ending;

pub use encrypt::EncryptProcessor;
pub use encrypt_ending::{EncryptEndingProcessor, WrapKey};
pub use header::SecurityHeaderProcessor;
pub use signature::SignatureProcessor;
pub use signature_ending::{KeyInfoData, SignatureEndingProcessor};

use vaxholm_core::ns;
use vaxholm_xml::{QName, StartElement, XmlEvent};

pub(crate) fn ds(local: &str) -> QName {
    QName::new(ns::DSIG, ns::prefix::DSIG, local)
}

pub(crate) fn xenc(local: &str) -> QName {
    QName::new(ns::ENC, ns::prefix::ENC, local)
}

pub(crate) fn wsse(local: &str) -> QName {
    QName::new(ns::WSSE, ns::prefix::WSSE, local)
}

pub(crate) fn wsu_id() -> QName {
    QName::new(ns::WSU, ns::prefix::WSU, ns::attr::ID)
}

/// Convenience: emit `<name>text</name>` as three events.
pub(crate) fn text_element(name: QName, text: impl Into<String>) -> [XmlEvent; 3] {
    [
        XmlEvent::start(StartElement::new(name.clone())),
        XmlEvent::text(text),
        XmlEvent::end(name),
    ]
}

/// Convenience: emit `<name Algorithm="uri"/>` as two events.
pub(crate) fn algorithm_element(name: QName, uri: &str) -> [XmlEvent; 2] {
    [
        XmlEvent::start(
            StartElement::new(name.clone())
                .with_attribute(QName::unqualified(ns::attr::ALGORITHM), uri),
        ),
        XmlEvent::end(name),
    ]
}
