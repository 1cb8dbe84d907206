//! AS4 protocol model
//!
//! ebMS3 message units, SwA attachments, the WS-Security header and the SOAP
//! element tree they are rendered into for signing and reference resolution.

pub mod attachment;
pub mod envelope;
pub mod messages;
pub mod xml;

pub use attachment::Attachment;
pub use envelope::*;
pub use messages::*;
pub use xml::{XmlElement, XmlNode, EXC_C14N};
