//! SwA attachment transforms
//!
//! Both transforms digest the raw content octets of the MIME part, never its
//! framing. They differ in which state of the attachment they apply to: the
//! content transform covers plaintext, the ciphertext transform covers an
//! attachment that was encrypted before signing.

use super::algorithms::{ATTACHMENT_CIPHERTEXT_TRANSFORM, ATTACHMENT_CONTENT_SIGNATURE_TRANSFORM};
use super::SecurityError;
use crate::protocol::Attachment;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentTransform {
    ContentSignature,
    Ciphertext,
}

impl AttachmentTransform {
    pub fn from_uri(uri: &str) -> Result<Self, SecurityError> {
        match uri {
            ATTACHMENT_CONTENT_SIGNATURE_TRANSFORM => Ok(Self::ContentSignature),
            ATTACHMENT_CIPHERTEXT_TRANSFORM => Ok(Self::Ciphertext),
            other => Err(SecurityError::UnsupportedAlgorithm(other.to_string())),
        }
    }

    pub fn uri(&self) -> &'static str {
        match self {
            Self::ContentSignature => ATTACHMENT_CONTENT_SIGNATURE_TRANSFORM,
            Self::Ciphertext => ATTACHMENT_CIPHERTEXT_TRANSFORM,
        }
    }

    /// Transform a signer applies to an attachment in its current state
    pub fn for_state(encrypted: bool) -> Self {
        if encrypted {
            Self::Ciphertext
        } else {
            Self::ContentSignature
        }
    }

    /// Octets to digest; leaves the attachment cursor at the end of its content
    pub fn apply(
        &self,
        attachment: &mut Attachment,
        encrypted: bool,
    ) -> Result<Vec<u8>, SecurityError> {
        match (self, encrypted) {
            (Self::ContentSignature, true) => Err(SecurityError::malformed_reference(format!(
                "{} is still encrypted; decrypt before verifying its content signature",
                attachment.cid_uri()
            ))),
            (Self::Ciphertext, false) => Err(SecurityError::malformed_reference(format!(
                "{} is referenced through the ciphertext transform but is not encrypted",
                attachment.cid_uri()
            ))),
            _ => Ok(attachment.read_from_start()?),
        }
    }
}
