//! WS-Security orchestration for AS4 messages
//!
//! Signing and verification cover the ebMS Messaging header, the SOAP Body and
//! every attachment. Encryption protects attachments with an AES-GCM content
//! key wrapped by RSA-OAEP for the recipient certificate. Cryptographic
//! primitives come from audited crates; chain validation is delegated to
//! `rustls-webpki`.

pub mod algorithms;
pub mod certificates;
pub mod encryption;
pub mod references;
pub mod signing;
pub mod transforms;
pub mod verification;

pub use algorithms::*;
pub use certificates::{
    Certificate, CertificateFindCriteria, CertificateRepository, FindType,
    InMemoryCertificateRepository, KeyReferenceMethod, SigningCredential, TrustStore,
};
pub use encryption::{decrypt_message, encrypt_message, EncryptionOptions};
pub use signing::{sign_message, SigningOptions};
pub use verification::{verify_message, VerificationOptions};

use thiserror::Error;

/// Failures raised while securing or validating a message
///
/// None of these are downgraded to warnings: an untrusted chain, a bad
/// signature or an unsupported algorithm always rejects the message.
#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("Certificate is not trusted: {0}")]
    UntrustedCertificate(String),

    #[error("Certificate not found: {0}")]
    CertificateNotFound(String),

    #[error("Invalid certificate or key material: {0}")]
    InvalidKeyMaterial(String),

    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Malformed reference: {0}")]
    MalformedReference(String),

    #[error("Message is not signed")]
    MissingSignature,

    #[error("Message already carries a signature")]
    AlreadySigned,

    #[error("Message already carries encrypted data")]
    AlreadyEncrypted,

    #[error("Signature value does not verify")]
    InvalidSignature,

    #[error("Digest mismatch for reference '{uri}'")]
    DigestMismatch { uri: String },

    #[error("Attachment '{uri}' is not covered by the signature")]
    UncoveredAttachment { uri: String },

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Security policy violation: {0}")]
    PolicyViolation(String),

    #[error("Attachment stream error: {0}")]
    Io(#[from] std::io::Error),
}

impl SecurityError {
    pub fn malformed_reference<S: Into<String>>(message: S) -> Self {
        Self::MalformedReference(message.into())
    }

    pub fn policy_violation<S: Into<String>>(message: S) -> Self {
        Self::PolicyViolation(message.into())
    }
}

impl From<crate::protocol::ReferenceError> for SecurityError {
    fn from(err: crate::protocol::ReferenceError) -> Self {
        Self::MalformedReference(err.to_string())
    }
}
