//! Signature verification

use super::algorithms::SignatureAlgorithm;
use super::certificates::{resolve_token_reference, CertificateRepository};
use super::references::check_reference;
use super::SecurityError;
use crate::protocol::{As4Message, SignatureReference, EXC_C14N};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerificationOptions {
    pub allow_unknown_root_authority: bool,
}

/// Verify the message signature and return the verified references
///
/// Order: resolve the signing certificate, validate its chain, check the
/// signature value over SignedInfo, then recompute every reference digest.
/// Every attachment must be covered by a reference. Whatever the outcome,
/// every attachment cursor is back at offset 0 when this returns.
pub fn verify_message(
    message: &mut As4Message,
    repository: &dyn CertificateRepository,
    options: &VerificationOptions,
) -> Result<Vec<SignatureReference>, SecurityError> {
    let result = verify(message, repository, options);
    for attachment in &mut message.attachments {
        attachment.rewind();
    }
    result
}

fn verify(
    message: &mut As4Message,
    repository: &dyn CertificateRepository,
    options: &VerificationOptions,
) -> Result<Vec<SignatureReference>, SecurityError> {
    let signature = message
        .security_header
        .signature
        .clone()
        .ok_or(SecurityError::MissingSignature)?;

    let certificate = resolve_token_reference(message, &signature.key_info, repository)?;
    repository
        .trust_store()
        .validate(&certificate, options.allow_unknown_root_authority)?;

    if signature.signed_info.canonicalization_method != EXC_C14N {
        return Err(SecurityError::UnsupportedAlgorithm(
            signature.signed_info.canonicalization_method.clone(),
        ));
    }
    let algorithm = SignatureAlgorithm::from_uri(&signature.signed_info.signature_method)?;
    let signature_value = STANDARD
        .decode(&signature.signature_value)
        .map_err(|_| SecurityError::InvalidSignature)?;
    algorithm.verify(
        certificate.public_key(),
        &signature.signed_info.to_element().canonicalize(),
        &signature_value,
    )?;

    let envelope = message.envelope_element();
    for reference in &signature.signed_info.references {
        check_reference(message, &envelope, reference)?;
    }

    let messaging_uri = format!("#{}", message.messaging_id);
    if !signature
        .signed_info
        .references
        .iter()
        .any(|reference| reference.uri == messaging_uri)
    {
        return Err(SecurityError::malformed_reference(
            "signature does not cover the ebMS Messaging header",
        ));
    }

    if let Some(uncovered) = message.attachments.iter().find(|attachment| {
        !signature
            .signed_info
            .references
            .iter()
            .any(|reference| attachment.matches_uri(&reference.uri))
    }) {
        return Err(SecurityError::UncoveredAttachment {
            uri: uncovered.cid_uri(),
        });
    }

    debug!(
        message_id = message.primary_message_id().unwrap_or_default(),
        signer = %certificate.subject(),
        references = signature.signed_info.references.len(),
        "Signature verified"
    );
    Ok(signature.signed_info.references)
}
