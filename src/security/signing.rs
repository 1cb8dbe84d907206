//! Message signing

use super::algorithms::{DigestAlgorithm, SignatureAlgorithm};
use super::certificates::{reference_certificate, KeyReferenceMethod, SigningCredential};
use super::references::create_reference;
use super::SecurityError;
use crate::protocol::{As4Message, Signature, SignedInfo, EXC_C14N};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SigningOptions {
    pub signature_algorithm: SignatureAlgorithm,
    pub digest_algorithm: DigestAlgorithm,
    pub key_reference_method: KeyReferenceMethod,
}

impl Default for SigningOptions {
    fn default() -> Self {
        Self {
            signature_algorithm: SignatureAlgorithm::RsaSha256,
            digest_algorithm: DigestAlgorithm::Sha256,
            key_reference_method: KeyReferenceMethod::BinarySecurityToken,
        }
    }
}

/// Sign the Messaging header, the SOAP Body and every attachment
///
/// Attachments that are already encrypted are referenced through the
/// ciphertext transform, so encrypt-then-sign and sign-then-encrypt both
/// produce verifiable messages. Attachment cursors are rewound afterwards.
pub fn sign_message(
    message: &mut As4Message,
    credential: &SigningCredential,
    options: &SigningOptions,
) -> Result<(), SecurityError> {
    if message.is_signed() {
        return Err(SecurityError::AlreadySigned);
    }

    let result = build_signature(message, credential, options);
    for attachment in &mut message.attachments {
        attachment.rewind();
    }
    let signature = result?;

    debug!(
        message_id = message.primary_message_id().unwrap_or_default(),
        references = signature.signed_info.references.len(),
        algorithm = options.signature_algorithm.uri(),
        "Message signed"
    );
    message.security_header.signature = Some(signature);
    Ok(())
}

fn build_signature(
    message: &mut As4Message,
    credential: &SigningCredential,
    options: &SigningOptions,
) -> Result<Signature, SecurityError> {
    let mut uris = vec![
        format!("#{}", message.messaging_id),
        format!("#{}", message.body_id),
    ];
    uris.extend(message.attachments.iter().map(|a| a.cid_uri()));

    let envelope = message.envelope_element();
    let references = uris
        .into_iter()
        .map(|uri| create_reference(message, &envelope, uri, options.digest_algorithm))
        .collect::<Result<Vec<_>, _>>()?;

    let signed_info = SignedInfo {
        canonicalization_method: EXC_C14N.to_string(),
        signature_method: options.signature_algorithm.uri().to_string(),
        references,
    };
    let signature_value = options
        .signature_algorithm
        .sign(credential.private_key(), &signed_info.to_element().canonicalize())?;

    let key_info = reference_certificate(
        &mut message.security_header,
        &credential.certificate,
        options.key_reference_method,
    )?;

    Ok(Signature {
        id: format!("sig-{}", Uuid::new_v4()),
        signed_info,
        signature_value: STANDARD.encode(signature_value),
        key_info,
    })
}
