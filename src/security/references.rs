//! Signature reference digests
//!
//! Same-document references (`#id`) resolve to exactly one element of the
//! envelope and are digested over their exclusive canonical form. `cid:`
//! references resolve to an attachment and go through an SwA transform.

use super::algorithms::DigestAlgorithm;
use super::transforms::AttachmentTransform;
use super::SecurityError;
use crate::protocol::{find_unique_id, As4Message, SignatureReference, XmlElement, EXC_C14N};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Whether the attachment behind `uri` is currently covered by an EncryptedData entry
pub fn is_attachment_encrypted(message: &As4Message, uri: &str) -> bool {
    message
        .attachment(uri)
        .map(|attachment| {
            message
                .security_header
                .encrypted_data
                .iter()
                .any(|data| attachment.matches_uri(&data.cipher_reference))
        })
        .unwrap_or(false)
}

/// Compute the digest a reference designates
///
/// `#id` references resolve against `envelope`, the message's
/// [`As4Message::envelope_element`] built once per sign or verify.
pub fn reference_digest(
    message: &mut As4Message,
    envelope: &XmlElement,
    uri: &str,
    transforms: &[String],
    digest: DigestAlgorithm,
) -> Result<Vec<u8>, SecurityError> {
    if let Some(id) = uri.strip_prefix('#') {
        if transforms.iter().any(|transform| transform != EXC_C14N) {
            return Err(SecurityError::UnsupportedAlgorithm(transforms.join(", ")));
        }
        let element = find_unique_id(envelope, id)?;
        return Ok(digest.digest(&element.canonicalize()));
    }

    if uri.starts_with("cid:") {
        let transform = match transforms {
            [single] => AttachmentTransform::from_uri(single)?,
            _ => {
                return Err(SecurityError::malformed_reference(format!(
                    "attachment reference '{uri}' must carry exactly one transform"
                )))
            }
        };
        let encrypted = is_attachment_encrypted(message, uri);
        let attachment = message.attachment_mut(uri).ok_or_else(|| {
            SecurityError::malformed_reference(format!("no attachment for '{uri}'"))
        })?;
        let octets = transform.apply(attachment, encrypted)?;
        return Ok(digest.digest(&octets));
    }

    Err(SecurityError::malformed_reference(format!(
        "unsupported reference URI '{uri}'"
    )))
}

/// Build the reference a signer emits for `uri`
pub fn create_reference(
    message: &mut As4Message,
    envelope: &XmlElement,
    uri: String,
    digest: DigestAlgorithm,
) -> Result<SignatureReference, SecurityError> {
    let transforms = if uri.starts_with('#') {
        vec![EXC_C14N.to_string()]
    } else {
        let encrypted = is_attachment_encrypted(message, &uri);
        vec![AttachmentTransform::for_state(encrypted).uri().to_string()]
    };
    let value = reference_digest(message, envelope, &uri, &transforms, digest)?;
    Ok(SignatureReference {
        uri,
        transforms,
        digest_method: digest.uri().to_string(),
        digest_value: STANDARD.encode(value),
    })
}

/// Recompute a received reference and compare it with its declared digest
pub fn check_reference(
    message: &mut As4Message,
    envelope: &XmlElement,
    reference: &SignatureReference,
) -> Result<(), SecurityError> {
    let digest = DigestAlgorithm::reference_digest_from_uri(&reference.digest_method)?;
    let expected = STANDARD.decode(&reference.digest_value).map_err(|e| {
        SecurityError::malformed_reference(format!("digest of '{}': {e}", reference.uri))
    })?;
    let actual = reference_digest(message, envelope, &reference.uri, &reference.transforms, digest)?;
    if actual != expected {
        return Err(SecurityError::DigestMismatch {
            uri: reference.uri.clone(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Attachment, XmlElement};

    #[test]
    fn test_reference_round_trip_for_body_and_attachment() {
        let mut message = As4Message::new();
        message.body.push(XmlElement::with_text("Order", "42"));
        message.attachments.push(Attachment::new("p1", "text/plain", "hello"));
        let envelope = message.envelope_element();

        let body_uri = format!("#{}", message.body_id);
        let body = create_reference(&mut message, &envelope, body_uri, DigestAlgorithm::Sha256).unwrap();
        let part = create_reference(&mut message, &envelope, "cid:p1".to_string(), DigestAlgorithm::Sha256).unwrap();

        assert!(check_reference(&mut message, &envelope, &body).is_ok());
        assert!(check_reference(&mut message, &envelope, &part).is_ok());

        message.body.push(XmlElement::with_text("Extra", "x"));
        let tampered = message.envelope_element();
        assert!(matches!(
            check_reference(&mut message, &tampered, &body),
            Err(SecurityError::DigestMismatch { .. })
        ));
    }

    #[test]
    fn test_same_document_references_use_the_given_envelope() {
        let mut message = As4Message::new();
        let body_uri = format!("#{}", message.body_id);
        let transforms = vec![EXC_C14N.to_string()];

        let unrelated = XmlElement::new("soap:Envelope");
        assert!(matches!(
            reference_digest(&mut message, &unrelated, &body_uri, &transforms, DigestAlgorithm::Sha256),
            Err(SecurityError::MalformedReference(_))
        ));

        let envelope = message.envelope_element();
        assert!(reference_digest(&mut message, &envelope, &body_uri, &transforms, DigestAlgorithm::Sha256).is_ok());
    }

    #[test]
    fn test_unknown_reference_targets() {
        let mut message = As4Message::new();
        let envelope = message.envelope_element();
        let transforms = vec![EXC_C14N.to_string()];
        assert!(matches!(
            reference_digest(&mut message, &envelope, "#missing", &transforms, DigestAlgorithm::Sha256),
            Err(SecurityError::MalformedReference(_))
        ));
        assert!(matches!(
            reference_digest(&mut message, &envelope, "http://elsewhere", &transforms, DigestAlgorithm::Sha256),
            Err(SecurityError::MalformedReference(_))
        ));
    }
}
