//! Attachment encryption and decryption

use super::algorithms::{DataEncryptionAlgorithm, DigestAlgorithm, KeyTransport, KeyTransportMethod};
use super::certificates::{
    reference_certificate, resolve_token_reference, Certificate, CertificateFindCriteria,
    CertificateRepository, KeyReferenceMethod,
};
use super::SecurityError;
use crate::protocol::{As4Message, EncryptedData, EncryptedKey};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::collections::HashSet;
use tracing::debug;
use uuid::Uuid;

const ENCRYPTED_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncryptionOptions {
    pub data_algorithm: DataEncryptionAlgorithm,
    pub key_transport: KeyTransport,
    pub key_reference_method: KeyReferenceMethod,
}

impl Default for EncryptionOptions {
    fn default() -> Self {
        Self {
            data_algorithm: DataEncryptionAlgorithm::Aes128Gcm,
            key_transport: KeyTransport {
                method: KeyTransportMethod::RsaOaep,
                digest: DigestAlgorithm::Sha256,
                mgf: DigestAlgorithm::Sha256,
            },
            key_reference_method: KeyReferenceMethod::BinarySecurityToken,
        }
    }
}

/// Encrypt every attachment for `recipient` under one fresh content key
///
/// Returns the number of attachments encrypted. A message without attachments
/// is left untouched.
pub fn encrypt_message(
    message: &mut As4Message,
    recipient: &Certificate,
    options: &EncryptionOptions,
) -> Result<usize, SecurityError> {
    if message.is_encrypted() {
        return Err(SecurityError::AlreadyEncrypted);
    }
    if message.attachments.is_empty() {
        return Ok(0);
    }

    let content_key = options.data_algorithm.generate_key();
    let mut ciphertexts = Vec::with_capacity(message.attachments.len());
    for attachment in &mut message.attachments {
        let plaintext = attachment.read_from_start()?;
        attachment.rewind();
        ciphertexts.push(options.data_algorithm.encrypt(&content_key, &plaintext)?);
    }
    let wrapped = options
        .key_transport
        .wrap(recipient.public_key(), &content_key)?;

    let mut data_references = Vec::with_capacity(ciphertexts.len());
    for (attachment, ciphertext) in message.attachments.iter_mut().zip(ciphertexts) {
        let id = format!("ed-{}", Uuid::new_v4());
        message.security_header.encrypted_data.push(EncryptedData {
            id: id.clone(),
            encryption_method: options.data_algorithm.uri().to_string(),
            cipher_reference: attachment.cid_uri(),
            mime_type: std::mem::replace(
                &mut attachment.content_type,
                ENCRYPTED_CONTENT_TYPE.to_string(),
            ),
        });
        attachment.replace_content(ciphertext);
        data_references.push(id);
    }

    let key_info = reference_certificate(
        &mut message.security_header,
        recipient,
        options.key_reference_method,
    )?;
    let count = data_references.len();
    message.security_header.encrypted_keys.push(EncryptedKey {
        id: format!("ek-{}", Uuid::new_v4()),
        encryption_method: options.key_transport.method_uri().to_string(),
        digest_method: Some(options.key_transport.digest.uri().to_string()),
        mgf: options.key_transport.mgf_uri().map(str::to_string),
        cipher_value: STANDARD.encode(wrapped),
        key_info,
        data_references,
    });

    debug!(
        message_id = message.primary_message_id().unwrap_or_default(),
        recipient = %recipient.subject(),
        attachments = count,
        algorithm = options.data_algorithm.uri(),
        "Attachments encrypted"
    );
    Ok(count)
}

/// Decrypt every encrypted attachment with the matching own credential
///
/// The original content types are restored and the encryption entries are
/// removed from the security header. Nothing is modified unless every
/// attachment decrypts.
pub fn decrypt_message(
    message: &mut As4Message,
    repository: &dyn CertificateRepository,
) -> Result<usize, SecurityError> {
    if !message.is_encrypted() {
        return Ok(0);
    }

    let mut decrypted = Vec::new();
    let mut covered = HashSet::new();
    for key in message.security_header.encrypted_keys.clone() {
        let certificate = resolve_token_reference(message, &key.key_info, repository)?;
        let credential =
            repository.find_credential(&CertificateFindCriteria::thumbprint(certificate.thumbprint()))?;
        let transport = KeyTransport::from_uris(
            &key.encryption_method,
            key.digest_method.as_deref(),
            key.mgf.as_deref(),
        )?;
        let wrapped = STANDARD
            .decode(&key.cipher_value)
            .map_err(|e| SecurityError::DecryptionFailed(format!("encrypted key: {e}")))?;
        let content_key = transport.unwrap(credential.private_key(), &wrapped)?;

        for id in &key.data_references {
            let data = message
                .security_header
                .encrypted_data
                .iter()
                .find(|data| &data.id == id)
                .cloned()
                .ok_or_else(|| {
                    SecurityError::malformed_reference(format!("no encrypted data '{id}'"))
                })?;
            let algorithm = DataEncryptionAlgorithm::from_uri(&data.encryption_method)?;
            if content_key.len() != algorithm.key_len() {
                return Err(SecurityError::DecryptionFailed(format!(
                    "content key length {} does not fit {}",
                    content_key.len(),
                    data.encryption_method
                )));
            }
            let attachment = message.attachment_mut(&data.cipher_reference).ok_or_else(|| {
                SecurityError::malformed_reference(format!(
                    "no attachment for '{}'",
                    data.cipher_reference
                ))
            })?;
            let ciphertext = attachment.read_from_start()?;
            attachment.rewind();
            let plaintext = algorithm.decrypt(&content_key, &ciphertext)?;
            covered.insert(data.id.clone());
            decrypted.push((data.cipher_reference, data.mime_type, plaintext));
        }
    }

    if let Some(orphan) = message
        .security_header
        .encrypted_data
        .iter()
        .find(|data| !covered.contains(&data.id))
    {
        return Err(SecurityError::malformed_reference(format!(
            "encrypted data '{}' is not referenced by any encrypted key",
            orphan.id
        )));
    }

    let count = decrypted.len();
    for (uri, mime_type, plaintext) in decrypted {
        if let Some(attachment) = message.attachment_mut(&uri) {
            attachment.replace_content(plaintext);
            attachment.content_type = mime_type;
        }
    }
    message.security_header.encrypted_keys.clear();
    message.security_header.encrypted_data.clear();

    debug!(
        message_id = message.primary_message_id().unwrap_or_default(),
        attachments = count,
        "Attachments decrypted"
    );
    Ok(count)
}
