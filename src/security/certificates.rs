//! X.509 certificates, signing credentials, trust anchors and lookup

use super::SecurityError;
use crate::protocol::{As4Message, BinarySecurityToken, SecurityHeader, SecurityTokenReference};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use rustls_pki_types::{CertificateDer, UnixTime};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::fmt;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;
use webpki::{anchor_from_trusted_cert, EndEntityCert, KeyUsage, ALL_VERIFICATION_ALGS};
use x509_parser::extensions::ParsedExtension;
use x509_parser::prelude::parse_x509_certificate;

/// Parsed X.509 certificate with the lookup keys the security header uses
#[derive(Clone)]
pub struct Certificate {
    der: Arc<Vec<u8>>,
    subject: String,
    issuer: String,
    serial: String,
    subject_key_identifier: Option<Vec<u8>>,
    thumbprint: String,
    public_key: RsaPublicKey,
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("subject", &self.subject)
            .field("issuer", &self.issuer)
            .field("serial", &self.serial)
            .field("thumbprint", &self.thumbprint)
            .finish()
    }
}

impl PartialEq for Certificate {
    fn eq(&self, other: &Self) -> bool {
        self.der == other.der
    }
}

impl Certificate {
    pub fn from_der(der: impl Into<Vec<u8>>) -> Result<Self, SecurityError> {
        let der = der.into();
        let (_, parsed) = parse_x509_certificate(&der)
            .map_err(|e| SecurityError::InvalidKeyMaterial(format!("certificate: {e}")))?;

        let subject_key_identifier = parsed.extensions().iter().find_map(|extension| {
            match extension.parsed_extension() {
                ParsedExtension::SubjectKeyIdentifier(key_id) => Some(key_id.0.to_vec()),
                _ => None,
            }
        });

        let public_key = RsaPublicKey::from_public_key_der(parsed.public_key().raw)
            .map_err(|e| SecurityError::InvalidKeyMaterial(format!("RSA public key: {e}")))?;

        let subject = parsed.subject().to_string();
        let issuer = parsed.issuer().to_string();
        let serial = hex::encode(parsed.raw_serial());
        let thumbprint = hex::encode(Sha1::digest(&der));

        Ok(Self {
            der: Arc::new(der),
            subject,
            issuer,
            serial,
            subject_key_identifier,
            thumbprint,
            public_key,
        })
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Lowercase hex serial number
    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn subject_key_identifier(&self) -> Option<&[u8]> {
        self.subject_key_identifier.as_deref()
    }

    /// Lowercase hex SHA-1 over the DER encoding
    pub fn thumbprint(&self) -> &str {
        &self.thumbprint
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    pub fn matches(&self, criteria: &CertificateFindCriteria) -> bool {
        match criteria.find_type {
            FindType::Thumbprint => normalize_hex(&criteria.find_value) == self.thumbprint,
            FindType::SubjectName => self.subject.contains(criteria.find_value.as_str()),
        }
    }

    pub fn matches_issuer_serial(&self, issuer: &str, serial: &str) -> bool {
        self.issuer == issuer && normalize_hex(serial) == self.serial
    }
}

fn normalize_hex(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_hexdigit())
        .collect::<String>()
        .to_ascii_lowercase()
}

/// Certificate plus the matching private key
#[derive(Clone)]
pub struct SigningCredential {
    pub certificate: Certificate,
    private_key: Arc<RsaPrivateKey>,
}

impl fmt::Debug for SigningCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningCredential")
            .field("certificate", &self.certificate)
            .finish_non_exhaustive()
    }
}

impl SigningCredential {
    /// Pair a certificate with a PKCS#8 DER private key; the key must match the certificate
    pub fn from_der(certificate_der: &[u8], pkcs8_key_der: &[u8]) -> Result<Self, SecurityError> {
        let certificate = Certificate::from_der(certificate_der.to_vec())?;
        let private_key = RsaPrivateKey::from_pkcs8_der(pkcs8_key_der)
            .map_err(|e| SecurityError::InvalidKeyMaterial(format!("private key: {e}")))?;

        if RsaPublicKey::from(&private_key) != *certificate.public_key() {
            return Err(SecurityError::InvalidKeyMaterial(format!(
                "private key does not belong to certificate '{}'",
                certificate.subject()
            )));
        }

        Ok(Self {
            certificate,
            private_key: Arc::new(private_key),
        })
    }

    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.private_key
    }
}

/// How a PMode designates a certificate
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FindType {
    Thumbprint,
    SubjectName,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CertificateFindCriteria {
    pub find_type: FindType,
    pub find_value: String,
}

impl CertificateFindCriteria {
    pub fn thumbprint(value: impl Into<String>) -> Self {
        Self {
            find_type: FindType::Thumbprint,
            find_value: value.into(),
        }
    }

    pub fn subject_name(value: impl Into<String>) -> Self {
        Self {
            find_type: FindType::SubjectName,
            find_value: value.into(),
        }
    }
}

impl fmt::Display for CertificateFindCriteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}={}", self.find_type, self.find_value)
    }
}

// DER content of the id-kp OIDs accepted for message signing
const EKU_CLIENT_AUTH: &[u8] = &[0x2b, 0x06, 0x01, 0x05, 0x05, 0x07, 0x03, 0x02];
const EKU_EMAIL_PROTECTION: &[u8] = &[0x2b, 0x06, 0x01, 0x05, 0x05, 0x07, 0x03, 0x04];
const EKU_DOCUMENT_SIGNING: &[u8] = &[0x2b, 0x06, 0x01, 0x05, 0x05, 0x07, 0x03, 0x24];

/// A certificate without an extended key usage extension passes the first
/// policy; one that has the extension must list at least one of these.
const MESSAGE_SIGNING_USAGES: [&[u8]; 3] = [EKU_CLIENT_AUTH, EKU_EMAIL_PROTECTION, EKU_DOCUMENT_SIGNING];

/// Trust anchors and intermediates used for chain validation
#[derive(Debug, Clone, Default)]
pub struct TrustStore {
    roots: Vec<Vec<u8>>,
    intermediates: Vec<Vec<u8>>,
}

impl TrustStore {
    pub fn new(roots: Vec<Vec<u8>>, intermediates: Vec<Vec<u8>>) -> Self {
        Self {
            roots,
            intermediates,
        }
    }

    /// Validate the chain of `certificate` up to a configured root
    ///
    /// With `allow_unknown_root_authority` a chain that ends at an unknown
    /// issuer is accepted; every other failure (expiry, bad chain signature,
    /// wrong key usage) still rejects. An extended key usage extension must
    /// allow client authentication, e-mail protection or document signing.
    pub fn validate(
        &self,
        certificate: &Certificate,
        allow_unknown_root_authority: bool,
    ) -> Result<(), SecurityError> {
        let end_entity_der = CertificateDer::from(certificate.der());
        let end_entity = EndEntityCert::try_from(&end_entity_der)
            .map_err(|e| SecurityError::UntrustedCertificate(format!("{e:?}")))?;

        let root_ders: Vec<CertificateDer<'_>> = self
            .roots
            .iter()
            .map(|der| CertificateDer::from(der.as_slice()))
            .collect();
        let anchors = root_ders
            .iter()
            .map(anchor_from_trusted_cert)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| SecurityError::InvalidKeyMaterial(format!("trust anchor: {e:?}")))?;
        let intermediates: Vec<CertificateDer<'_>> = self
            .intermediates
            .iter()
            .map(|der| CertificateDer::from(der.as_slice()))
            .collect();

        let mut outcome = Err(webpki::Error::RequiredEkuNotFound);
        for usage in MESSAGE_SIGNING_USAGES {
            outcome = end_entity
                .verify_for_usage(
                    ALL_VERIFICATION_ALGS,
                    &anchors,
                    &intermediates,
                    UnixTime::now(),
                    KeyUsage::required_if_present(usage),
                    None,
                    None,
                )
                .map(|_| ());
            if !matches!(outcome, Err(webpki::Error::RequiredEkuNotFound)) {
                break;
            }
        }

        match outcome {
            Ok(()) => Ok(()),
            Err(webpki::Error::UnknownIssuer) if allow_unknown_root_authority => {
                warn!(
                    subject = %certificate.subject(),
                    issuer = %certificate.issuer(),
                    "Accepting certificate with unknown root authority"
                );
                Ok(())
            }
            Err(e) => Err(SecurityError::UntrustedCertificate(format!(
                "{}: {e:?}",
                certificate.subject()
            ))),
        }
    }
}

/// Lookup of own credentials and partner certificates
pub trait CertificateRepository: Send + Sync {
    /// Partner or own certificate matching the criteria
    fn find_certificate(
        &self,
        criteria: &CertificateFindCriteria,
    ) -> Result<Certificate, SecurityError>;

    /// Own credential (certificate with private key) matching the criteria
    fn find_credential(
        &self,
        criteria: &CertificateFindCriteria,
    ) -> Result<SigningCredential, SecurityError>;

    fn find_by_subject_key_identifier(&self, ski: &[u8]) -> Option<Certificate>;

    fn find_by_issuer_serial(&self, issuer: &str, serial: &str) -> Option<Certificate>;

    fn trust_store(&self) -> &TrustStore;
}

/// Repository backed by certificates loaded at startup
#[derive(Debug, Clone, Default)]
pub struct InMemoryCertificateRepository {
    credentials: Vec<SigningCredential>,
    certificates: Vec<Certificate>,
    trust_store: TrustStore,
}

impl InMemoryCertificateRepository {
    pub fn new(trust_store: TrustStore) -> Self {
        Self {
            trust_store,
            ..Default::default()
        }
    }

    pub fn with_credential(mut self, credential: SigningCredential) -> Self {
        self.credentials.push(credential);
        self
    }

    pub fn with_certificate(mut self, certificate: Certificate) -> Self {
        self.certificates.push(certificate);
        self
    }

    fn all_certificates(&self) -> impl Iterator<Item = &Certificate> {
        self.credentials
            .iter()
            .map(|credential| &credential.certificate)
            .chain(self.certificates.iter())
    }
}

impl CertificateRepository for InMemoryCertificateRepository {
    fn find_certificate(
        &self,
        criteria: &CertificateFindCriteria,
    ) -> Result<Certificate, SecurityError> {
        self.all_certificates()
            .find(|certificate| certificate.matches(criteria))
            .cloned()
            .ok_or_else(|| SecurityError::CertificateNotFound(criteria.to_string()))
    }

    fn find_credential(
        &self,
        criteria: &CertificateFindCriteria,
    ) -> Result<SigningCredential, SecurityError> {
        self.credentials
            .iter()
            .find(|credential| credential.certificate.matches(criteria))
            .cloned()
            .ok_or_else(|| SecurityError::CertificateNotFound(criteria.to_string()))
    }

    fn find_by_subject_key_identifier(&self, ski: &[u8]) -> Option<Certificate> {
        self.all_certificates()
            .find(|certificate| certificate.subject_key_identifier() == Some(ski))
            .cloned()
    }

    fn find_by_issuer_serial(&self, issuer: &str, serial: &str) -> Option<Certificate> {
        self.all_certificates()
            .find(|certificate| certificate.matches_issuer_serial(issuer, serial))
            .cloned()
    }

    fn trust_store(&self) -> &TrustStore {
        &self.trust_store
    }
}

// ========== Key references ==========

/// How the security header refers to a certificate
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum KeyReferenceMethod {
    #[default]
    BinarySecurityToken,
    IssuerSerial,
    KeyIdentifier,
}

/// Reference `certificate` from the header, embedding it as a token when required
pub fn reference_certificate(
    header: &mut SecurityHeader,
    certificate: &Certificate,
    method: KeyReferenceMethod,
) -> Result<SecurityTokenReference, SecurityError> {
    match method {
        KeyReferenceMethod::BinarySecurityToken => {
            let id = match header
                .tokens
                .iter()
                .find(|token| token.certificate == certificate.der())
            {
                Some(token) => token.id.clone(),
                None => {
                    let id = format!("cert-{}", Uuid::new_v4());
                    header.tokens.push(BinarySecurityToken {
                        id: id.clone(),
                        certificate: certificate.der().to_vec(),
                    });
                    id
                }
            };
            Ok(SecurityTokenReference::Direct {
                uri: format!("#{id}"),
            })
        }
        KeyReferenceMethod::IssuerSerial => Ok(SecurityTokenReference::IssuerSerial {
            issuer: certificate.issuer().to_string(),
            serial: certificate.serial().to_string(),
        }),
        KeyReferenceMethod::KeyIdentifier => {
            let ski = certificate.subject_key_identifier().ok_or_else(|| {
                SecurityError::InvalidKeyMaterial(format!(
                    "certificate '{}' has no subject key identifier",
                    certificate.subject()
                ))
            })?;
            Ok(SecurityTokenReference::KeyIdentifier {
                subject_key_identifier: STANDARD.encode(ski),
            })
        }
    }
}

/// Find the certificate a received key reference designates
pub fn resolve_token_reference(
    message: &As4Message,
    reference: &SecurityTokenReference,
    repository: &dyn CertificateRepository,
) -> Result<Certificate, SecurityError> {
    match reference {
        SecurityTokenReference::Direct { uri } => {
            let id = uri.strip_prefix('#').ok_or_else(|| {
                SecurityError::malformed_reference(format!("token reference '{uri}' is not local"))
            })?;
            // rejects ids carried by more than one element
            message.resolve_unique_id(id)?;
            let token = message.security_header.token(id).ok_or_else(|| {
                SecurityError::malformed_reference(format!(
                    "'{uri}' does not designate a binary security token"
                ))
            })?;
            Certificate::from_der(token.certificate.clone())
        }
        SecurityTokenReference::KeyIdentifier {
            subject_key_identifier,
        } => {
            let ski = STANDARD.decode(subject_key_identifier).map_err(|e| {
                SecurityError::malformed_reference(format!("key identifier: {e}"))
            })?;
            repository
                .find_by_subject_key_identifier(&ski)
                .ok_or_else(|| {
                    SecurityError::CertificateNotFound(format!(
                        "subject key identifier {subject_key_identifier}"
                    ))
                })
        }
        SecurityTokenReference::IssuerSerial { issuer, serial } => repository
            .find_by_issuer_serial(issuer, serial)
            .ok_or_else(|| {
                SecurityError::CertificateNotFound(format!("issuer '{issuer}' serial {serial}"))
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOT: &[u8] = include_bytes!("../../tests/fixtures/certs/root.der");
    const SENDER: &[u8] = include_bytes!("../../tests/fixtures/certs/sender.der");
    const SENDER_KEY: &[u8] = include_bytes!("../../tests/fixtures/certs/sender.key.der");
    const RECEIVER_KEY: &[u8] = include_bytes!("../../tests/fixtures/certs/receiver.key.der");
    const ROGUE: &[u8] = include_bytes!("../../tests/fixtures/certs/rogue.der");
    const SIGNING_ROOT: &[u8] = include_bytes!("../../tests/fixtures/certs/signing-root.der");
    const EMAIL_SIGNER: &[u8] = include_bytes!("../../tests/fixtures/certs/email-signer.der");
    const SERVER_ONLY: &[u8] = include_bytes!("../../tests/fixtures/certs/server-only.der");

    #[test]
    fn test_parse_certificate_fields() {
        let certificate = Certificate::from_der(SENDER.to_vec()).unwrap();
        assert!(certificate.subject().contains("party-a.example"));
        assert!(certificate.issuer().contains("AS4 Test Root CA"));
        assert_eq!(certificate.thumbprint().len(), 40);
        assert!(certificate.subject_key_identifier().is_some());
        assert!(!certificate.serial().is_empty());
    }

    #[test]
    fn test_find_criteria_matching() {
        let certificate = Certificate::from_der(SENDER.to_vec()).unwrap();
        let upper = certificate.thumbprint().to_ascii_uppercase();
        assert!(certificate.matches(&CertificateFindCriteria::thumbprint(upper)));
        assert!(certificate.matches(&CertificateFindCriteria::subject_name("party-a")));
        assert!(!certificate.matches(&CertificateFindCriteria::subject_name("party-b")));
    }

    #[test]
    fn test_credential_rejects_mismatched_key() {
        assert!(SigningCredential::from_der(SENDER, SENDER_KEY).is_ok());
        assert!(matches!(
            SigningCredential::from_der(SENDER, RECEIVER_KEY),
            Err(SecurityError::InvalidKeyMaterial(_))
        ));
    }

    #[test]
    fn test_chain_validation() {
        let store = TrustStore::new(vec![ROOT.to_vec()], vec![]);
        let sender = Certificate::from_der(SENDER.to_vec()).unwrap();
        let rogue = Certificate::from_der(ROGUE.to_vec()).unwrap();

        assert!(store.validate(&sender, false).is_ok());
        assert!(matches!(
            store.validate(&rogue, false),
            Err(SecurityError::UntrustedCertificate(_))
        ));
        assert!(store.validate(&rogue, true).is_ok());
    }

    #[test]
    fn test_extended_key_usage_policy() {
        let store = TrustStore::new(vec![SIGNING_ROOT.to_vec()], vec![]);

        let email_signer = Certificate::from_der(EMAIL_SIGNER.to_vec()).unwrap();
        assert!(store.validate(&email_signer, false).is_ok());

        let server_only = Certificate::from_der(SERVER_ONLY.to_vec()).unwrap();
        match store.validate(&server_only, false) {
            Err(SecurityError::UntrustedCertificate(reason)) => {
                assert!(reason.contains("RequiredEkuNotFound"), "{reason}")
            }
            other => panic!("expected EKU rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_key_reference_methods_resolve_back() {
        let credential = SigningCredential::from_der(SENDER, SENDER_KEY).unwrap();
        let certificate = credential.certificate.clone();
        let repository = InMemoryCertificateRepository::default().with_credential(credential);

        for method in [
            KeyReferenceMethod::BinarySecurityToken,
            KeyReferenceMethod::IssuerSerial,
            KeyReferenceMethod::KeyIdentifier,
        ] {
            let mut message = As4Message::new();
            let reference =
                reference_certificate(&mut message.security_header, &certificate, method).unwrap();
            let resolved = resolve_token_reference(&message, &reference, &repository).unwrap();
            assert_eq!(resolved, certificate);
        }
    }

    #[test]
    fn test_binary_security_token_is_embedded_once() {
        let certificate = Certificate::from_der(SENDER.to_vec()).unwrap();
        let mut header = SecurityHeader::default();
        let first = reference_certificate(&mut header, &certificate, KeyReferenceMethod::BinarySecurityToken).unwrap();
        let second = reference_certificate(&mut header, &certificate, KeyReferenceMethod::BinarySecurityToken).unwrap();
        assert_eq!(first, second);
        assert_eq!(header.tokens.len(), 1);
    }

    #[test]
    fn test_repository_lookups() {
        let credential = SigningCredential::from_der(SENDER, SENDER_KEY).unwrap();
        let certificate = credential.certificate.clone();
        let repository = InMemoryCertificateRepository::default().with_credential(credential);

        let ski = certificate.subject_key_identifier().unwrap().to_vec();
        assert_eq!(repository.find_by_subject_key_identifier(&ski), Some(certificate.clone()));
        assert_eq!(
            repository.find_by_issuer_serial(certificate.issuer(), certificate.serial()),
            Some(certificate.clone())
        );
        assert!(repository
            .find_credential(&CertificateFindCriteria::subject_name("party-b"))
            .is_err());
    }
}
