//! Processing Mode (PMode) configuration and resolution
//!
//! A PMode is the negotiated agreement that governs how a message is secured,
//! delivered and acknowledged. Sending PModes are selected by id; receiving
//! PModes are selected by weighted rule scoring in [`resolver`].

pub mod resolver;
pub mod rules;
pub mod store;

pub use resolver::{resolve_receiving_pmode, score_candidates, PModeParticipant, ResolutionError};
pub use rules::PModeRule;
pub use store::{PModeSet, PModeStore};

use crate::protocol::Party;
use crate::security::{
    algorithms, CertificateFindCriteria, DataEncryptionAlgorithm, DigestAlgorithm,
    EncryptionOptions, KeyReferenceMethod, KeyTransport, SecurityError, SignatureAlgorithm,
    SigningOptions,
};
use serde::{Deserialize, Serialize};

/// Party expectations of a PMode; absent sides are unconstrained
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PModePartyInfo {
    #[serde(default)]
    pub from: Option<Party>,
    #[serde(default)]
    pub to: Option<Party>,
}

impl PModePartyInfo {
    pub fn is_empty(&self) -> bool {
        self.from.is_none() && self.to.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PModeAgreement {
    pub value: String,
    #[serde(rename = "type", default)]
    pub agreement_type: Option<String>,
    #[serde(default)]
    pub pmode_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PModeService {
    pub value: String,
    #[serde(rename = "type", default)]
    pub service_type: Option<String>,
}

/// Expectation on an optional security feature of an inbound message
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Limit {
    /// Must be present and valid
    Required,
    /// Validated when present
    #[default]
    Allowed,
    /// Must be absent
    NotAllowed,
    /// Never processed
    Ignored,
}

// ========== Receiving PMode ==========

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SigningVerification {
    #[serde(default)]
    pub signature: Limit,
    #[serde(default)]
    pub allow_unknown_root_authority: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Decryption {
    #[serde(default)]
    pub encryption: Limit,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReceiveSecurity {
    #[serde(default)]
    pub signing_verification: SigningVerification,
    #[serde(default)]
    pub decryption: Decryption,
}

/// Governs processing of an inbound UserMessage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReceivingPMode {
    pub id: String,
    /// `None` means the PMode accepts any parties
    #[serde(default)]
    pub party_info: Option<PModePartyInfo>,
    #[serde(default)]
    pub agreement: Option<PModeAgreement>,
    #[serde(default)]
    pub service: Option<PModeService>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub security: ReceiveSecurity,
}

impl ReceivingPMode {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            party_info: None,
            agreement: None,
            service: None,
            action: None,
            security: ReceiveSecurity::default(),
        }
    }

    /// True when no party constraint is configured
    pub fn has_undefined_party_info(&self) -> bool {
        self.party_info.as_ref().map_or(true, PModePartyInfo::is_empty)
    }
}

// ========== Sending PMode ==========

fn default_signature_algorithm() -> String {
    algorithms::RSA_SHA256.to_string()
}

fn default_hash_function() -> String {
    algorithms::DIGEST_SHA256.to_string()
}

fn default_data_algorithm() -> String {
    algorithms::AES128_GCM.to_string()
}

fn default_key_transport_algorithm() -> String {
    algorithms::RSA_OAEP.to_string()
}

fn default_key_transport_digest() -> String {
    algorithms::DIGEST_SHA256.to_string()
}

fn default_mgf() -> Option<String> {
    Some(algorithms::MGF1_SHA256.to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Signing {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub certificate: Option<CertificateFindCriteria>,
    #[serde(default = "default_signature_algorithm")]
    pub algorithm: String,
    #[serde(default = "default_hash_function")]
    pub hash_function: String,
    #[serde(default)]
    pub key_reference_method: KeyReferenceMethod,
}

impl Default for Signing {
    fn default() -> Self {
        Self {
            enabled: false,
            certificate: None,
            algorithm: default_signature_algorithm(),
            hash_function: default_hash_function(),
            key_reference_method: KeyReferenceMethod::default(),
        }
    }
}

impl Signing {
    pub fn options(&self) -> Result<SigningOptions, SecurityError> {
        Ok(SigningOptions {
            signature_algorithm: SignatureAlgorithm::from_uri(&self.algorithm)?,
            digest_algorithm: DigestAlgorithm::reference_digest_from_uri(&self.hash_function)?,
            key_reference_method: self.key_reference_method,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyTransportConfig {
    #[serde(default = "default_key_transport_algorithm")]
    pub algorithm: String,
    #[serde(default = "default_key_transport_digest")]
    pub digest_algorithm: String,
    #[serde(default = "default_mgf")]
    pub mgf_algorithm: Option<String>,
}

impl Default for KeyTransportConfig {
    fn default() -> Self {
        Self {
            algorithm: default_key_transport_algorithm(),
            digest_algorithm: default_key_transport_digest(),
            mgf_algorithm: default_mgf(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Encryption {
    #[serde(default)]
    pub enabled: bool,
    /// Recipient certificate
    #[serde(default)]
    pub certificate: Option<CertificateFindCriteria>,
    #[serde(default = "default_data_algorithm")]
    pub algorithm: String,
    #[serde(default)]
    pub key_transport: KeyTransportConfig,
    #[serde(default)]
    pub key_reference_method: KeyReferenceMethod,
}

impl Default for Encryption {
    fn default() -> Self {
        Self {
            enabled: false,
            certificate: None,
            algorithm: default_data_algorithm(),
            key_transport: KeyTransportConfig::default(),
            key_reference_method: KeyReferenceMethod::default(),
        }
    }
}

impl Encryption {
    pub fn options(&self) -> Result<EncryptionOptions, SecurityError> {
        let transport = &self.key_transport;
        // mgf1p fixes MGF1 to SHA-1, so a configured MGF only applies to xmlenc11
        let mgf = match transport.algorithm.as_str() {
            algorithms::RSA_OAEP_MGF1P => None,
            _ => transport.mgf_algorithm.as_deref(),
        };
        Ok(EncryptionOptions {
            data_algorithm: DataEncryptionAlgorithm::from_uri(&self.algorithm)?,
            key_transport: KeyTransport::from_uris(
                &transport.algorithm,
                Some(transport.digest_algorithm.as_str()),
                mgf,
            )?,
            key_reference_method: self.key_reference_method,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendSecurity {
    #[serde(default)]
    pub signing: Signing,
    #[serde(default)]
    pub encryption: Encryption,
}

fn default_retry_count() -> u32 {
    5
}

fn default_retry_interval() -> String {
    "00:01:00".to_string()
}

/// Reception awareness settings; the interval stays raw text until poll time
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReceptionAwareness {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_retry_interval")]
    pub retry_interval: String,
}

impl Default for ReceptionAwareness {
    fn default() -> Self {
        Self {
            enabled: false,
            retry_count: default_retry_count(),
            retry_interval: default_retry_interval(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reliability {
    #[serde(default)]
    pub reception_awareness: ReceptionAwareness,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PushConfiguration {
    pub url: String,
}

/// Governs how an outbound UserMessage is secured and delivered
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendingPMode {
    pub id: String,
    #[serde(default)]
    pub push_configuration: Option<PushConfiguration>,
    #[serde(default)]
    pub security: SendSecurity,
    #[serde(default)]
    pub reliability: Reliability,
}

impl SendingPMode {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            push_configuration: None,
            security: SendSecurity::default(),
            reliability: Reliability::default(),
        }
    }

    pub fn reception_awareness_enabled(&self) -> bool {
        self.reliability.reception_awareness.enabled
    }
}
