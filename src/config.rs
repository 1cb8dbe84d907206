//! Configuration for the message service handler
//!
//! One TOML file carries the MSH identity, the pipelines, both PMode sets
//! and the certificate material. Everything is validated at load time so a
//! bad file fails before any message is processed.

use crate::observability::LoggingSettings;
use crate::pipeline::PipelineConfig;
use crate::pmode::{PModeSet, ReceivingPMode, SendingPMode};
use crate::reliability::parse_retry_interval;
use crate::security::{Certificate, InMemoryCertificateRepository, SigningCredential, TrustStore};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Main MSH configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MshConfig {
    pub msh: MshSection,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub reception_awareness: ReceptionAwarenessSection,
    #[serde(default)]
    pub certificates: CertificatesSection,
    #[serde(default)]
    pub pipelines: BTreeMap<String, PipelineConfig>,
    #[serde(default)]
    pub receiving_pmodes: Vec<ReceivingPMode>,
    #[serde(default)]
    pub sending_pmodes: Vec<SendingPMode>,
    /// Directory relative certificate paths resolve against
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MshSection {
    /// MSH identifier (must match [a-zA-Z0-9._-]+)
    pub id: String,
    /// Timeout for outbound HTTP pushes in seconds (default: 60)
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
    /// Sending PMode used when an outbound UserMessage names none
    pub default_sending_pmode: Option<String>,
}

fn default_http_timeout() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReceptionAwarenessSection {
    /// Scanner tick in seconds (default: 5)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_poll_interval() -> u64 {
    5
}

impl Default for ReceptionAwarenessSection {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
        }
    }
}

impl ReceptionAwarenessSection {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// DER files making up the trust store and the local key material
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CertificatesSection {
    #[serde(default)]
    pub trusted_roots: Vec<PathBuf>,
    #[serde(default)]
    pub intermediates: Vec<PathBuf>,
    #[serde(default)]
    pub credentials: Vec<CredentialConfig>,
    /// Partner certificates used for encryption and signature lookup
    #[serde(default)]
    pub partners: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CredentialConfig {
    pub certificate: PathBuf,
    /// PKCS#8 DER private key
    pub private_key: PathBuf,
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid MSH ID format: {0}")]
    InvalidMshId(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Unknown step type: {0}")]
    UnknownStep(String),
    #[error("Unknown condition: {0}")]
    UnknownPredicate(String),
    #[error("Step '{0}' does not accept settings")]
    UnexpectedSettings(String),
    #[error("Invalid settings for step '{step}': {reason}")]
    InvalidSetting { step: String, reason: String },
    #[error("Invalid retry interval in PMode '{pmode_id}': {reason}")]
    InvalidRetryInterval { pmode_id: String, reason: String },
    #[error("{referenced_by} references unknown PMode '{pmode_id}'")]
    MissingPMode {
        referenced_by: String,
        pmode_id: String,
    },
    #[error("No pipeline named '{0}'")]
    MissingPipeline(String),
    #[error("Failed to load certificate {path}: {reason}")]
    Certificate { path: PathBuf, reason: String },
}

impl MshConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: MshConfig = toml::from_str(&content)?;
        config.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        config.validate()?;
        Ok(config)
    }

    /// Check everything that can be checked without touching the network
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_msh_id(&self.msh.id)?;
        self.logging
            .validate()
            .map_err(|reason| ConfigError::InvalidConfig(format!("logging: {reason}")))?;

        if self.reception_awareness.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "reception_awareness.poll_interval_secs must be greater than zero".to_string(),
            ));
        }

        check_unique("receiving PMode", self.receiving_pmodes.iter().map(|p| p.id.as_str()))?;
        check_unique("sending PMode", self.sending_pmodes.iter().map(|p| p.id.as_str()))?;

        for pmode in &self.sending_pmodes {
            let awareness = &pmode.reliability.reception_awareness;
            if awareness.enabled {
                parse_retry_interval(&awareness.retry_interval).map_err(|reason| {
                    ConfigError::InvalidRetryInterval {
                        pmode_id: pmode.id.clone(),
                        reason,
                    }
                })?;
            }
            if let Some(push) = &pmode.push_configuration {
                url::Url::parse(&push.url).map_err(|e| {
                    ConfigError::InvalidConfig(format!(
                        "Sending PMode '{}' has an invalid push URL '{}': {e}",
                        pmode.id, push.url
                    ))
                })?;
            }
        }

        if let Some(default) = &self.msh.default_sending_pmode {
            if !self.sending_pmodes.iter().any(|p| &p.id == default) {
                return Err(ConfigError::MissingPMode {
                    referenced_by: "msh.default_sending_pmode".to_string(),
                    pmode_id: default.clone(),
                });
            }
        }

        Ok(())
    }

    pub fn pmode_set(&self) -> PModeSet {
        PModeSet::new(self.receiving_pmodes.clone(), self.sending_pmodes.clone())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.msh.http_timeout_secs)
    }

    /// Read every configured DER file into a certificate repository
    pub fn certificate_repository(&self) -> Result<InMemoryCertificateRepository, ConfigError> {
        let section = &self.certificates;
        let roots = section
            .trusted_roots
            .iter()
            .map(|path| self.read_file(path))
            .collect::<Result<Vec<_>, _>>()?;
        let intermediates = section
            .intermediates
            .iter()
            .map(|path| self.read_file(path))
            .collect::<Result<Vec<_>, _>>()?;

        let mut repository = InMemoryCertificateRepository::new(TrustStore::new(roots, intermediates));
        for credential in &section.credentials {
            let certificate = self.read_file(&credential.certificate)?;
            let key = self.read_file(&credential.private_key)?;
            let loaded = SigningCredential::from_der(&certificate, &key).map_err(|e| {
                ConfigError::Certificate {
                    path: credential.certificate.clone(),
                    reason: e.to_string(),
                }
            })?;
            repository = repository.with_credential(loaded);
        }
        for path in &section.partners {
            let der = self.read_file(path)?;
            let certificate = Certificate::from_der(der).map_err(|e| ConfigError::Certificate {
                path: path.clone(),
                reason: e.to_string(),
            })?;
            repository = repository.with_certificate(certificate);
        }
        Ok(repository)
    }

    fn read_file(&self, path: &Path) -> Result<Vec<u8>, ConfigError> {
        let resolved = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        };
        std::fs::read(&resolved).map_err(|e| ConfigError::Certificate {
            path: resolved,
            reason: e.to_string(),
        })
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[msh]
id = "test-msh"
default_sending_pmode = "send-1"

[pipelines.send]
steps = [
    { type = "send.determine_pmode" },
    { type = "send.sign" },
    { type = "send.transmit" },
]

[[receiving_pmodes]]
id = "recv-1"
action = "submit"

[[sending_pmodes]]
id = "send-1"

[sending_pmodes.push_configuration]
url = "http://localhost:8080/as4"
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

/// Validate MSH ID format
fn validate_msh_id(msh_id: &str) -> Result<(), ConfigError> {
    let valid_chars = msh_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');

    if msh_id.is_empty() || !valid_chars {
        return Err(ConfigError::InvalidMshId(format!(
            "MSH ID '{msh_id}' must match pattern [a-zA-Z0-9._-]+"
        )));
    }

    Ok(())
}

fn check_unique<'a>(kind: &str, ids: impl Iterator<Item = &'a str>) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(ConfigError::InvalidConfig(format!("Duplicate {kind} id '{id}'")));
        }
    }
    Ok(())
}
