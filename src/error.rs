//! Error taxonomy of the message service handler
//!
//! Component errors are aggregated into [`MshError`]. A per-message failure
//! is reported to the partner as an ebMS Error signal with a sanitized
//! description.

use crate::config::ConfigError;
use crate::pmode::ResolutionError;
use crate::protocol::{ErrorCode, ErrorDetail, ErrorSignal, MessageInfo, Severity};
use crate::reliability::StoreError;
use crate::security::SecurityError;
use crate::transport::TransportError;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Main error type for MSH operations
#[derive(Debug, Error)]
pub enum MshError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("PMode resolution failed: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("Security processing failed: {0}")]
    Security(#[from] SecurityError),

    #[error("No receipt for message {message_id} after {attempts} attempts")]
    ReliabilityExhausted { message_id: String, attempts: u32 },

    #[error("Step '{step}' failed: {message}")]
    StepExecution { step: String, message: String },

    #[error("Pipeline cancelled before step '{step}'")]
    Cancelled { step: String },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Reception awareness store error: {0}")]
    Store(#[from] StoreError),
}

impl MshError {
    /// Create step execution error
    pub fn step_execution<S: Into<String>, M: Into<String>>(step: S, message: M) -> Self {
        Self::StepExecution {
            step: step.into(),
            message: message.into(),
        }
    }

    /// Create cancellation error for the step that did not start
    pub fn cancelled<S: Into<String>>(step: S) -> Self {
        Self::Cancelled { step: step.into() }
    }

    /// Stable category name for logs and metrics
    pub fn category(&self) -> &'static str {
        match self {
            MshError::Configuration(_) => "configuration",
            MshError::Resolution(_) => "resolution",
            MshError::Security(_) => "security",
            MshError::ReliabilityExhausted { .. } => "reliability_exhausted",
            MshError::StepExecution { .. }
            | MshError::Cancelled { .. }
            | MshError::Transport(_)
            | MshError::Store(_) => "step_execution",
        }
    }

    /// ebMS error code reported for this failure
    pub fn error_code(&self) -> ErrorCode {
        match self {
            MshError::Resolution(_) => ErrorCode::ProcessingModeMismatch,
            MshError::Security(err) => match err {
                SecurityError::DecryptionFailed(_) => ErrorCode::FailedDecryption,
                SecurityError::PolicyViolation(_) | SecurityError::UnsupportedAlgorithm(_) => {
                    ErrorCode::PolicyNoncompliance
                }
                SecurityError::UntrustedCertificate(_)
                | SecurityError::CertificateNotFound(_)
                | SecurityError::MalformedReference(_)
                | SecurityError::MissingSignature
                | SecurityError::InvalidSignature
                | SecurityError::DigestMismatch { .. }
                | SecurityError::UncoveredAttachment { .. } => ErrorCode::FailedAuthentication,
                _ => ErrorCode::Other,
            },
            MshError::ReliabilityExhausted { .. } => ErrorCode::MissingReceipt,
            MshError::Transport(_) => ErrorCode::DeliveryFailure,
            _ => ErrorCode::Other,
        }
    }

    /// Convert to an ebMS Error signal referring to the message in error
    pub fn to_error_signal(&self, ref_to_message_id: Option<&str>) -> ErrorSignal {
        let message_info = match ref_to_message_id {
            Some(id) => MessageInfo::referring_to(id),
            None => MessageInfo::generate(),
        };

        ErrorSignal {
            message_info,
            errors: vec![ErrorDetail {
                code: self.error_code(),
                severity: Severity::Failure,
                ref_to_message_in_error: ref_to_message_id.map(str::to_string),
                detail: sanitize_error_message(&self.to_string()),
            }],
        }
    }
}

static SECRET_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+").ok());

static SECRET_PATH_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|\.ssh|\.aws|\.config|private)/[a-zA-Z0-9._/-]+").ok()
});

/// Sanitize error messages before they leave the MSH
fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = message.to_string();

    if let Some(pattern) = SECRET_PATTERN.as_ref() {
        sanitized = pattern.replace_all(&sanitized, "${1}=***").to_string();
    }

    // Key material paths from certificate configuration
    if let Some(pattern) = SECRET_PATH_PATTERN.as_ref() {
        sanitized = pattern
            .replace_all(&sanitized, "/***REDACTED***/")
            .to_string();
    }

    // Truncate very long messages - ensure total length is <= 500
    if sanitized.len() > 500 {
        let truncate_suffix = "...[truncated]";
        let mut cut = 500 - truncate_suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized = format!("{}{}", &sanitized[..cut], truncate_suffix);
    }

    sanitized
}

/// Result type for MSH operations
pub type MshResult<T> = Result<T, MshError>;
