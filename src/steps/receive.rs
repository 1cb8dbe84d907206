//! Inbound steps: PMode determination, decryption, verification, receipts

use crate::error::MshError;
use crate::observability::metrics;
use crate::pipeline::{MessagingContext, Step, StepResult};
use crate::pmode::{resolve_receiving_pmode, Limit, PModeStore, ResolutionError};
use crate::protocol::{
    As4Message, MessageInfo, MessagePartReference, MessageUnit, Receipt, ReceiptContent,
};
use crate::reliability::ReceptionAwarenessStore;
use crate::security::{
    decrypt_message, verify_message, CertificateRepository, SecurityError, VerificationOptions,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Apply a Required/NotAllowed/Ignored policy; `Ok(true)` means process the feature
fn check_policy(limit: Limit, present: bool, feature: &str) -> Result<bool, SecurityError> {
    match (limit, present) {
        (Limit::Ignored, _) => Ok(false),
        (Limit::Required, false) => Err(SecurityError::policy_violation(format!(
            "{feature} is required but the message carries none"
        ))),
        (Limit::NotAllowed, true) => Err(SecurityError::policy_violation(format!(
            "{feature} is not allowed but the message carries one"
        ))),
        (_, present) => Ok(present),
    }
}

// ========== receive.determine_pmodes ==========

pub struct DeterminePModesStep {
    pmodes: Arc<PModeStore>,
    store: Arc<dyn ReceptionAwarenessStore>,
}

impl DeterminePModesStep {
    pub fn new(pmodes: Arc<PModeStore>, store: Arc<dyn ReceptionAwarenessStore>) -> Self {
        Self { pmodes, store }
    }

    /// Signals take the Sending PMode of the outbound message they refer to
    async fn resolve_signal(&self, context: &mut MessagingContext) -> Result<(), ResolutionError> {
        let ref_to = context
            .message
            .message_units
            .first()
            .and_then(|unit| unit.message_info().ref_to_message_id.clone())
            .ok_or(ResolutionError::NothingToResolve)?;

        let Some(record) = self.store.record(&ref_to).await else {
            debug!(ref_to_message_id = %ref_to, "Signal refers to an untracked message");
            return Ok(());
        };
        let pmode = self
            .pmodes
            .sending(&record.pmode_id)
            .ok_or_else(|| ResolutionError::UnknownSendingPMode(record.pmode_id.clone()))?;
        context.sending_pmode = Some(pmode);
        Ok(())
    }
}

#[async_trait]
impl Step for DeterminePModesStep {
    fn name(&self) -> &str {
        "receive.determine_pmodes"
    }

    async fn execute(&self, mut context: MessagingContext) -> StepResult {
        let outcome = if let Some(user_message) = context.message.primary_user_message() {
            let snapshot = self.pmodes.snapshot();
            resolve_receiving_pmode(user_message, &snapshot.receiving).map(|pmode| {
                context.receiving_pmode = Some(pmode);
            })
        } else if context.message.is_signal_message() {
            self.resolve_signal(&mut context).await
        } else {
            Err(ResolutionError::NothingToResolve)
        };

        match outcome {
            Ok(()) => {
                metrics().pmode_resolved();
                StepResult::success(context)
            }
            Err(e) => {
                metrics().pmode_resolution_failed();
                StepResult::failure(context, e)
            }
        }
    }
}

// ========== receive.decrypt ==========

pub struct DecryptStep {
    certificates: Arc<dyn CertificateRepository>,
}

impl DecryptStep {
    pub fn new(certificates: Arc<dyn CertificateRepository>) -> Self {
        Self { certificates }
    }

    fn decrypt(&self, context: &mut MessagingContext) -> Result<usize, SecurityError> {
        let limit = context
            .receiving_pmode
            .as_ref()
            .map(|pmode| pmode.security.decryption.encryption)
            .unwrap_or_default();

        if !check_policy(limit, context.message.is_encrypted(), "Encryption")? {
            return Ok(0);
        }
        decrypt_message(&mut context.message, self.certificates.as_ref())
    }
}

#[async_trait]
impl Step for DecryptStep {
    fn name(&self) -> &str {
        "receive.decrypt"
    }

    async fn execute(&self, mut context: MessagingContext) -> StepResult {
        match self.decrypt(&mut context) {
            Ok(0) => StepResult::success(context),
            Ok(count) => {
                metrics().message_decrypted();
                debug!(
                    message_id = context.message_id().unwrap_or_default(),
                    attachments = count,
                    "Attachments decrypted"
                );
                StepResult::success(context)
            }
            Err(e) => {
                metrics().decryption_failed();
                warn!(
                    message_id = context.message_id().unwrap_or_default(),
                    error = %e,
                    "Decryption rejected"
                );
                StepResult::failure(context, e)
            }
        }
    }
}

// ========== receive.verify_signature ==========

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerifySignatureSettings {
    /// Accept chains ending in a root outside the trust store
    #[serde(default)]
    pub allow_unknown_root_authority: bool,
}

pub struct VerifySignatureStep {
    certificates: Arc<dyn CertificateRepository>,
    settings: VerifySignatureSettings,
}

impl VerifySignatureStep {
    pub fn new(certificates: Arc<dyn CertificateRepository>, settings: VerifySignatureSettings) -> Self {
        Self {
            certificates,
            settings,
        }
    }

    fn verify(&self, context: &mut MessagingContext) -> Result<bool, SecurityError> {
        let verification = context
            .receiving_pmode
            .as_ref()
            .map(|pmode| pmode.security.signing_verification.clone())
            .unwrap_or_default();

        if !check_policy(verification.signature, context.message.is_signed(), "Signature")? {
            return Ok(false);
        }

        let options = VerificationOptions {
            allow_unknown_root_authority: self.settings.allow_unknown_root_authority
                || verification.allow_unknown_root_authority,
        };
        context.verified_references =
            verify_message(&mut context.message, self.certificates.as_ref(), &options)?;
        Ok(true)
    }
}

#[async_trait]
impl Step for VerifySignatureStep {
    fn name(&self) -> &str {
        "receive.verify_signature"
    }

    async fn execute(&self, mut context: MessagingContext) -> StepResult {
        match self.verify(&mut context) {
            Ok(verified) => {
                if verified {
                    metrics().signature_verified();
                    debug!(
                        message_id = context.message_id().unwrap_or_default(),
                        references = context.verified_references.len(),
                        "Signature verified"
                    );
                }
                StepResult::success(context)
            }
            Err(e) => {
                metrics().signature_failed();
                warn!(
                    message_id = context.message_id().unwrap_or_default(),
                    error = %e,
                    "Signature rejected"
                );
                StepResult::failure(context, e)
            }
        }
    }
}

// ========== receive.create_receipt ==========

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateReceiptSettings {
    /// Echo the verified reference digests instead of the UserMessage
    #[serde(default)]
    pub use_nrr_format: bool,
}

pub struct CreateReceiptStep {
    settings: CreateReceiptSettings,
}

impl CreateReceiptStep {
    pub fn new(settings: CreateReceiptSettings) -> Self {
        Self { settings }
    }

    fn receipt_for(&self, context: &MessagingContext) -> Option<As4Message> {
        let user_message = context.message.primary_user_message()?;

        let content = if self.settings.use_nrr_format && !context.verified_references.is_empty() {
            ReceiptContent::NonRepudiation(
                context
                    .verified_references
                    .iter()
                    .map(|reference| MessagePartReference {
                        uri: reference.uri.clone(),
                        digest_method: reference.digest_method.clone(),
                        digest_value: reference.digest_value.clone(),
                    })
                    .collect(),
            )
        } else {
            if self.settings.use_nrr_format {
                debug!(
                    message_id = user_message.message_id(),
                    "Message was not verified, falling back to a UserMessage receipt"
                );
            }
            ReceiptContent::UserMessage(Box::new(user_message.clone()))
        };

        Some(As4Message::new().with_unit(MessageUnit::Receipt(Receipt {
            message_info: MessageInfo::referring_to(user_message.message_id()),
            content,
        })))
    }
}

#[async_trait]
impl Step for CreateReceiptStep {
    fn name(&self) -> &str {
        "receive.create_receipt"
    }

    async fn execute(&self, mut context: MessagingContext) -> StepResult {
        if let Some(receipt) = self.receipt_for(&context) {
            debug!(
                message_id = context.message_id().unwrap_or_default(),
                receipt_id = receipt.primary_message_id().unwrap_or_default(),
                "Receipt created"
            );
            context.response = Some(receipt);
        }
        StepResult::success(context)
    }
}

// ========== receive.update_reception_awareness ==========

pub struct UpdateReceptionAwarenessStep {
    store: Arc<dyn ReceptionAwarenessStore>,
}

impl UpdateReceptionAwarenessStep {
    pub fn new(store: Arc<dyn ReceptionAwarenessStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Step for UpdateReceptionAwarenessStep {
    fn name(&self) -> &str {
        "receive.update_reception_awareness"
    }

    async fn execute(&self, context: MessagingContext) -> StepResult {
        for unit in &context.message.message_units {
            let Some(ref_to) = unit.message_info().ref_to_message_id.as_deref() else {
                continue;
            };
            match unit {
                MessageUnit::Receipt(_) => {
                    if self.store.register_receipt(ref_to).await {
                        info!(ref_to_message_id = ref_to, "Receipt registered for tracked message");
                    } else {
                        debug!(ref_to_message_id = ref_to, "Receipt for unknown or closed message");
                    }
                }
                MessageUnit::Error(signal) => {
                    // Left for retry; the record dead-letters if no receipt follows
                    warn!(
                        ref_to_message_id = ref_to,
                        codes = ?signal.errors.iter().map(|e| e.code.as_str()).collect::<Vec<_>>(),
                        "Error signal received"
                    );
                }
                MessageUnit::User(_) => {}
            }
        }
        StepResult::success(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::MessagingMode;
    use crate::pmode::{PModeSet, ReceivingPMode, SendingPMode};
    use crate::reliability::{InMemoryReceptionAwarenessStore, ReceptionAwarenessRecord};
    use crate::security::{sign_message, SigningOptions};
    use crate::testing::{
        receipt_reply, receiver_repository, sample_attachment, sample_message, sender_credential,
    };
    use chrono::Utc;

    fn receiving(limit: Limit) -> ReceivingPMode {
        let mut pmode = ReceivingPMode::new("recv-1");
        pmode.security.signing_verification.signature = limit;
        pmode
    }

    fn signed_context() -> MessagingContext {
        let mut message = sample_message("m-1", vec![sample_attachment("payload", 128)]);
        sign_message(&mut message, &sender_credential().unwrap(), &SigningOptions::default()).unwrap();
        MessagingContext::new(message, MessagingMode::Receive)
    }

    fn verifier() -> VerifySignatureStep {
        VerifySignatureStep::new(
            Arc::new(receiver_repository().unwrap()),
            VerifySignatureSettings::default(),
        )
    }

    #[test]
    fn test_policy_table() {
        assert!(!check_policy(Limit::Ignored, true, "Signature").unwrap());
        assert!(check_policy(Limit::Required, false, "Signature").is_err());
        assert!(check_policy(Limit::NotAllowed, true, "Signature").is_err());
        assert!(!check_policy(Limit::NotAllowed, false, "Signature").unwrap());
        assert!(check_policy(Limit::Allowed, true, "Signature").unwrap());
        assert!(!check_policy(Limit::Allowed, false, "Signature").unwrap());
    }

    #[tokio::test]
    async fn test_verify_then_nrr_receipt() {
        let mut context = signed_context();
        context.receiving_pmode = Some(receiving(Limit::Required));

        let verified = verifier().execute(context).await;
        assert!(verified.succeeded, "{:?}", verified.context.error);
        assert_eq!(verified.context.verified_references.len(), 3);

        let receipt = CreateReceiptStep::new(CreateReceiptSettings {
            use_nrr_format: true,
        })
        .execute(verified.context)
        .await;
        let response = receipt.context.response.unwrap();
        let receipt = response.receipts().next().unwrap();
        assert_eq!(receipt.message_info.ref_to_message_id.as_deref(), Some("m-1"));
        assert!(matches!(&receipt.content, ReceiptContent::NonRepudiation(refs) if refs.len() == 3));
    }

    #[tokio::test]
    async fn test_required_signature_missing_is_policy_failure() {
        let mut context = MessagingContext::new(sample_message("m-1", Vec::new()), MessagingMode::Receive);
        context.receiving_pmode = Some(receiving(Limit::Required));

        let result = verifier().execute(context).await;
        assert!(!result.succeeded);
        assert!(matches!(
            result.context.error,
            Some(MshError::Security(SecurityError::PolicyViolation(_)))
        ));
    }

    #[tokio::test]
    async fn test_ignored_signature_skips_verification() {
        let mut context = signed_context();
        context.receiving_pmode = Some(receiving(Limit::Ignored));
        let result = VerifySignatureStep::new(
            Arc::new(crate::security::InMemoryCertificateRepository::default()),
            VerifySignatureSettings::default(),
        )
        .execute(context)
        .await;
        assert!(result.succeeded);
        assert!(result.context.verified_references.is_empty());
    }

    #[tokio::test]
    async fn test_unsigned_message_gets_user_message_receipt() {
        let context = MessagingContext::new(sample_message("m-1", Vec::new()), MessagingMode::Receive);
        let result = CreateReceiptStep::new(CreateReceiptSettings {
            use_nrr_format: true,
        })
        .execute(context)
        .await;
        let response = result.context.response.unwrap();
        assert!(matches!(
            response.receipts().next().unwrap().content,
            ReceiptContent::UserMessage(_)
        ));
    }

    #[tokio::test]
    async fn test_determine_pmodes_for_user_message_and_receipt() {
        let mut receiving_pmode = ReceivingPMode::new("recv-1");
        receiving_pmode.action = Some("submit".to_string());
        receiving_pmode.service = Some(crate::pmode::PModeService {
            value: "invoice".to_string(),
            service_type: None,
        });
        let pmodes = Arc::new(PModeStore::new(PModeSet::new(
            vec![receiving_pmode],
            vec![SendingPMode::new("send-1")],
        )));
        let store = Arc::new(InMemoryReceptionAwarenessStore::new());
        store
            .track(
                ReceptionAwarenessRecord::new(
                    "out-1",
                    "send-1",
                    &Default::default(),
                    Utc::now(),
                ),
                sample_message("out-1", Vec::new()),
            )
            .await
            .unwrap();
        let step = DeterminePModesStep::new(pmodes, store);

        let user = step
            .execute(MessagingContext::new(sample_message("m-1", Vec::new()), MessagingMode::Receive))
            .await;
        assert!(user.succeeded);
        assert_eq!(user.context.receiving_pmode.unwrap().id, "recv-1");

        let signal = step
            .execute(MessagingContext::new(receipt_reply("out-1"), MessagingMode::Receive))
            .await;
        assert!(signal.succeeded);
        assert_eq!(signal.context.sending_pmode.unwrap().id, "send-1");

        let empty = step
            .execute(MessagingContext::new(As4Message::new(), MessagingMode::Receive))
            .await;
        assert!(matches!(
            empty.context.error,
            Some(MshError::Resolution(ResolutionError::NothingToResolve))
        ));
    }

    #[tokio::test]
    async fn test_update_reception_awareness_registers_receipts() {
        let store = Arc::new(InMemoryReceptionAwarenessStore::new());
        let record = ReceptionAwarenessRecord::new(
            "out-9",
            "send-1",
            &Default::default(),
            Utc::now(),
        );
        store.track(record, As4Message::new()).await.unwrap();
        let step = UpdateReceptionAwarenessStep::new(store.clone());

        let result = step
            .execute(MessagingContext::new(receipt_reply("out-9"), MessagingMode::Receive))
            .await;
        assert!(result.succeeded);
        assert!(store.has_receipt("out-9").await);

        // Receipts for messages never sent reliably are dropped
        let stray = step
            .execute(MessagingContext::new(receipt_reply("out-10"), MessagingMode::Receive))
            .await;
        assert!(stray.succeeded);
        assert!(!store.has_receipt("out-10").await);
    }
}
