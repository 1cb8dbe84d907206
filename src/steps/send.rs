//! Outbound steps: PMode selection, signing, encryption, tracking, transmission

use crate::error::MshError;
use crate::observability::metrics;
use crate::pipeline::{MessagingContext, Step, StepResult};
use crate::pmode::{PModeStore, ResolutionError, SendingPMode};
use crate::reliability::{ReceptionAwarenessRecord, ReceptionAwarenessStore};
use crate::security::{encrypt_message, sign_message, CertificateRepository, SecurityError};
use crate::transport::MessageSender;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

fn require_sending_pmode(step: &str, context: &MessagingContext) -> Result<SendingPMode, MshError> {
    context
        .sending_pmode
        .clone()
        .ok_or_else(|| MshError::step_execution(step, "no Sending PMode has been determined"))
}

// ========== send.determine_pmode ==========

pub struct DetermineSendingPModeStep {
    pmodes: Arc<PModeStore>,
    default_pmode: Option<String>,
}

impl DetermineSendingPModeStep {
    pub fn new(pmodes: Arc<PModeStore>, default_pmode: Option<String>) -> Self {
        Self {
            pmodes,
            default_pmode,
        }
    }

    fn resolve(&self, context: &MessagingContext) -> Result<SendingPMode, MshError> {
        let user_message = context
            .message
            .primary_user_message()
            .ok_or(ResolutionError::NothingToResolve)?;

        let pmode_id = user_message
            .pmode_hint()
            .or(self.default_pmode.as_deref())
            .ok_or_else(|| {
                MshError::step_execution(
                    "send.determine_pmode",
                    format!(
                        "UserMessage {} names no Sending PMode",
                        user_message.message_id()
                    ),
                )
            })?;

        self.pmodes
            .sending(pmode_id)
            .ok_or_else(|| ResolutionError::UnknownSendingPMode(pmode_id.to_string()).into())
    }
}

#[async_trait]
impl Step for DetermineSendingPModeStep {
    fn name(&self) -> &str {
        "send.determine_pmode"
    }

    async fn execute(&self, mut context: MessagingContext) -> StepResult {
        match self.resolve(&context) {
            Ok(pmode) => {
                debug!(
                    message_id = context.message_id().unwrap_or_default(),
                    pmode_id = %pmode.id,
                    "Sending PMode determined"
                );
                metrics().pmode_resolved();
                context.sending_pmode = Some(pmode);
                StepResult::success(context)
            }
            Err(e) => {
                metrics().pmode_resolution_failed();
                StepResult::failure(context, e)
            }
        }
    }
}

// ========== send.sign ==========

pub struct SignStep {
    certificates: Arc<dyn CertificateRepository>,
}

impl SignStep {
    pub fn new(certificates: Arc<dyn CertificateRepository>) -> Self {
        Self { certificates }
    }

    fn sign(&self, context: &mut MessagingContext) -> Result<bool, MshError> {
        let pmode = require_sending_pmode("send.sign", context)?;
        let signing = &pmode.security.signing;
        if !signing.enabled {
            return Ok(false);
        }

        let criteria = signing.certificate.as_ref().ok_or_else(|| {
            SecurityError::CertificateNotFound(format!(
                "Sending PMode '{}' enables signing without a certificate",
                pmode.id
            ))
        })?;
        let credential = self.certificates.find_credential(criteria)?;
        sign_message(&mut context.message, &credential, &signing.options()?)?;
        Ok(true)
    }
}

#[async_trait]
impl Step for SignStep {
    fn name(&self) -> &str {
        "send.sign"
    }

    async fn execute(&self, mut context: MessagingContext) -> StepResult {
        match self.sign(&mut context) {
            Ok(signed) => {
                if signed {
                    metrics().message_signed();
                    debug!(
                        message_id = context.message_id().unwrap_or_default(),
                        attachments = context.message.attachments.len(),
                        "Message signed"
                    );
                }
                StepResult::success(context)
            }
            Err(e) => StepResult::failure(context, e),
        }
    }
}

// ========== send.encrypt ==========

pub struct EncryptStep {
    certificates: Arc<dyn CertificateRepository>,
}

impl EncryptStep {
    pub fn new(certificates: Arc<dyn CertificateRepository>) -> Self {
        Self { certificates }
    }

    fn encrypt(&self, context: &mut MessagingContext) -> Result<usize, MshError> {
        let pmode = require_sending_pmode("send.encrypt", context)?;
        let encryption = &pmode.security.encryption;
        if !encryption.enabled {
            return Ok(0);
        }

        let criteria = encryption.certificate.as_ref().ok_or_else(|| {
            SecurityError::CertificateNotFound(format!(
                "Sending PMode '{}' enables encryption without a recipient certificate",
                pmode.id
            ))
        })?;
        let recipient = self.certificates.find_certificate(criteria)?;
        Ok(encrypt_message(
            &mut context.message,
            &recipient,
            &encryption.options()?,
        )?)
    }
}

#[async_trait]
impl Step for EncryptStep {
    fn name(&self) -> &str {
        "send.encrypt"
    }

    async fn execute(&self, mut context: MessagingContext) -> StepResult {
        match self.encrypt(&mut context) {
            Ok(0) => StepResult::success(context),
            Ok(count) => {
                metrics().message_encrypted();
                debug!(
                    message_id = context.message_id().unwrap_or_default(),
                    attachments = count,
                    "Attachments encrypted"
                );
                StepResult::success(context)
            }
            Err(e) => StepResult::failure(context, e),
        }
    }
}

// ========== send.track_reception_awareness ==========

pub struct TrackReceptionAwarenessStep {
    store: Arc<dyn ReceptionAwarenessStore>,
}

impl TrackReceptionAwarenessStep {
    pub fn new(store: Arc<dyn ReceptionAwarenessStore>) -> Self {
        Self { store }
    }

    async fn track(&self, context: &MessagingContext) -> Result<Option<String>, MshError> {
        let pmode = require_sending_pmode("send.track_reception_awareness", context)?;
        if !pmode.reception_awareness_enabled() {
            return Ok(None);
        }

        let message_id = context
            .message
            .primary_user_message()
            .map(|user_message| user_message.message_id().to_string())
            .ok_or_else(|| {
                MshError::step_execution(
                    "send.track_reception_awareness",
                    "only UserMessages are tracked",
                )
            })?;

        let record = ReceptionAwarenessRecord::new(
            message_id.clone(),
            pmode.id.clone(),
            &pmode.reliability.reception_awareness,
            Utc::now(),
        );
        self.store.track(record, context.message.clone()).await?;
        Ok(Some(message_id))
    }
}

#[async_trait]
impl Step for TrackReceptionAwarenessStep {
    fn name(&self) -> &str {
        "send.track_reception_awareness"
    }

    async fn execute(&self, context: MessagingContext) -> StepResult {
        match self.track(&context).await {
            Ok(Some(message_id)) => {
                metrics().record_tracked();
                info!(message_id = %message_id, "Reception awareness tracking started");
                StepResult::success(context)
            }
            Ok(None) => StepResult::success(context),
            Err(e) => StepResult::failure(context, e),
        }
    }
}

// ========== send.transmit ==========

pub struct TransmitStep {
    sender: Arc<dyn MessageSender>,
    store: Arc<dyn ReceptionAwarenessStore>,
}

impl TransmitStep {
    pub fn new(sender: Arc<dyn MessageSender>, store: Arc<dyn ReceptionAwarenessStore>) -> Self {
        Self { sender, store }
    }
}

#[async_trait]
impl Step for TransmitStep {
    fn name(&self) -> &str {
        "send.transmit"
    }

    async fn execute(&self, mut context: MessagingContext) -> StepResult {
        let pmode = match require_sending_pmode("send.transmit", &context) {
            Ok(pmode) => pmode,
            Err(e) => return StepResult::failure(context, e),
        };

        match self.sender.send(&context.message, &pmode).await {
            Ok(reply) => {
                metrics().message_sent();
                if let Some(reply) = &reply {
                    for receipt in reply.receipts() {
                        if let Some(ref_to) = receipt.message_info.ref_to_message_id.as_deref() {
                            let tracked = self.store.register_receipt(ref_to).await;
                            debug!(ref_to_message_id = ref_to, tracked, "Synchronous receipt registered");
                        }
                    }
                }
                info!(
                    message_id = context.message_id().unwrap_or_default(),
                    pmode_id = %pmode.id,
                    reply = reply.is_some(),
                    "Message transmitted"
                );
                context.response = reply;
                StepResult::success(context)
            }
            Err(e) => {
                metrics().send_failed();
                warn!(
                    message_id = context.message_id().unwrap_or_default(),
                    pmode_id = %pmode.id,
                    error = %e,
                    "Transmission failed"
                );
                StepResult::failure(context, e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::MessagingMode;
    use crate::pmode::PModeSet;
    use crate::reliability::{InMemoryReceptionAwarenessStore, ReceptionStatus};
    use crate::security::CertificateFindCriteria;
    use crate::testing::{
        sample_attachment, sample_message, sender_repository, MockMessageSender, SenderBehavior,
    };

    fn pmode_store(pmode: SendingPMode) -> Arc<PModeStore> {
        Arc::new(PModeStore::new(PModeSet::new(Vec::new(), vec![pmode])))
    }

    fn context_for(pmode: Option<SendingPMode>) -> MessagingContext {
        let mut context = MessagingContext::new(
            sample_message("m-1", vec![sample_attachment("payload", 64)]),
            MessagingMode::Send,
        );
        context.sending_pmode = pmode;
        context
    }

    #[tokio::test]
    async fn test_determine_pmode_uses_default_then_hint() {
        let step = DetermineSendingPModeStep::new(
            pmode_store(SendingPMode::new("pm-1")),
            Some("pm-1".to_string()),
        );
        let result = step.execute(context_for(None)).await;
        assert!(result.succeeded);
        assert_eq!(result.context.sending_pmode.unwrap().id, "pm-1");

        let no_default = DetermineSendingPModeStep::new(pmode_store(SendingPMode::new("pm-1")), None);
        let mut context = context_for(None);
        if let Some(crate::protocol::MessageUnit::User(user)) = context.message.message_units.first_mut() {
            user.collaboration_info
                .agreement_reference
                .as_mut()
                .unwrap()
                .pmode_id = Some("pm-2".to_string());
        }
        let result = no_default.execute(context).await;
        assert!(!result.succeeded);
        assert!(matches!(
            result.context.error,
            Some(MshError::Resolution(ResolutionError::UnknownSendingPMode(ref id))) if id == "pm-2"
        ));
    }

    #[tokio::test]
    async fn test_sign_and_encrypt_follow_pmode() {
        let certificates: Arc<dyn CertificateRepository> = Arc::new(sender_repository().unwrap());
        let mut pmode = SendingPMode::new("pm-1");
        pmode.security.signing.enabled = true;
        pmode.security.signing.certificate = Some(CertificateFindCriteria::subject_name("party-a.example"));
        pmode.security.encryption.enabled = true;
        pmode.security.encryption.certificate =
            Some(CertificateFindCriteria::subject_name("party-b.example"));

        let signed = SignStep::new(certificates.clone())
            .execute(context_for(Some(pmode)))
            .await;
        assert!(signed.succeeded, "{:?}", signed.context.error);
        assert!(signed.context.message.is_signed());

        let encrypted = EncryptStep::new(certificates).execute(signed.context).await;
        assert!(encrypted.succeeded, "{:?}", encrypted.context.error);
        assert!(encrypted.context.message.is_encrypted());
    }

    #[tokio::test]
    async fn test_disabled_security_is_noop() {
        let certificates: Arc<dyn CertificateRepository> = Arc::new(sender_repository().unwrap());
        let result = SignStep::new(certificates)
            .execute(context_for(Some(SendingPMode::new("pm-1"))))
            .await;
        assert!(result.succeeded);
        assert!(!result.context.message.is_signed());
    }

    #[tokio::test]
    async fn test_sign_without_pmode_fails() {
        let certificates: Arc<dyn CertificateRepository> = Arc::new(sender_repository().unwrap());
        let result = SignStep::new(certificates).execute(context_for(None)).await;
        assert!(!result.succeeded);
        assert!(matches!(result.context.error, Some(MshError::StepExecution { .. })));
    }

    #[tokio::test]
    async fn test_tracking_and_transmit_register_receipt() {
        let store = Arc::new(InMemoryReceptionAwarenessStore::new());
        let mut pmode = SendingPMode::new("pm-1");
        pmode.reliability.reception_awareness.enabled = true;

        let tracked = TrackReceptionAwarenessStep::new(store.clone())
            .execute(context_for(Some(pmode)))
            .await;
        assert!(tracked.succeeded);
        let record = store.record("m-1").await.unwrap();
        assert_eq!(record.status, ReceptionStatus::Pending);
        assert!(store.outbound_message("m-1").await.is_some());

        let sender = Arc::new(MockMessageSender::new(SenderBehavior::ReceiptReply));
        let sent = TransmitStep::new(sender.clone(), store.clone())
            .execute(tracked.context)
            .await;
        assert!(sent.succeeded);
        assert!(sent.context.response.is_some());
        assert!(store.has_receipt("m-1").await);
        assert_eq!(sender.sent_count().await, 1);
    }

    #[tokio::test]
    async fn test_transmit_failure_is_transport_error() {
        let store = Arc::new(InMemoryReceptionAwarenessStore::new());
        let sender = Arc::new(MockMessageSender::new(SenderBehavior::Fail));
        let result = TransmitStep::new(sender, store)
            .execute(context_for(Some(SendingPMode::new("pm-1"))))
            .await;
        assert!(!result.succeeded);
        assert!(matches!(result.context.error, Some(MshError::Transport(_))));
    }
}
