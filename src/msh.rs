//! Wiring of configuration, stores, pipelines and the reliability agent

use crate::config::MshConfig;
use crate::error::{MshError, MshResult};
use crate::pipeline::{CancellationSignal, MessagingContext, MessagingMode, PipelineSet, StepRegistry, StepResult};
use crate::pmode::PModeStore;
use crate::protocol::As4Message;
use crate::observability::metrics;
use crate::reliability::{
    InMemoryReceptionAwarenessStore, ReceptionAwarenessAgent, ReceptionAwarenessStore, ReceptionStatus,
};
use crate::security::CertificateRepository;
use crate::steps::{register_builtin_steps, StepDependencies};
use crate::transport::MessageSender;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// A configured message service handler
pub struct MessageServiceHandler {
    id: String,
    deps: StepDependencies,
    pipelines: PipelineSet,
    poll_interval: Duration,
}

impl MessageServiceHandler {
    /// Build the handler with the built-in steps only
    pub fn from_config(config: &MshConfig, sender: Arc<dyn MessageSender>) -> MshResult<Self> {
        Self::from_config_with(config, sender, |_| {})
    }

    /// Build the handler, letting the caller register extra steps and predicates
    /// before the pipelines are assembled
    pub fn from_config_with<F>(
        config: &MshConfig,
        sender: Arc<dyn MessageSender>,
        extend: F,
    ) -> MshResult<Self>
    where
        F: FnOnce(&mut StepRegistry),
    {
        let certificates: Arc<dyn CertificateRepository> = Arc::new(config.certificate_repository()?);
        let reception_awareness: Arc<dyn ReceptionAwarenessStore> =
            Arc::new(InMemoryReceptionAwarenessStore::new());

        let deps = StepDependencies {
            pmodes: Arc::new(PModeStore::new(config.pmode_set())),
            certificates,
            reception_awareness,
            sender,
            default_sending_pmode: config.msh.default_sending_pmode.clone(),
        };

        let mut registry = StepRegistry::new();
        register_builtin_steps(&mut registry, &deps);
        extend(&mut registry);
        let pipelines = PipelineSet::build(&registry, &config.pipelines)?;

        info!(
            msh_id = %config.msh.id,
            pipelines = pipelines.len(),
            receiving_pmodes = config.receiving_pmodes.len(),
            sending_pmodes = config.sending_pmodes.len(),
            "Message service handler ready"
        );

        Ok(Self {
            id: config.msh.id.clone(),
            deps,
            pipelines,
            poll_interval: config.reception_awareness.poll_interval(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn pipelines(&self) -> &PipelineSet {
        &self.pipelines
    }

    pub fn pmodes(&self) -> &Arc<PModeStore> {
        &self.deps.pmodes
    }

    pub fn reception_awareness(&self) -> &Arc<dyn ReceptionAwarenessStore> {
        &self.deps.reception_awareness
    }

    /// Swap in the PModes of a freshly loaded configuration; in-flight
    /// resolutions keep the snapshot they started with
    pub fn reload_pmodes(&self, config: &MshConfig) -> MshResult<()> {
        config.validate()?;
        self.deps.pmodes.replace(config.pmode_set());
        Ok(())
    }

    /// Run `message` through the named pipeline
    ///
    /// A cancelled send run stops reception awareness for its message, so the
    /// agent never resends what the caller gave up on.
    pub async fn process(
        &self,
        pipeline: &str,
        message: As4Message,
        mode: MessagingMode,
        signal: CancellationSignal,
    ) -> MshResult<StepResult> {
        let context = MessagingContext::new(message, mode).with_cancellation(signal);
        let result = self.pipelines.run(pipeline, context).await?;

        if let Some(cause @ MshError::Cancelled { .. }) = &result.context.error {
            if result.context.mode == MessagingMode::Send {
                self.close_tracking(&result.context, cause).await;
            }
        }
        Ok(result)
    }

    async fn close_tracking(&self, context: &MessagingContext, cause: &MshError) {
        let Some(user_message) = context.message.primary_user_message() else {
            return;
        };
        let message_id = user_message.message_id();

        match self.deps.reception_awareness.close(message_id, cause).await {
            Ok(Some(record)) => {
                if record.status == ReceptionStatus::DeadLettered {
                    metrics().record_dead_lettered();
                }
                info!(
                    message_id = %message_id,
                    status = ?record.status,
                    "Reception awareness closed for cancelled run"
                );
            }
            Ok(None) => {}
            Err(e) => warn!(
                message_id = %message_id,
                error = %e,
                "Could not close reception awareness for cancelled run"
            ),
        }
    }

    /// Scanner sharing this handler's stores and sender
    pub fn reception_awareness_agent(&self) -> ReceptionAwarenessAgent {
        ReceptionAwarenessAgent::new(
            self.deps.reception_awareness.clone(),
            self.deps.pmodes.clone(),
            self.deps.sender.clone(),
            self.poll_interval,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;
    use crate::pipeline::{CancellationSource, Step, StepConfiguration};
    use crate::testing::{sample_message, MockMessageSender, SenderBehavior};
    use async_trait::async_trait;

    /// Cancels the run it is part of, as a caller giving up mid-send would
    struct CancelRun {
        source: Arc<CancellationSource>,
    }

    #[async_trait]
    impl Step for CancelRun {
        fn name(&self) -> &str {
            "test.cancel"
        }

        async fn execute(&self, context: MessagingContext) -> StepResult {
            self.source.cancel();
            StepResult::success(context)
        }
    }

    #[tokio::test]
    async fn test_from_test_config() {
        let msh = MessageServiceHandler::from_config(
            &MshConfig::test_config(),
            Arc::new(MockMessageSender::default()),
        )
        .unwrap();
        assert_eq!(msh.id(), "test-msh");
        assert_eq!(msh.pipelines().names().collect::<Vec<_>>(), vec!["send"]);
    }

    #[tokio::test]
    async fn test_unknown_step_fails_fast() {
        let mut config = MshConfig::test_config();
        config
            .pipelines
            .get_mut("send")
            .unwrap()
            .steps
            .push(StepConfiguration::step("send.teleport"));

        let result = MessageServiceHandler::from_config(&config, Arc::new(MockMessageSender::default()));
        assert!(matches!(
            result,
            Err(MshError::Configuration(ConfigError::UnknownStep(key))) if key == "send.teleport"
        ));
    }

    #[tokio::test]
    async fn test_reload_swaps_pmodes_and_rejects_invalid_sets() {
        let msh = MessageServiceHandler::from_config(
            &MshConfig::test_config(),
            Arc::new(MockMessageSender::default()),
        )
        .unwrap();
        let before = msh.pmodes().snapshot();

        let mut config = MshConfig::test_config();
        config.msh.default_sending_pmode = None;
        config.sending_pmodes.push(crate::pmode::SendingPMode::new("send-2"));
        msh.reload_pmodes(&config).unwrap();
        assert!(msh.pmodes().sending("send-2").is_some());
        assert!(before.sending("send-2").is_none());

        config.msh.default_sending_pmode = Some("ghost".to_string());
        assert!(msh.reload_pmodes(&config).is_err());
        assert!(msh.pmodes().sending("send-2").is_some());
    }

    #[tokio::test]
    async fn test_unknown_pipeline_is_configuration_error() {
        let msh = MessageServiceHandler::from_config(
            &MshConfig::test_config(),
            Arc::new(MockMessageSender::default()),
        )
        .unwrap();
        let result = msh
            .process(
                "receive",
                sample_message("m-1", Vec::new()),
                MessagingMode::Receive,
                CancellationSignal::never(),
            )
            .await;
        assert!(matches!(
            result,
            Err(MshError::Configuration(ConfigError::MissingPipeline(_)))
        ));
    }

    #[tokio::test]
    async fn test_cancelled_send_stops_reception_awareness() {
        let mut config = MshConfig::test_config();
        let awareness = &mut config.sending_pmodes[0].reliability.reception_awareness;
        awareness.enabled = true;
        awareness.retry_count = 3;
        awareness.retry_interval = "0".to_string();
        config.pipelines.get_mut("send").unwrap().steps = vec![
            StepConfiguration::step("send.determine_pmode"),
            StepConfiguration::step("send.track_reception_awareness"),
            StepConfiguration::step("test.cancel"),
            StepConfiguration::step("send.transmit"),
        ];

        let source = Arc::new(CancellationSource::new());
        let sender = Arc::new(MockMessageSender::new(SenderBehavior::NoReply));
        let msh = MessageServiceHandler::from_config_with(&config, sender.clone(), |registry| {
            let source = source.clone();
            registry.register_step("test.cancel", move || {
                Box::new(CancelRun {
                    source: source.clone(),
                })
            });
        })
        .unwrap();

        let result = msh
            .process(
                "send",
                sample_message("m-1", Vec::new()),
                MessagingMode::Send,
                source.signal(),
            )
            .await
            .unwrap();
        assert!(!result.succeeded);
        assert!(matches!(
            result.context.error,
            Some(MshError::Cancelled { ref step }) if step == "send.transmit"
        ));

        let store = msh.reception_awareness();
        let record = store.record("m-1").await.unwrap();
        assert_eq!(record.status, ReceptionStatus::DeadLettered);
        assert!(store.outbound_message("m-1").await.is_none());
        let letters = store.dead_letters().await;
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].category, "step_execution");

        let summary = msh
            .reception_awareness_agent()
            .poll_once(&CancellationSignal::never())
            .await;
        assert_eq!(summary.resent, 0);
        assert_eq!(sender.sent_count().await, 0);
    }
}
