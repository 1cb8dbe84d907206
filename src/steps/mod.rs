//! Built-in steps and predicates for Send and Receive pipelines
//!
//! | Key | Settings |
//! |---|---|
//! | `send.determine_pmode` | - |
//! | `send.sign` | - |
//! | `send.encrypt` | - |
//! | `send.track_reception_awareness` | - |
//! | `send.transmit` | - |
//! | `receive.determine_pmodes` | - |
//! | `receive.decrypt` | - |
//! | `receive.verify_signature` | `allow_unknown_root_authority` |
//! | `receive.create_receipt` | `use_nrr_format` |
//! | `receive.update_reception_awareness` | - |

pub mod predicates;
pub mod receive;
pub mod send;

use crate::pipeline::{parse_settings, StepRegistry};
use crate::pmode::PModeStore;
use crate::reliability::ReceptionAwarenessStore;
use crate::security::CertificateRepository;
use crate::transport::MessageSender;
use std::sync::Arc;

/// Shared collaborators handed to every built-in step
#[derive(Clone)]
pub struct StepDependencies {
    pub pmodes: Arc<PModeStore>,
    pub certificates: Arc<dyn CertificateRepository>,
    pub reception_awareness: Arc<dyn ReceptionAwarenessStore>,
    pub sender: Arc<dyn MessageSender>,
    /// Used when an outbound UserMessage carries no PMode id
    pub default_sending_pmode: Option<String>,
}

/// Register every built-in step and predicate
pub fn register_builtin_steps(registry: &mut StepRegistry, deps: &StepDependencies) {
    let d = deps.clone();
    registry.register_step("send.determine_pmode", move || {
        Box::new(send::DetermineSendingPModeStep::new(
            d.pmodes.clone(),
            d.default_sending_pmode.clone(),
        ))
    });
    let d = deps.clone();
    registry.register_step("send.sign", move || {
        Box::new(send::SignStep::new(d.certificates.clone()))
    });
    let d = deps.clone();
    registry.register_step("send.encrypt", move || {
        Box::new(send::EncryptStep::new(d.certificates.clone()))
    });
    let d = deps.clone();
    registry.register_step("send.track_reception_awareness", move || {
        Box::new(send::TrackReceptionAwarenessStep::new(
            d.reception_awareness.clone(),
        ))
    });
    let d = deps.clone();
    registry.register_step("send.transmit", move || {
        Box::new(send::TransmitStep::new(
            d.sender.clone(),
            d.reception_awareness.clone(),
        ))
    });

    let d = deps.clone();
    registry.register_step("receive.determine_pmodes", move || {
        Box::new(receive::DeterminePModesStep::new(
            d.pmodes.clone(),
            d.reception_awareness.clone(),
        ))
    });
    let d = deps.clone();
    registry.register_step("receive.decrypt", move || {
        Box::new(receive::DecryptStep::new(d.certificates.clone()))
    });
    let d = deps.clone();
    registry.register_configurable_step("receive.verify_signature", move |settings| {
        let settings: receive::VerifySignatureSettings = parse_settings(settings)?;
        Ok(Box::new(receive::VerifySignatureStep::new(
            d.certificates.clone(),
            settings,
        )))
    });
    registry.register_configurable_step("receive.create_receipt", |settings| {
        let settings: receive::CreateReceiptSettings = parse_settings(settings)?;
        Ok(Box::new(receive::CreateReceiptStep::new(settings)))
    });
    let d = deps.clone();
    registry.register_step("receive.update_reception_awareness", move || {
        Box::new(receive::UpdateReceptionAwarenessStep::new(
            d.reception_awareness.clone(),
        ))
    });

    predicates::register_predicates(registry);
}

/// Registry holding exactly the built-in steps and predicates
pub fn builtin_registry(deps: &StepDependencies) -> StepRegistry {
    let mut registry = StepRegistry::new();
    register_builtin_steps(&mut registry, deps);
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pmode::PModeSet;
    use crate::reliability::InMemoryReceptionAwarenessStore;
    use crate::security::{InMemoryCertificateRepository, TrustStore};
    use crate::testing::MockMessageSender;

    pub(crate) fn deps() -> StepDependencies {
        StepDependencies {
            pmodes: Arc::new(PModeStore::new(PModeSet::default())),
            certificates: Arc::new(InMemoryCertificateRepository::new(TrustStore::default())),
            reception_awareness: Arc::new(InMemoryReceptionAwarenessStore::new()),
            sender: Arc::new(MockMessageSender::default()),
            default_sending_pmode: None,
        }
    }

    #[test]
    fn test_all_builtins_registered() {
        let registry = builtin_registry(&deps());
        assert_eq!(
            registry.step_keys(),
            vec![
                "receive.create_receipt",
                "receive.decrypt",
                "receive.determine_pmodes",
                "receive.update_reception_awareness",
                "receive.verify_signature",
                "send.determine_pmode",
                "send.encrypt",
                "send.sign",
                "send.track_reception_awareness",
                "send.transmit",
            ]
        );
        assert_eq!(
            registry.predicate_keys(),
            vec![
                "has_attachments",
                "is_encrypted",
                "is_signal_message",
                "is_signed",
                "is_user_message",
                "reception_awareness_enabled",
            ]
        );
        assert_eq!(registry.accepts_settings("receive.verify_signature"), Some(true));
        assert_eq!(registry.accepts_settings("send.sign"), Some(false));
    }
}
