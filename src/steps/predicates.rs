use crate::pipeline::{MessagingContext, StepRegistry};

pub fn is_user_message(context: &MessagingContext) -> bool {
    context.message.is_user_message()
}

pub fn is_signal_message(context: &MessagingContext) -> bool {
    context.message.is_signal_message()
}

pub fn has_attachments(context: &MessagingContext) -> bool {
    !context.message.attachments.is_empty()
}

pub fn is_signed(context: &MessagingContext) -> bool {
    context.message.is_signed()
}

pub fn is_encrypted(context: &MessagingContext) -> bool {
    context.message.is_encrypted()
}

pub fn reception_awareness_enabled(context: &MessagingContext) -> bool {
    context
        .sending_pmode
        .as_ref()
        .is_some_and(|pmode| pmode.reception_awareness_enabled())
}

pub fn register_predicates(registry: &mut StepRegistry) {
    registry
        .register_predicate("is_user_message", is_user_message)
        .register_predicate("is_signal_message", is_signal_message)
        .register_predicate("has_attachments", has_attachments)
        .register_predicate("is_signed", is_signed)
        .register_predicate("is_encrypted", is_encrypted)
        .register_predicate("reception_awareness_enabled", reception_awareness_enabled);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::MessagingMode;
    use crate::pmode::SendingPMode;
    use crate::protocol::As4Message;
    use crate::testing::{receipt_reply, sample_attachment, sample_message};

    #[test]
    fn test_message_kind_predicates() {
        let user = MessagingContext::new(sample_message("m-1", Vec::new()), MessagingMode::Receive);
        assert!(is_user_message(&user));
        assert!(!is_signal_message(&user));
        assert!(!has_attachments(&user));

        let signal = MessagingContext::new(receipt_reply("m-1"), MessagingMode::Receive);
        assert!(is_signal_message(&signal));
        assert!(!is_user_message(&signal));

        let with_payload = MessagingContext::new(
            sample_message("m-2", vec![sample_attachment("p1", 10)]),
            MessagingMode::Send,
        );
        assert!(has_attachments(&with_payload));
        assert!(!is_signed(&with_payload));
        assert!(!is_encrypted(&with_payload));
    }

    #[test]
    fn test_reception_awareness_predicate() {
        let mut context = MessagingContext::new(As4Message::new(), MessagingMode::Send);
        assert!(!reception_awareness_enabled(&context));

        let mut pmode = SendingPMode::new("pm-1");
        pmode.reliability.reception_awareness.enabled = true;
        context.sending_pmode = Some(pmode);
        assert!(reception_awareness_enabled(&context));
    }
}
