//! Two message service handlers exchanging a secured UserMessage
//!
//! The sending handler signs, encrypts and tracks the message; a loopback
//! transport hands it to the receiving handler, whose NRR receipt travels
//! back and completes reception awareness on the sending side.


use as4msh::config::MshConfig;
use as4msh::pipeline::{CancellationSignal, MessagingMode};
use as4msh::pmode::SendingPMode;
use as4msh::protocol::{As4Message, ReceiptContent};
use as4msh::reliability::ReceptionStatus;
use as4msh::testing::{sample_attachment, sample_message, MockMessageSender};
use as4msh::transport::{MessageSender, TransportError};
use as4msh::MessageServiceHandler;
use async_trait::async_trait;
use std::sync::Arc;
use test_helpers::{receiver_config_toml, sender_config_toml, write_config};
use tokio::sync::Mutex;

/// Delivers straight into the partner's `receive` pipeline
struct Loopback {
    partner: Arc<MessageServiceHandler>,
    /// When false the receipt is held back instead of returned synchronously
    synchronous_receipts: bool,
    held_back: Mutex<Vec<As4Message>>,
}

impl Loopback {
    fn new(partner: Arc<MessageServiceHandler>, synchronous_receipts: bool) -> Self {
        Self {
            partner,
            synchronous_receipts,
            held_back: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl MessageSender for Loopback {
    async fn send(
        &self,
        message: &As4Message,
        _pmode: &SendingPMode,
    ) -> Result<Option<As4Message>, TransportError> {
        let result = self
            .partner
            .process(
                "receive",
                message.clone(),
                MessagingMode::Receive,
                CancellationSignal::never(),
            )
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        if !result.succeeded {
            let body = result
                .context
                .error
                .map(|e| e.to_string())
                .unwrap_or_default();
            return Err(TransportError::Status { status: 500, body });
        }

        match result.context.response {
            Some(reply) if !self.synchronous_receipts => {
                self.held_back.lock().await.push(reply);
                Ok(None)
            }
            reply => Ok(reply),
        }
    }
}

fn handler(toml_content: &str, sender: Arc<dyn MessageSender>) -> MessageServiceHandler {
    let file = write_config(toml_content);
    let config = MshConfig::load_from_file(file.path()).unwrap();
    MessageServiceHandler::from_config(&config, sender).unwrap()
}

fn exchange(synchronous_receipts: bool) -> (MessageServiceHandler, Arc<Loopback>) {
    let receiver = Arc::new(handler(
        &receiver_config_toml(),
        Arc::new(MockMessageSender::default()),
    ));
    let loopback = Arc::new(Loopback::new(receiver, synchronous_receipts));
    let sender = handler(
        &sender_config_toml("http://partner.invalid/as4"),
        loopback.clone(),
    );
    (sender, loopback)
}

async fn send(sender: &MessageServiceHandler, message: As4Message) -> as4msh::StepResult {
    sender
        .process(
            "send",
            message,
            MessagingMode::Send,
            CancellationSignal::never(),
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn test_synchronous_nrr_receipt_completes_reception_awareness() {
    let (sender, _loopback) = exchange(true);
    let message = sample_message(
        "m-1",
        vec![sample_attachment("invoice", 4096), sample_attachment("annex", 10)],
    );

    let result = send(&sender, message).await;
    assert!(result.succeeded, "send failed: {:?}", result.context.error);
    assert!(result.context.message.is_encrypted());

    let reply = result.context.response.expect("synchronous receipt");
    let receipt = reply.receipts().next().unwrap();
    assert_eq!(receipt.message_info.ref_to_message_id.as_deref(), Some("m-1"));
    match &receipt.content {
        // Messaging header, body and one reference per attachment
        ReceiptContent::NonRepudiation(references) => assert_eq!(references.len(), 4),
        other => panic!("expected NRR receipt, got {other:?}"),
    }

    let summary = sender
        .reception_awareness_agent()
        .poll_once(&CancellationSignal::never())
        .await;
    assert_eq!(summary.completed, 1);
    assert_eq!(
        sender.reception_awareness().record("m-1").await.unwrap().status,
        ReceptionStatus::Completed
    );
}

#[tokio::test]
async fn test_asynchronous_receipt_is_resolved_through_the_receive_pipeline() {
    let (sender, loopback) = exchange(false);

    let result = send(&sender, sample_message("m-2", vec![sample_attachment("invoice", 64)])).await;
    assert!(result.succeeded, "send failed: {:?}", result.context.error);
    assert!(result.context.response.is_none());

    let receipt = loopback.held_back.lock().await.pop().expect("held back receipt");
    let received = sender
        .process(
            "receive",
            receipt,
            MessagingMode::Receive,
            CancellationSignal::never(),
        )
        .await
        .unwrap();
    assert!(received.succeeded, "receive failed: {:?}", received.context.error);
    assert_eq!(
        received.context.sending_pmode.map(|pmode| pmode.id).as_deref(),
        Some("send-invoice")
    );

    let summary = sender
        .reception_awareness_agent()
        .poll_once(&CancellationSignal::never())
        .await;
    assert_eq!(summary.completed, 1);
    assert!(sender.reception_awareness().active_records().await.is_empty());
}

#[tokio::test]
async fn test_unsigned_message_is_refused_by_the_receiver() {
    let receiver = handler(
        &receiver_config_toml(),
        Arc::new(MockMessageSender::default()),
    );

    let result = receiver
        .process(
            "receive",
            sample_message("m-3", vec![sample_attachment("invoice", 64)]),
            MessagingMode::Receive,
            CancellationSignal::never(),
        )
        .await
        .unwrap();

    assert!(!result.succeeded);
    assert!(result.context.response.is_none());
    assert!(result.context.error.is_some());
}
