//! Mock implementations for testing
//!
//! Provides a recording [`MessageSender`] and a minimal [`EnvelopeCodec`] so
//! pipelines and the reception awareness agent can run without a partner.

use crate::pmode::SendingPMode;
use crate::protocol::{As4Message, MessageInfo, MessageUnit, Receipt, ReceiptContent};
use crate::transport::{EncodedMessage, EnvelopeCodec, MessageSender, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;

/// How [`MockMessageSender`] answers each send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderBehavior {
    /// Accept without a synchronous reply
    NoReply,
    /// Reply with a Receipt for the sent message
    ReceiptReply,
    /// Fail every send
    Fail,
}

/// Recording sender; each entry is the message and the Sending PMode id
#[derive(Debug)]
pub struct MockMessageSender {
    behavior: SenderBehavior,
    sent: Mutex<Vec<(As4Message, String)>>,
}

impl MockMessageSender {
    pub fn new(behavior: SenderBehavior) -> Self {
        Self {
            behavior,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub async fn sent_messages(&self) -> Vec<(As4Message, String)> {
        self.sent.lock().await.clone()
    }

    pub async fn sent_count(&self) -> usize {
        self.sent.lock().await.len()
    }
}

impl Default for MockMessageSender {
    fn default() -> Self {
        Self::new(SenderBehavior::NoReply)
    }
}

#[async_trait]
impl MessageSender for MockMessageSender {
    async fn send(
        &self,
        message: &As4Message,
        pmode: &SendingPMode,
    ) -> Result<Option<As4Message>, TransportError> {
        self.sent
            .lock()
            .await
            .push((message.clone(), pmode.id.clone()));

        match self.behavior {
            SenderBehavior::NoReply => Ok(None),
            SenderBehavior::ReceiptReply => Ok(message.primary_message_id().map(receipt_reply)),
            SenderBehavior::Fail => Err(TransportError::Http("Mock send failure".to_string())),
        }
    }
}

/// Bare receipt signal referring to `ref_to_message_id`
pub fn receipt_reply(ref_to_message_id: &str) -> As4Message {
    As4Message::new().with_unit(MessageUnit::Receipt(Receipt {
        message_info: MessageInfo::referring_to(ref_to_message_id),
        content: ReceiptContent::NonRepudiation(Vec::new()),
    }))
}

/// Codec that writes the canonical envelope XML and reads a plain-text
/// message id back as a receipt for that id
#[derive(Debug, Default, Clone, Copy)]
pub struct MockEnvelopeCodec;

impl EnvelopeCodec for MockEnvelopeCodec {
    fn encode(&self, message: &As4Message) -> Result<EncodedMessage, TransportError> {
        Ok(EncodedMessage {
            content_type: "application/soap+xml".to_string(),
            body: Bytes::from(message.envelope_element().canonicalize()),
        })
    }

    fn decode(&self, _content_type: &str, body: &[u8]) -> Result<As4Message, TransportError> {
        let text = std::str::from_utf8(body)
            .map_err(|e| TransportError::Codec(e.to_string()))?
            .trim();
        if text.is_empty() {
            return Err(TransportError::Codec("empty reply".to_string()));
        }
        Ok(receipt_reply(text))
    }
}
