//! Transport boundary for outbound AS4 messages
//!
//! The MIME/XML wire format is owned by an external [`EnvelopeCodec`]; the
//! transport only moves encoded envelopes to the partner named by the
//! Sending PMode and hands back whatever arrives on the back-channel.

use crate::pmode::SendingPMode;
use crate::protocol::As4Message;
use bytes::Bytes;
use thiserror::Error;

pub mod http;

pub use http::{HttpSender, HttpSenderConfig};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Sending PMode '{0}' has no push URL")]
    NoPushUrl(String),

    #[error("Invalid push URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Partner responded with HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Envelope codec error: {0}")]
    Codec(String),
}

/// Serialized envelope with its MIME content type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedMessage {
    pub content_type: String,
    pub body: Bytes,
}

/// Wire (de)serializer for AS4 envelopes
pub trait EnvelopeCodec: Send + Sync {
    fn encode(&self, message: &As4Message) -> Result<EncodedMessage, TransportError>;

    fn decode(&self, content_type: &str, body: &[u8]) -> Result<As4Message, TransportError>;
}

/// Delivers an outbound message to the partner
#[async_trait::async_trait]
pub trait MessageSender: Send + Sync {
    /// Send and return the synchronous reply (typically a Receipt), if any
    async fn send(
        &self,
        message: &As4Message,
        pmode: &SendingPMode,
    ) -> Result<Option<As4Message>, TransportError>;
}
