//! The unit of work moved through a pipeline

use super::cancellation::CancellationSignal;
use crate::error::MshError;
use crate::pmode::{ReceivingPMode, SendingPMode};
use crate::protocol::{As4Message, SignatureReference};
use serde::{Deserialize, Serialize};

/// Why the message is being processed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessagingMode {
    Submit,
    Receive,
    Send,
    Notify,
    Deliver,
    Forward,
}

/// One message in flight, owned by exactly one pipeline run
#[derive(Debug)]
pub struct MessagingContext {
    pub message: As4Message,
    pub mode: MessagingMode,
    pub sending_pmode: Option<SendingPMode>,
    pub receiving_pmode: Option<ReceivingPMode>,
    /// Set when a step fails
    pub error: Option<MshError>,
    /// Reply produced for the partner, e.g. a Receipt
    pub response: Option<As4Message>,
    /// References of a successfully verified signature
    pub verified_references: Vec<SignatureReference>,
    cancellation: CancellationSignal,
}

impl MessagingContext {
    pub fn new(message: As4Message, mode: MessagingMode) -> Self {
        Self {
            message,
            mode,
            sending_pmode: None,
            receiving_pmode: None,
            error: None,
            response: None,
            verified_references: Vec::new(),
            cancellation: CancellationSignal::never(),
        }
    }

    pub fn with_cancellation(mut self, signal: CancellationSignal) -> Self {
        self.cancellation = signal;
        self
    }

    pub fn cancellation(&self) -> &CancellationSignal {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn message_id(&self) -> Option<&str> {
        self.message.primary_message_id()
    }
}
