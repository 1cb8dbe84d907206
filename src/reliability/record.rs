//! Reception awareness records and dead-letter trail entries

use crate::error::MshError;
use crate::pmode::ReceptionAwareness;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReceptionStatus {
    Pending,
    ToBeRetried,
    Completed,
    DeadLettered,
}

impl ReceptionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReceptionStatus::Completed | ReceptionStatus::DeadLettered)
    }
}

/// Tracking state of one reliably sent UserMessage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReceptionAwarenessRecord {
    pub message_id: String,
    pub pmode_id: String,
    pub current_retry_count: u32,
    pub total_retry_count: u32,
    /// Raw configured interval, parsed at poll time
    pub retry_interval: String,
    pub last_send_time: DateTime<Utc>,
    pub status: ReceptionStatus,
    /// Bumped by the store on every committed update
    pub version: u64,
}

impl ReceptionAwarenessRecord {
    pub fn new(
        message_id: impl Into<String>,
        pmode_id: impl Into<String>,
        settings: &ReceptionAwareness,
        sent_at: DateTime<Utc>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            pmode_id: pmode_id.into(),
            current_retry_count: 0,
            total_retry_count: settings.retry_count,
            retry_interval: settings.retry_interval.clone(),
            last_send_time: sent_at,
            status: ReceptionStatus::Pending,
            version: 0,
        }
    }
}

/// Inspectable trail entry for a message that stopped being tracked without a receipt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeadLetter {
    pub message_id: String,
    pub pmode_id: String,
    /// [`MshError::category`] of the cause
    pub category: String,
    pub reason: String,
    pub attempts: u32,
    pub timestamp: DateTime<Utc>,
}

impl DeadLetter {
    pub fn new(record: &ReceptionAwarenessRecord, cause: &MshError) -> Self {
        Self {
            message_id: record.message_id.clone(),
            pmode_id: record.pmode_id.clone(),
            category: cause.category().to_string(),
            reason: cause.to_string(),
            attempts: record.current_retry_count,
            timestamp: Utc::now(),
        }
    }
}
