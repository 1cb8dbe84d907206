//! Persistence boundary for reception awareness

use super::record::{DeadLetter, ReceptionAwarenessRecord, ReceptionStatus};
use crate::error::MshError;
use crate::protocol::As4Message;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Record for message {message_id} changed concurrently (expected version {expected}, found {actual})")]
    VersionConflict {
        message_id: String,
        expected: u64,
        actual: u64,
    },

    #[error("No reception awareness record for message {0}")]
    NotFound(String),

    #[error("Message {0} is already tracked")]
    AlreadyTracked(String),
}

/// Records, outbox, receipts and dead letters
///
/// `commit` is the only way a poller changes a record: it applies the new
/// state only if the stored version still equals `expected_version`, so
/// concurrent pollers can never both act on the same snapshot. Registering a
/// receipt also bumps the version, which invalidates any snapshot taken
/// before the receipt arrived.
#[async_trait]
pub trait ReceptionAwarenessStore: Send + Sync {
    /// Start tracking `record`, keeping `message` for resends
    async fn track(
        &self,
        record: ReceptionAwarenessRecord,
        message: As4Message,
    ) -> Result<(), StoreError>;

    async fn record(&self, message_id: &str) -> Option<ReceptionAwarenessRecord>;

    /// Snapshot of every non-terminal record
    async fn active_records(&self) -> Vec<ReceptionAwarenessRecord>;

    /// Original outbound message still on the active send path
    async fn outbound_message(&self, message_id: &str) -> Option<As4Message>;

    /// Version-checked update
    ///
    /// A terminal status drops the outbox entry and the receipt; a dead
    /// letter is appended to the trail.
    async fn commit(
        &self,
        expected_version: u64,
        record: ReceptionAwarenessRecord,
        dead_letter: Option<DeadLetter>,
    ) -> Result<ReceptionAwarenessRecord, StoreError>;

    /// Note a receipt for `ref_to_message_id`
    ///
    /// Only receipts for tracked, non-terminal records are kept; returns
    /// whether one was.
    async fn register_receipt(&self, ref_to_message_id: &str) -> bool;

    async fn has_receipt(&self, message_id: &str) -> bool;

    /// Stop tracking a message regardless of its version
    ///
    /// A record that already has a receipt completes; any other active
    /// record is dead-lettered with `cause`. Returns `None` when the message
    /// is unknown or already terminal.
    async fn close(
        &self,
        message_id: &str,
        cause: &MshError,
    ) -> Result<Option<ReceptionAwarenessRecord>, StoreError>;

    async fn dead_letters(&self) -> Vec<DeadLetter>;
}

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<String, ReceptionAwarenessRecord>,
    outbox: HashMap<String, As4Message>,
    receipts: HashSet<String>,
    dead_letters: Vec<DeadLetter>,
}

impl Inner {
    fn release(&mut self, message_id: &str) {
        self.outbox.remove(message_id);
        self.receipts.remove(message_id);
    }
}

#[derive(Debug, Default)]
pub struct InMemoryReceptionAwarenessStore {
    inner: Mutex<Inner>,
}

impl InMemoryReceptionAwarenessStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReceptionAwarenessStore for InMemoryReceptionAwarenessStore {
    async fn track(
        &self,
        record: ReceptionAwarenessRecord,
        message: As4Message,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.records.contains_key(&record.message_id) {
            return Err(StoreError::AlreadyTracked(record.message_id));
        }
        inner.outbox.insert(record.message_id.clone(), message);
        inner.records.insert(record.message_id.clone(), record);
        Ok(())
    }

    async fn record(&self, message_id: &str) -> Option<ReceptionAwarenessRecord> {
        self.inner.lock().await.records.get(message_id).cloned()
    }

    async fn active_records(&self) -> Vec<ReceptionAwarenessRecord> {
        self.inner
            .lock()
            .await
            .records
            .values()
            .filter(|record| !record.status.is_terminal())
            .cloned()
            .collect()
    }

    async fn outbound_message(&self, message_id: &str) -> Option<As4Message> {
        self.inner.lock().await.outbox.get(message_id).cloned()
    }

    async fn commit(
        &self,
        expected_version: u64,
        record: ReceptionAwarenessRecord,
        dead_letter: Option<DeadLetter>,
    ) -> Result<ReceptionAwarenessRecord, StoreError> {
        let mut inner = self.inner.lock().await;
        let stored = inner
            .records
            .get_mut(&record.message_id)
            .ok_or_else(|| StoreError::NotFound(record.message_id.clone()))?;
        if stored.version != expected_version {
            return Err(StoreError::VersionConflict {
                message_id: record.message_id.clone(),
                expected: expected_version,
                actual: stored.version,
            });
        }

        *stored = ReceptionAwarenessRecord {
            version: expected_version + 1,
            ..record
        };
        let committed = stored.clone();

        if committed.status.is_terminal() {
            inner.release(&committed.message_id);
        }
        if let Some(dead_letter) = dead_letter {
            inner.dead_letters.push(dead_letter);
        }
        Ok(committed)
    }

    async fn register_receipt(&self, ref_to_message_id: &str) -> bool {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        match inner.records.get_mut(ref_to_message_id) {
            Some(record) if !record.status.is_terminal() => {
                record.version += 1;
                inner.receipts.insert(ref_to_message_id.to_string());
                true
            }
            _ => false,
        }
    }

    async fn has_receipt(&self, message_id: &str) -> bool {
        self.inner.lock().await.receipts.contains(message_id)
    }

    async fn close(
        &self,
        message_id: &str,
        cause: &MshError,
    ) -> Result<Option<ReceptionAwarenessRecord>, StoreError> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let acknowledged = inner.receipts.contains(message_id);
        let Some(stored) = inner.records.get_mut(message_id) else {
            return Ok(None);
        };
        if stored.status.is_terminal() {
            return Ok(None);
        }

        let dead_letter = (!acknowledged).then(|| DeadLetter::new(stored, cause));
        stored.status = if acknowledged {
            ReceptionStatus::Completed
        } else {
            ReceptionStatus::DeadLettered
        };
        stored.version += 1;
        let closed = stored.clone();

        inner.release(message_id);
        inner.dead_letters.extend(dead_letter);
        Ok(Some(closed))
    }

    async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.inner.lock().await.dead_letters.clone()
    }
}
