//! Background poller driving reception awareness records
//!
//! Every poll snapshots the active records and processes them concurrently.
//! All state changes go through [`ReceptionAwarenessStore::commit`], so two
//! agents polling the same store never resend or dead-letter a record twice.
//! A receipt registered after the snapshot bumps the record's version, so the
//! stale decision fails to commit and the next poll completes the record.

use super::engine::{self, Decision};
use super::record::{DeadLetter, ReceptionAwarenessRecord, ReceptionStatus};
use super::store::{ReceptionAwarenessStore, StoreError};
use crate::config::ConfigError;
use crate::error::MshError;
use crate::observability::metrics;
use crate::pipeline::CancellationSignal;
use crate::pmode::PModeStore;
use crate::protocol::{As4Message, MessageUnit};
use crate::reliability_span;
use crate::transport::MessageSender;
use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn, Instrument};

/// Aggregated outcome of one poll
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub completed: usize,
    pub resent: usize,
    pub dead_lettered: usize,
    /// Records another poller changed first
    pub conflicts: usize,
    pub unchanged: usize,
}

impl PollSummary {
    fn add(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Completed => self.completed += 1,
            Outcome::Resent => self.resent += 1,
            Outcome::DeadLettered => self.dead_lettered += 1,
            Outcome::Conflict => self.conflicts += 1,
            Outcome::Unchanged => self.unchanged += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Completed,
    Resent,
    DeadLettered,
    Conflict,
    Unchanged,
}

pub struct ReceptionAwarenessAgent {
    store: Arc<dyn ReceptionAwarenessStore>,
    pmodes: Arc<PModeStore>,
    sender: Arc<dyn MessageSender>,
    poll_interval: Duration,
}

impl ReceptionAwarenessAgent {
    pub fn new(
        store: Arc<dyn ReceptionAwarenessStore>,
        pmodes: Arc<PModeStore>,
        sender: Arc<dyn MessageSender>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            pmodes,
            sender,
            poll_interval,
        }
    }

    /// Poll until `signal` fires; an in-flight poll is finished, not aborted
    pub async fn run(&self, signal: CancellationSignal) {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Reception awareness agent started"
        );

        loop {
            tokio::select! {
                _ = signal.cancelled() => {
                    info!("Reception awareness agent stopping");
                    break;
                }
                _ = interval.tick() => {
                    self.poll_once(&signal).await;
                }
            }
        }
    }

    /// Process every active record once
    pub async fn poll_once(&self, signal: &CancellationSignal) -> PollSummary {
        let records = self.store.active_records().await;
        let span = reliability_span!(records = records.len());

        async {
            let outcomes = join_all(
                records
                    .into_iter()
                    .map(|record| self.process(record, signal)),
            )
            .await;

            let summary = outcomes.into_iter().fold(PollSummary::default(), |mut acc, outcome| {
                acc.add(outcome);
                acc
            });
            metrics().poll_completed();
            debug!(?summary, "Reception awareness poll finished");
            summary
        }
        .instrument(span)
        .await
    }

    async fn process(&self, record: ReceptionAwarenessRecord, signal: &CancellationSignal) -> Outcome {
        let receipt_received = self.store.has_receipt(&record.message_id).await;

        match engine::evaluate(&record, receipt_received, Utc::now()) {
            Decision::Wait => Outcome::Unchanged,
            Decision::Complete => {
                let completed = engine::with_status(&record, ReceptionStatus::Completed);
                match self.store.commit(record.version, completed, None).await {
                    Ok(_) => {
                        info!(message_id = %record.message_id, "Receipt received, tracking completed");
                        metrics().record_completed();
                        Outcome::Completed
                    }
                    Err(e) => self.commit_failed(&record, e),
                }
            }
            Decision::DeadLetter(cause) => {
                let error = cause.to_error(&record);
                self.dead_letter(&record, error).await
            }
            Decision::Resend => self.resend(record, signal).await,
        }
    }

    async fn resend(&self, record: ReceptionAwarenessRecord, signal: &CancellationSignal) -> Outcome {
        if signal.is_cancelled() {
            return Outcome::Unchanged;
        }

        let Some(pmode) = self.pmodes.sending(&record.pmode_id) else {
            let error = ConfigError::MissingPMode {
                referenced_by: format!("reception awareness record {}", record.message_id),
                pmode_id: record.pmode_id.clone(),
            };
            return self.dead_letter(&record, error.into()).await;
        };

        // Claim the attempt before sending so a concurrent poller backs off
        let claimed = match self
            .store
            .commit(record.version, engine::claim_resend(&record, Utc::now()), None)
            .await
        {
            Ok(claimed) => claimed,
            Err(e) => return self.commit_failed(&record, e),
        };

        let Some(message) = self.store.outbound_message(&claimed.message_id).await else {
            let error = MshError::step_execution(
                "reception_awareness.resend",
                "original message no longer available",
            );
            return self.dead_letter(&claimed, error).await;
        };

        match self.sender.send(&message, &pmode).await {
            Ok(reply) => {
                metrics().message_sent();
                if let Some(reply) = reply {
                    self.absorb_reply(&reply).await;
                }
            }
            Err(e) => {
                // The attempt still counts; the next poll decides again
                metrics().send_failed();
                warn!(
                    message_id = %claimed.message_id,
                    attempt = claimed.current_retry_count,
                    error = %e,
                    "Resend failed"
                );
            }
        }

        metrics().message_resent();
        info!(
            message_id = %claimed.message_id,
            attempt = claimed.current_retry_count,
            max_attempts = claimed.total_retry_count,
            "Message resent"
        );

        // A receipt absorbed from the reply has already bumped the version;
        // the next poll completes the claimed record
        if let Err(e) = self
            .store
            .commit(claimed.version, engine::mark_sent(&claimed, Utc::now()), None)
            .await
        {
            debug!(message_id = %claimed.message_id, error = %e, "Send time not recorded");
        }
        Outcome::Resent
    }

    async fn dead_letter(&self, record: &ReceptionAwarenessRecord, cause: MshError) -> Outcome {
        let letter = DeadLetter::new(record, &cause);
        let dead = engine::with_status(record, ReceptionStatus::DeadLettered);

        match self.store.commit(record.version, dead, Some(letter)).await {
            Ok(_) => {
                error!(
                    message_id = %record.message_id,
                    pmode_id = %record.pmode_id,
                    attempts = record.current_retry_count,
                    category = cause.category(),
                    error = %cause,
                    "Message dead-lettered"
                );
                metrics().record_dead_lettered();
                Outcome::DeadLettered
            }
            Err(e) => self.commit_failed(record, e),
        }
    }

    /// Register receipts from a synchronous reply
    async fn absorb_reply(&self, reply: &As4Message) {
        for unit in &reply.message_units {
            let Some(ref_to) = unit.message_info().ref_to_message_id.as_deref() else {
                continue;
            };
            match unit {
                MessageUnit::Receipt(_) => {
                    self.store.register_receipt(ref_to).await;
                }
                MessageUnit::Error(signal) => {
                    warn!(
                        ref_to_message_id = ref_to,
                        errors = signal.errors.len(),
                        "Partner returned an error signal"
                    );
                }
                MessageUnit::User(_) => {}
            }
        }
    }

    fn commit_failed(&self, record: &ReceptionAwarenessRecord, e: StoreError) -> Outcome {
        match e {
            StoreError::VersionConflict { .. } => {
                debug!(message_id = %record.message_id, "Record changed by another poller");
                metrics().commit_conflict();
                Outcome::Conflict
            }
            other => {
                warn!(message_id = %record.message_id, error = %other, "Could not commit record");
                Outcome::Unchanged
            }
        }
    }
}
