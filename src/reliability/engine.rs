//! Per-poll state transition of a reception awareness record

use super::interval::parse_retry_interval;
use super::record::{ReceptionAwarenessRecord, ReceptionStatus};
use crate::config::ConfigError;
use crate::error::MshError;
use chrono::{DateTime, Utc};

/// What a poll should do with one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// A receipt arrived: complete and stop tracking
    Complete,
    /// Claim the next attempt and resend the original message
    Resend,
    /// Retries exhausted or the record cannot be processed
    DeadLetter(DeadLetterCause),
    /// Nothing to do this poll
    Wait,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeadLetterCause {
    /// Every retry was spent without a receipt
    Exhausted,
    /// The configured retry interval does not parse
    InvalidInterval(String),
}

impl DeadLetterCause {
    pub fn to_error(&self, record: &ReceptionAwarenessRecord) -> MshError {
        match self {
            DeadLetterCause::Exhausted => MshError::ReliabilityExhausted {
                message_id: record.message_id.clone(),
                attempts: record.current_retry_count,
            },
            DeadLetterCause::InvalidInterval(reason) => ConfigError::InvalidRetryInterval {
                pmode_id: record.pmode_id.clone(),
                reason: reason.clone(),
            }
            .into(),
        }
    }
}

/// Pure transition function; the caller commits the outcome atomically
///
/// A record whose retries are spent dead-letters on the first poll without
/// a receipt; only resends wait for the interval.
pub fn evaluate(
    record: &ReceptionAwarenessRecord,
    receipt_received: bool,
    now: DateTime<Utc>,
) -> Decision {
    if record.status.is_terminal() {
        return Decision::Wait;
    }
    if receipt_received {
        return Decision::Complete;
    }

    let interval = match parse_retry_interval(&record.retry_interval) {
        Ok(interval) => interval,
        Err(reason) => return Decision::DeadLetter(DeadLetterCause::InvalidInterval(reason)),
    };
    if record.current_retry_count >= record.total_retry_count {
        return Decision::DeadLetter(DeadLetterCause::Exhausted);
    }

    if now - record.last_send_time < interval {
        Decision::Wait
    } else {
        Decision::Resend
    }
}

/// Record after claiming a resend attempt
///
/// The claim restarts the interval, so a poller that reads the record while
/// the send is in flight sees it as not yet due.
pub fn claim_resend(record: &ReceptionAwarenessRecord, claimed_at: DateTime<Utc>) -> ReceptionAwarenessRecord {
    ReceptionAwarenessRecord {
        current_retry_count: record.current_retry_count + 1,
        last_send_time: claimed_at,
        status: ReceptionStatus::ToBeRetried,
        ..record.clone()
    }
}

/// Record after the resend went out
pub fn mark_sent(record: &ReceptionAwarenessRecord, sent_at: DateTime<Utc>) -> ReceptionAwarenessRecord {
    ReceptionAwarenessRecord {
        last_send_time: sent_at,
        status: ReceptionStatus::Pending,
        ..record.clone()
    }
}

pub fn with_status(record: &ReceptionAwarenessRecord, status: ReceptionStatus) -> ReceptionAwarenessRecord {
    ReceptionAwarenessRecord {
        status,
        ..record.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pmode::ReceptionAwareness;
    use chrono::Duration;

    fn record(retries: u32, interval: &str, sent_ago: Duration) -> ReceptionAwarenessRecord {
        let settings = ReceptionAwareness {
            enabled: true,
            retry_count: retries,
            retry_interval: interval.to_string(),
        };
        ReceptionAwarenessRecord::new("m-1", "pm-1", &settings, Utc::now() - sent_ago)
    }

    #[test]
    fn test_receipt_completes_regardless_of_count() {
        let mut exhausted = record(2, "00:00:10", Duration::seconds(60));
        exhausted.current_retry_count = 2;
        assert_eq!(evaluate(&exhausted, true, Utc::now()), Decision::Complete);

        let fresh = record(2, "00:00:10", Duration::zero());
        assert_eq!(evaluate(&fresh, true, Utc::now()), Decision::Complete);
    }

    #[test]
    fn test_waits_until_interval_elapsed() {
        let recent = record(3, "00:01:00", Duration::seconds(10));
        assert_eq!(evaluate(&recent, false, Utc::now()), Decision::Wait);

        let due = record(3, "00:01:00", Duration::seconds(61));
        assert_eq!(evaluate(&due, false, Utc::now()), Decision::Resend);
    }

    #[test]
    fn test_exhausted_record_dead_letters_without_waiting() {
        let never_retried = record(0, "00:01:00", Duration::zero());
        assert_eq!(
            evaluate(&never_retried, false, Utc::now()),
            Decision::DeadLetter(DeadLetterCause::Exhausted)
        );

        let mut last_retry_just_sent = record(1, "5", Duration::zero());
        last_retry_just_sent.current_retry_count = 1;
        assert_eq!(
            evaluate(&last_retry_just_sent, false, Utc::now()),
            Decision::DeadLetter(DeadLetterCause::Exhausted)
        );
    }

    #[test]
    fn test_invalid_interval_dead_letters() {
        let broken = record(3, "soon", Duration::zero());
        match evaluate(&broken, false, Utc::now()) {
            Decision::DeadLetter(cause @ DeadLetterCause::InvalidInterval(_)) => {
                let error = cause.to_error(&broken);
                assert_eq!(error.category(), "configuration");
                assert!(error.to_string().contains("pm-1"));
            }
            other => panic!("unexpected decision {other:?}"),
        }
    }

    #[test]
    fn test_exhaustion_maps_to_reliability_error() {
        let mut exhausted = record(2, "0", Duration::zero());
        exhausted.current_retry_count = 2;
        let error = DeadLetterCause::Exhausted.to_error(&exhausted);
        assert!(matches!(
            error,
            MshError::ReliabilityExhausted { ref message_id, attempts: 2 } if message_id == "m-1"
        ));
        assert_eq!(error.category(), "reliability_exhausted");
    }

    #[test]
    fn test_terminal_records_are_untouched() {
        let done = with_status(&record(3, "0", Duration::seconds(5)), ReceptionStatus::Completed);
        assert_eq!(evaluate(&done, true, Utc::now()), Decision::Wait);
        let dead = with_status(&done, ReceptionStatus::DeadLettered);
        assert_eq!(evaluate(&dead, false, Utc::now()), Decision::Wait);
    }

    #[test]
    fn test_claim_then_mark_sent() {
        let original = record(3, "0", Duration::seconds(5));
        let claimed = claim_resend(&original, Utc::now());
        assert_eq!(claimed.current_retry_count, 1);
        assert_eq!(claimed.status, ReceptionStatus::ToBeRetried);
        assert!(claimed.last_send_time > original.last_send_time);

        let now = Utc::now();
        let sent = mark_sent(&claimed, now);
        assert_eq!(sent.status, ReceptionStatus::Pending);
        assert_eq!(sent.last_send_time, now);
        assert_eq!(sent.current_retry_count, 1);
    }
}
