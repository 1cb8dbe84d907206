//! Reception awareness: retry-until-receipt for reliably sent UserMessages

pub mod agent;
pub mod engine;
pub mod interval;
pub mod record;
pub mod store;

pub use agent::{PollSummary, ReceptionAwarenessAgent};
pub use engine::{DeadLetterCause, Decision};
pub use interval::parse_retry_interval;
pub use record::{DeadLetter, ReceptionAwarenessRecord, ReceptionStatus};
pub use store::{InMemoryReceptionAwarenessStore, ReceptionAwarenessStore, StoreError};
