//! Step abstraction

use super::context::MessagingContext;
use crate::error::MshError;
use async_trait::async_trait;

/// Outcome of one step; a failure carries its error in `context.error`
#[derive(Debug)]
pub struct StepResult {
    pub context: MessagingContext,
    pub succeeded: bool,
}

impl StepResult {
    pub fn success(context: MessagingContext) -> Self {
        Self {
            context,
            succeeded: true,
        }
    }

    pub fn failure(mut context: MessagingContext, error: impl Into<MshError>) -> Self {
        context.error = Some(error.into());
        Self {
            context,
            succeeded: false,
        }
    }
}

/// A unit of work over a [`MessagingContext`]
///
/// Steps report failures through [`StepResult::failure`] and never panic or
/// return early past the pipeline boundary.
#[async_trait]
pub trait Step: Send + Sync {
    /// Registry key or group name, used in logs and metrics
    fn name(&self) -> &str;

    async fn execute(&self, context: MessagingContext) -> StepResult;
}
