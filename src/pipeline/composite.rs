//! Ordered step sequence with short-circuiting

use super::context::MessagingContext;
use super::step::{Step, StepResult};
use crate::error::MshError;
use crate::observability::metrics;
use crate::step_span;
use async_trait::async_trait;
use std::time::Instant;
use tracing::{debug, Instrument};

/// Runs children in order, stopping at the first failure
pub struct CompositeStep {
    name: String,
    steps: Vec<Box<dyn Step>>,
}

impl CompositeStep {
    pub fn new(name: impl Into<String>, steps: Vec<Box<dyn Step>>) -> Self {
        Self {
            name: name.into(),
            steps,
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[async_trait]
impl Step for CompositeStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, context: MessagingContext) -> StepResult {
        let mut context = context;

        for step in &self.steps {
            if context.is_cancelled() {
                debug!(step = step.name(), "Cancelled before step");
                return StepResult::failure(context, MshError::cancelled(step.name()));
            }

            let span = step_span!(step = step.name());
            let started = Instant::now();
            let result = step.execute(context).instrument(span).await;
            metrics().step_executed(step.name(), started.elapsed(), result.succeeded);

            if !result.succeeded {
                debug!(group = %self.name, step = step.name(), "Step failed, stopping");
                return result;
            }
            context = result.context;
        }

        StepResult::success(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{CancellationSource, MessagingMode};
    use crate::protocol::As4Message;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingStep {
        name: &'static str,
        calls: Arc<AtomicUsize>,
        succeed: bool,
    }

    #[async_trait]
    impl Step for CountingStep {
        fn name(&self) -> &str {
            self.name
        }

        async fn execute(&self, context: MessagingContext) -> StepResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.succeed {
                StepResult::success(context)
            } else {
                StepResult::failure(context, MshError::step_execution(self.name, "refused"))
            }
        }
    }

    fn counting(name: &'static str, succeed: bool) -> (Box<dyn Step>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let step = CountingStep {
            name,
            calls: calls.clone(),
            succeed,
        };
        (Box::new(step), calls)
    }

    fn context() -> MessagingContext {
        MessagingContext::new(As4Message::new(), MessagingMode::Send)
    }

    #[tokio::test]
    async fn test_stops_at_first_failure() {
        let (first, first_calls) = counting("first", true);
        let (second, second_calls) = counting("second", false);
        let (third, third_calls) = counting("third", true);
        let composite = CompositeStep::new("group", vec![first, second, third]);

        let result = composite.execute(context()).await;

        assert!(!result.succeeded);
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);
        assert_eq!(third_calls.load(Ordering::SeqCst), 0);
        // The failing step's own result is what comes back
        assert!(matches!(
            result.context.error,
            Some(MshError::StepExecution { ref step, .. }) if step == "second"
        ));
    }

    #[tokio::test]
    async fn test_empty_composite_succeeds() {
        let composite = CompositeStep::new("empty", Vec::new());
        assert!(composite.is_empty());
        let result = composite.execute(context()).await;
        assert!(result.succeeded);
        assert!(result.context.error.is_none());
    }

    #[tokio::test]
    async fn test_cancellation_prevents_next_step() {
        let (first, first_calls) = counting("first", true);
        let composite = CompositeStep::new("group", vec![first]);
        let source = CancellationSource::new();
        source.cancel();

        let result = composite
            .execute(context().with_cancellation(source.signal()))
            .await;

        assert!(!result.succeeded);
        assert_eq!(first_calls.load(Ordering::SeqCst), 0);
        assert!(matches!(result.context.error, Some(MshError::Cancelled { .. })));
    }
}
