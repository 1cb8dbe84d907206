//! Predicate-gated branching between two step groups

use super::composite::CompositeStep;
use super::context::MessagingContext;
use super::step::{Step, StepResult};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Boolean test over a context, evaluated once per conditional execution
pub type Predicate = Arc<dyn Fn(&MessagingContext) -> bool + Send + Sync>;

/// Runs `then` when the predicate holds, `otherwise` when it does not
pub struct ConditionalStep {
    name: String,
    predicate: Predicate,
    then_branch: CompositeStep,
    else_branch: CompositeStep,
}

impl ConditionalStep {
    pub fn new(
        predicate_name: impl Into<String>,
        predicate: Predicate,
        then_branch: Vec<Box<dyn Step>>,
        else_branch: Vec<Box<dyn Step>>,
    ) -> Self {
        let predicate_name = predicate_name.into();
        Self {
            then_branch: CompositeStep::new(format!("{predicate_name}:then"), then_branch),
            else_branch: CompositeStep::new(format!("{predicate_name}:else"), else_branch),
            name: format!("if {predicate_name}"),
            predicate,
        }
    }
}

#[async_trait]
impl Step for ConditionalStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, context: MessagingContext) -> StepResult {
        let holds = (self.predicate)(&context);
        debug!(condition = %self.name, holds, "Condition evaluated");

        if holds {
            self.then_branch.execute(context).await
        } else {
            self.else_branch.execute(context).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::MessagingMode;
    use crate::protocol::As4Message;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Mark(&'static str);

    #[async_trait]
    impl Step for Mark {
        fn name(&self) -> &str {
            self.0
        }

        async fn execute(&self, mut context: MessagingContext) -> StepResult {
            context.message.body.push(crate::protocol::XmlElement::new(self.0));
            StepResult::success(context)
        }
    }

    fn branches() -> (Vec<Box<dyn Step>>, Vec<Box<dyn Step>>) {
        (vec![Box::new(Mark("then"))], vec![Box::new(Mark("else"))])
    }

    fn marks(result: &StepResult) -> Vec<&str> {
        result
            .context
            .message
            .body
            .iter()
            .map(|element| element.name.as_str())
            .collect()
    }

    #[tokio::test]
    async fn test_exactly_one_branch_runs() {
        for (holds, expected) in [(true, "then"), (false, "else")] {
            let (then_branch, else_branch) = branches();
            let step = ConditionalStep::new("test", Arc::new(move |_| holds), then_branch, else_branch);

            let result = step
                .execute(MessagingContext::new(As4Message::new(), MessagingMode::Receive))
                .await;
            assert!(result.succeeded);
            assert_eq!(marks(&result), vec![expected]);
        }
    }

    #[tokio::test]
    async fn test_predicate_evaluated_once() {
        let evaluations = Arc::new(AtomicUsize::new(0));
        let counter = evaluations.clone();
        let predicate: Predicate = Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        });
        let step = ConditionalStep::new("counted", predicate, Vec::new(), Vec::new());

        let result = step
            .execute(MessagingContext::new(As4Message::new(), MessagingMode::Send))
            .await;
        assert!(result.succeeded);
        assert_eq!(evaluations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_branch_is_noop() {
        let step = ConditionalStep::new("never", Arc::new(|_| false), vec![Box::new(Mark("then"))], Vec::new());
        let result = step
            .execute(MessagingContext::new(As4Message::new(), MessagingMode::Send))
            .await;
        assert!(result.succeeded);
        assert!(marks(&result).is_empty());
    }
}
