//! Named pipelines built once at startup

use super::builder::{build_tree, PipelineConfig, StepConfiguration};
use super::composite::CompositeStep;
use super::context::MessagingContext;
use super::registry::StepRegistry;
use super::step::{Step, StepResult};
use crate::config::ConfigError;
use crate::error::MshError;
use crate::observability::metrics;
use crate::pipeline_span;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{info, warn, Instrument};

/// A built step tree and the only entry point for running a context through it
pub struct Pipeline {
    name: String,
    root: CompositeStep,
}

impl Pipeline {
    pub fn new(root: CompositeStep) -> Self {
        Self {
            name: root.name().to_string(),
            root,
        }
    }

    pub fn build(
        name: &str,
        registry: &StepRegistry,
        steps: &[StepConfiguration],
    ) -> Result<Self, ConfigError> {
        Ok(Self::new(build_tree(registry, name, steps)?))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of top-level steps
    pub fn len(&self) -> usize {
        self.root.len()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    pub async fn run(&self, context: MessagingContext) -> StepResult {
        let span = pipeline_span!(
            pipeline = %self.name,
            message_id = context.message_id().unwrap_or_default(),
            mode = ?context.mode
        );

        async {
            metrics().pipeline_started();
            let started = Instant::now();
            let result = self.root.execute(context).await;
            let elapsed = started.elapsed();

            if result.succeeded {
                metrics().pipeline_succeeded(elapsed);
                info!(duration_ms = elapsed.as_millis() as u64, "Pipeline completed");
            } else {
                metrics().pipeline_failed(elapsed);
                match &result.context.error {
                    Some(MshError::Cancelled { step }) => {
                        metrics().pipeline_cancelled();
                        info!(step = %step, "Pipeline cancelled");
                    }
                    Some(error) => warn!(
                        category = error.category(),
                        error = %error,
                        duration_ms = elapsed.as_millis() as u64,
                        "Pipeline failed"
                    ),
                    None => warn!("Pipeline failed without an error"),
                }
            }
            result
        }
        .instrument(span)
        .await
    }
}

/// Every configured pipeline, keyed by name
#[derive(Default)]
pub struct PipelineSet {
    pipelines: BTreeMap<String, Pipeline>,
}

impl PipelineSet {
    /// Build all pipelines, failing on the first configuration error
    pub fn build(
        registry: &StepRegistry,
        configs: &BTreeMap<String, PipelineConfig>,
    ) -> Result<Self, ConfigError> {
        let pipelines = configs
            .iter()
            .map(|(name, config)| {
                Pipeline::build(name, registry, &config.steps).map(|p| (name.clone(), p))
            })
            .collect::<Result<BTreeMap<_, _>, _>>()?;

        info!(
            pipelines = pipelines.len(),
            names = ?pipelines.keys().collect::<Vec<_>>(),
            "Pipelines built"
        );
        Ok(Self { pipelines })
    }

    pub fn get(&self, name: &str) -> Option<&Pipeline> {
        self.pipelines.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.pipelines.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    pub async fn run(&self, name: &str, context: MessagingContext) -> Result<StepResult, ConfigError> {
        let pipeline = self
            .get(name)
            .ok_or_else(|| ConfigError::MissingPipeline(name.to_string()))?;
        Ok(pipeline.run(context).await)
    }
}
