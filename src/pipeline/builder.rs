//! Declarative step configuration and the pipeline builder
//!
//! ```toml
//! [pipelines.receive]
//! steps = [
//!     { type = "receive.determine_pmodes" },
//!     { type = "receive.verify_signature", settings = { allow_unknown_root_authority = false } },
//!     { condition = "is_user_message", then = [{ type = "receive.create_receipt" }], else = [] },
//! ]
//! ```

use super::composite::CompositeStep;
use super::conditional::ConditionalStep;
use super::registry::{StepRegistry, StepSettings};
use super::step::Step;
use crate::config::ConfigError;
use serde::{Deserialize, Serialize};

/// One entry of a pipeline definition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum StepConfiguration {
    /// Group run only when `condition` holds, `else` otherwise
    Conditional {
        condition: String,
        #[serde(default)]
        then: Vec<StepConfiguration>,
        #[serde(default, rename = "else")]
        otherwise: Vec<StepConfiguration>,
    },
    /// A registered step, with optional settings
    Step {
        #[serde(rename = "type")]
        step_type: String,
        #[serde(default, skip_serializing_if = "StepSettings::is_empty")]
        settings: StepSettings,
    },
}

impl StepConfiguration {
    pub fn step(step_type: impl Into<String>) -> Self {
        Self::Step {
            step_type: step_type.into(),
            settings: StepSettings::new(),
        }
    }

    pub fn with_settings(step_type: impl Into<String>, settings: StepSettings) -> Self {
        Self::Step {
            step_type: step_type.into(),
            settings,
        }
    }

    pub fn conditional(
        condition: impl Into<String>,
        then: Vec<StepConfiguration>,
        otherwise: Vec<StepConfiguration>,
    ) -> Self {
        Self::Conditional {
            condition: condition.into(),
            then,
            otherwise,
        }
    }
}

/// `[pipelines.<name>]` table
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    #[serde(default)]
    pub steps: Vec<StepConfiguration>,
}

/// Build the configured steps in order
///
/// Every key, predicate and setting is checked here, so a pipeline that
/// builds never fails on configuration while processing messages.
pub fn build_steps(
    registry: &StepRegistry,
    configurations: &[StepConfiguration],
) -> Result<Vec<Box<dyn Step>>, ConfigError> {
    configurations
        .iter()
        .map(|configuration| build_step(registry, configuration))
        .collect()
}

/// Build the configured steps composed into one tree
pub fn build_tree(
    registry: &StepRegistry,
    name: &str,
    configurations: &[StepConfiguration],
) -> Result<CompositeStep, ConfigError> {
    Ok(CompositeStep::new(name, build_steps(registry, configurations)?))
}

fn build_step(
    registry: &StepRegistry,
    configuration: &StepConfiguration,
) -> Result<Box<dyn Step>, ConfigError> {
    match configuration {
        StepConfiguration::Step {
            step_type,
            settings,
        } => registry.create_step(step_type, settings),
        StepConfiguration::Conditional {
            condition,
            then,
            otherwise,
        } => {
            let predicate = registry.predicate(condition)?;
            Ok(Box::new(ConditionalStep::new(
                condition.clone(),
                predicate,
                build_steps(registry, then)?,
                build_steps(registry, otherwise)?,
            )))
        }
    }
}
