//! Composable step pipelines
//!
//! A pipeline is a tree of [`Step`]s built once from declarative
//! configuration through a [`StepRegistry`]. Each run moves one
//! [`MessagingContext`] through the tree by value; the first failing step
//! ends the run and its [`StepResult`] is returned as-is.

pub mod builder;
pub mod cancellation;
pub mod composite;
pub mod conditional;
pub mod context;
pub mod executor;
pub mod registry;
pub mod step;

pub use builder::{build_steps, build_tree, PipelineConfig, StepConfiguration};
pub use cancellation::{CancellationSignal, CancellationSource};
pub use composite::CompositeStep;
pub use conditional::{ConditionalStep, Predicate};
pub use context::{MessagingContext, MessagingMode};
pub use executor::{Pipeline, PipelineSet};
pub use registry::{parse_settings, StepFactory, StepRegistry, StepSettings};
pub use step::{Step, StepResult};
