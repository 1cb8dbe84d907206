//! AS4 Message Service Handler core
//!
//! The processing core of an AS4 (ebMS 3.0) message service handler:
//! - Step pipelines composed from declarative configuration
//! - PMode resolution by weighted rule scoring
//! - WS-Security signing, verification, encryption and decryption of
//!   SOAP-with-attachments messages
//! - Reception awareness: retry and dead-lettering of unacknowledged
//!   UserMessages
//!
//! # Quick Start
//!
//! ```rust
//! use as4msh::pipeline::{
//!     MessagingContext, MessagingMode, Pipeline, PipelineConfig, Step, StepRegistry, StepResult,
//! };
//! use as4msh::protocol::As4Message;
//! use async_trait::async_trait;
//!
//! struct Stamp;
//!
//! #[async_trait]
//! impl Step for Stamp {
//!     fn name(&self) -> &str {
//!         "stamp"
//!     }
//!
//!     async fn execute(&self, context: MessagingContext) -> StepResult {
//!         StepResult::success(context)
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let config: PipelineConfig = toml::from_str(
//!     r#"steps = [
//!         { type = "stamp" },
//!         { condition = "is_user_message", then = [{ type = "stamp" }] },
//!     ]"#,
//! )
//! .unwrap();
//!
//! let mut registry = StepRegistry::new();
//! registry
//!     .register_step("stamp", || Box::new(Stamp))
//!     .register_predicate("is_user_message", |ctx: &MessagingContext| {
//!         ctx.message.is_user_message()
//!     });
//!
//! let pipeline = Pipeline::build("demo", &registry, &config.steps).unwrap();
//! let result = pipeline
//!     .run(MessagingContext::new(As4Message::new(), MessagingMode::Receive))
//!     .await;
//! assert!(result.succeeded);
//! # }
//! ```

pub mod config;
pub mod error;
pub mod msh;
pub mod observability;
pub mod pipeline;
pub mod pmode;
pub mod protocol;
pub mod reliability;
pub mod security;
pub mod steps;
pub mod testing;
pub mod transport;

pub use config::{ConfigError, MshConfig};
pub use error::{MshError, MshResult};
pub use msh::MessageServiceHandler;
pub use pipeline::{MessagingContext, MessagingMode, Pipeline, PipelineSet, Step, StepResult};
pub use pmode::{PModeStore, ReceivingPMode, SendingPMode};
pub use protocol::As4Message;
pub use reliability::{ReceptionAwarenessAgent, ReceptionAwarenessStore};
