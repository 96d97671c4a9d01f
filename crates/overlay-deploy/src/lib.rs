//! # Overlay Deploy
//!
//! Turns an overlay's annotated resources into live infrastructure through
//! an external emitter and a plan/apply executor, converging on repeated runs.

pub mod deploy;
pub mod emitter;
pub mod executor;
pub mod retry;

pub use deploy::{DeployPipeline, DeployRequest};
pub use emitter::{CommandEmitter, Emitter, GenerateOptions, ResourceRef};
pub use executor::{ApplySummary, Executor, ExecutorError, PlanSummary, TerraformExecutor};
pub use retry::{RetryFailure, RetryPolicy};
