//! Planforge Core - per-plan build pipeline
//!
//! Turns assistant-generated file-change proposals into committed plan
//! results:
//! - Per-file build queues with batching and an at-most-one-active gate
//! - A streaming builder-model call that emits structured replacements
//! - Validation and ordered application of replacements with retries
//! - Serialized commits through the plan's repository write lock
//! - A per-plan event stream for progress and terminal outcomes

pub mod ai;
pub mod build;
pub mod config;
pub mod constants;
pub mod error;
pub mod plan;
pub mod storage;

// Re-exports for convenience
pub use ai::{BuilderModel, ModelClient};
pub use build::{apply_replacements, BuildPipeline, Replacement};
pub use config::{BuildConfig, ModelClientConfig};
pub use error::{ApiError, BuildError, QueueError};
pub use plan::{
    ActiveBuild, ActivePlan, ActivePlans, BuildInfo, PlanSubscription, RegisterPlanParams,
    StreamMessage,
};
pub use storage::{PlanStore, RepoVcs};
