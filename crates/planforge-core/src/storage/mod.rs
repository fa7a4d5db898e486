//! Storage contracts for the build pipeline

pub mod traits;
pub mod types;

pub use traits::{PlanStore, RepoVcs};
pub use types::{
    Context, CurrentPlanState, CurrentPlanStateParams, LockId, LockRepoParams, LockScope,
    PlanBuild, PlanFileResult,
};
