//! Outbound persistence contracts
//!
//! The plan store, the repository lock manager, and the version-control
//! commit primitive are external collaborators; the pipeline consumes them
//! through these seams.

use anyhow::Result;
use async_trait::async_trait;

use super::types::{
    CurrentPlanState, CurrentPlanStateParams, LockId, LockRepoParams, PlanBuild, PlanFileResult,
};

/// Persistence for build rows and file results
#[async_trait]
pub trait PlanStore: Send + Sync {
    /// Create a `PlanBuild` row
    async fn store_plan_build(&self, build: &PlanBuild) -> Result<()>;

    /// Fetch all pending file bodies accumulated this turn
    async fn get_current_plan_state(
        &self,
        params: CurrentPlanStateParams,
    ) -> Result<CurrentPlanState>;

    /// Append one file result
    async fn store_plan_result(&self, result: &PlanFileResult) -> Result<()>;

    /// Record a terminal build error on the build row
    async fn set_build_error(&self, build: &PlanBuild) -> Result<()>;
}

/// Repository lock manager and commit primitive
#[async_trait]
pub trait RepoVcs: Send + Sync {
    async fn lock_repo(&self, params: LockRepoParams) -> Result<LockId>;

    async fn unlock_repo(&self, lock_id: LockId) -> Result<()>;

    /// Amend the plan's HEAD commit with `message`
    async fn git_add_and_amend_commit(
        &self,
        org_id: &str,
        plan_id: &str,
        branch: &str,
        message: &str,
    ) -> Result<()>;

    /// Drop any uncommitted changes left by a failed store
    async fn git_clear_uncommitted_changes(&self, org_id: &str, plan_id: &str) -> Result<()>;
}
