//! Commit coordination
//!
//! File results are serialized through the plan's repository write lock:
//! store under the lock, clear uncommitted changes if the store fails, and
//! always release. The finalizer runs once per plan turn, after every queued
//! file has a terminal result, and amends the plan's HEAD commit.

use std::sync::Arc;

use tracing::{error, info};

use super::{BatchOutcome, BuildPipeline};
use crate::error::BuildError;
use crate::plan::active::{ActiveBuild, ActivePlan};
use crate::plan::events::StreamMessage;
use crate::storage::types::{
    CurrentPlanStateParams, LockRepoParams, LockScope, PlanBuild, PlanFileResult,
};

impl BuildPipeline {
    /// Persist one file result under the plan's repository write lock.
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn commit_file(
        &self,
        plan: &Arc<ActivePlan>,
        org_id: &str,
        user_id: &str,
        path: &str,
        batch: &[Arc<ActiveBuild>],
        build: &PlanBuild,
        result: PlanFileResult,
    ) -> BatchOutcome {
        info!("Committing build result for file {}", path);

        let lock_id = match self
            .repo()
            .lock_repo(LockRepoParams {
                org_id: org_id.to_string(),
                user_id: user_id.to_string(),
                plan_id: plan.plan_id.clone(),
                branch: plan.branch.clone(),
                plan_build_id: build.id.clone(),
                scope: LockScope::Write,
            })
            .await
        {
            Ok(lock_id) => lock_id,
            Err(e) => {
                error!("Error locking repo for build file: {e:#}");
                plan.send_done(BuildError::LockRepo(e).into());
                plan.update(|state| {
                    state.is_building_by_path.insert(path.to_string(), false);
                });
                return BatchOutcome::Stopped;
            }
        };

        let store_result = self.store().store_plan_result(&result).await;
        let store_failed = store_result.is_err();
        if let Err(e) = store_result {
            error!("Error storing plan result: {e:#}");
            plan.send_done(BuildError::StoreResult(e).into());
            if let Err(clear_err) = self
                .repo()
                .git_clear_uncommitted_changes(org_id, &plan.plan_id)
                .await
            {
                error!("Error clearing uncommitted changes: {clear_err:#}");
            }
        }

        if let Err(e) = self.repo().unlock_repo(lock_id).await {
            error!("Error unlocking repo: {e:#}");
        }

        if store_failed {
            plan.update(|state| {
                state.is_building_by_path.insert(path.to_string(), false);
            });
            return BatchOutcome::Stopped;
        }

        for active_build in batch {
            active_build.mark_success();
        }
        BatchOutcome::Committed
    }

    /// One-shot plan finalizer: amend the plan's commit from a fresh read of
    /// pending changes, then signal `Finished` if the planner is also done.
    pub(crate) async fn finish_build(&self, plan: &Arc<ActivePlan>, org_id: &str) {
        info!("Build finished for plan {}", plan.plan_id);

        let current_plan = match self
            .store()
            .get_current_plan_state(CurrentPlanStateParams {
                org_id: org_id.to_string(),
                plan_id: plan.plan_id.clone(),
            })
            .await
        {
            Ok(current_plan) => current_plan,
            Err(e) => {
                error!("Error getting current plan state: {e:#}");
                plan.send_done(BuildError::GetPlanState(e).into());
                return;
            }
        };

        if let Err(e) = self
            .repo()
            .git_add_and_amend_commit(
                org_id,
                &plan.plan_id,
                &plan.branch,
                current_plan.pending_changes_summary(),
            )
            .await
        {
            error!("Error committing plan build: {e:#}");
            plan.send_done(BuildError::Commit(e).into());
            return;
        }

        if plan.replies_finished() {
            plan.send(StreamMessage::Finished);
        }
    }
}
