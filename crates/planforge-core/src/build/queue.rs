//! Per-file build queue and dispatcher
//!
//! `queue_build` appends to the path's FIFO and claims the path gate in the
//! same state update; whoever claims it owns the dispatcher loop for that
//! path until the queue drains. Batches of up to five not-yet-finished builds
//! are merged into one model call.

use std::path::Path;
use std::sync::Arc;

use tokio::join;
use tracing::{debug, error, info};

use super::{BatchOutcome, BuildPipeline};
use crate::constants;
use crate::error::{BuildError, QueueError};
use crate::plan::active::{ActiveBuild, ActivePlan};
use crate::plan::events::{BuildInfo, StreamMessage};
use crate::storage::types::{CurrentPlanStateParams, PlanBuild};

impl BuildPipeline {
    /// Queue one build for its path. Returns immediately; the build runs on a
    /// spawned task and reports through the plan's event channels.
    pub fn queue_build(
        self: &Arc<Self>,
        org_id: &str,
        user_id: &str,
        plan_id: &str,
        branch: &str,
        active_build: ActiveBuild,
    ) -> Result<(), QueueError> {
        if Path::new(&active_build.path).is_absolute() {
            return Err(QueueError::AbsolutePath(active_build.path));
        }
        let plan = self
            .plans()
            .get(plan_id, branch)
            .ok_or_else(|| QueueError::PlanNotFound {
                plan_id: plan_id.to_string(),
                branch: branch.to_string(),
            })?;

        let active_build = Arc::new(active_build);
        let path = active_build.path.clone();

        // Append and claim the gate in one update, so exactly one dispatcher
        // ever starts per path.
        let claimed = plan.update(|state| {
            state
                .build_queues_by_path
                .entry(path.clone())
                .or_default()
                .push(Arc::clone(&active_build));
            if state.is_building(&path) {
                false
            } else {
                state.is_building_by_path.insert(path.clone(), true);
                true
            }
        });

        debug!("Queued build for file {}", path);

        if !claimed {
            debug!("Already building file {}", path);
            return Ok(());
        }

        debug!("Will process build queue for file {}", path);
        let pipeline = Arc::clone(self);
        let org_id = org_id.to_string();
        let user_id = user_id.to_string();
        tokio::spawn(async move {
            pipeline.run_path(plan, org_id, user_id, path).await;
        });
        Ok(())
    }

    /// Dispatcher loop for one path: runs batches until every queued build on
    /// the path is finished, the plan finishes, or a batch stops the path.
    /// The gate is held across the whole loop and released in the same update
    /// that finds the path finished, so a concurrent enqueue either lands in
    /// a drawn batch or claims the gate itself.
    async fn run_path(
        self: Arc<Self>,
        plan: Arc<ActivePlan>,
        org_id: String,
        user_id: String,
        path: String,
    ) {
        loop {
            let (batch, finished) = plan.update(|state| {
                if state.path_finished(&path) {
                    state.is_building_by_path.insert(path.clone(), false);
                    return (Vec::new(), state.build_finished());
                }
                let batch: Vec<Arc<ActiveBuild>> = state
                    .build_queues_by_path
                    .get(&path)
                    .map(|queue| {
                        queue
                            .iter()
                            .filter(|b| !b.build_finished())
                            .take(constants::build::MAX_BATCH_SIZE)
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default();
                (batch, false)
            });

            if batch.is_empty() {
                info!("Finished building file {}", path);
                if finished {
                    info!("Finished building plan");
                    self.finish_build(&plan, &org_id).await;
                }
                return;
            }

            debug!("Processing batch of {} build(s) for file {}", batch.len(), path);
            match self
                .exec_batch(&plan, &org_id, &user_id, &path, &batch)
                .await
            {
                BatchOutcome::Committed => {
                    plan.update(|state| {
                        state.built_files.insert(path.clone());
                    });
                }
                BatchOutcome::Stopped => return,
            }
        }
    }

    /// Run one batch: preflight, then the build-file state machine.
    async fn exec_batch(
        &self,
        plan: &Arc<ActivePlan>,
        org_id: &str,
        user_id: &str,
        path: &str,
        batch: &[Arc<ActiveBuild>],
    ) -> BatchOutcome {
        plan.send(StreamMessage::BuildInfo(BuildInfo {
            path: path.to_string(),
            num_tokens: 0,
            finished: false,
        }));

        // Deduplicated union of assistant message ids, first-seen order.
        let mut convo_message_ids: Vec<String> = Vec::new();
        for active_build in batch {
            if !convo_message_ids.contains(&active_build.assistant_message_id) {
                convo_message_ids.push(active_build.assistant_message_id.clone());
            }
        }

        let build = PlanBuild::new(org_id, &plan.plan_id, convo_message_ids, path);

        let (store_res, state_res) = join!(
            self.store().store_plan_build(&build),
            self.store().get_current_plan_state(CurrentPlanStateParams {
                org_id: org_id.to_string(),
                plan_id: plan.plan_id.clone(),
            })
        );

        let current_plan = match (store_res, state_res) {
            (Err(e), _) => {
                return self.preflight_failed(plan, path, BuildError::StorePlanBuild(e))
            }
            (_, Err(e)) => return self.preflight_failed(plan, path, BuildError::GetPlanState(e)),
            (Ok(()), Ok(current_plan)) => current_plan,
        };

        self.build_file(plan, org_id, user_id, path, batch, &build, &current_plan)
            .await
    }

    fn preflight_failed(&self, plan: &Arc<ActivePlan>, path: &str, err: BuildError) -> BatchOutcome {
        error!("Error building plan {}: {}", plan.plan_id, err);
        plan.update(|state| {
            state.is_building_by_path.insert(path.to_string(), false);
        });
        plan.send_done(err.into());
        BatchOutcome::Stopped
    }
}
