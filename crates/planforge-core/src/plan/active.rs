//! In-memory per-plan build state
//!
//! An `ActivePlan` lives in the `ActivePlans` registry for the duration of a
//! plan turn, keyed by `(plan_id, branch)`. All mutable state sits behind a
//! single lock and is touched only through `update`, so queue, gate, and
//! built-file transitions observed by one closure are consistent.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ApiError;
use crate::plan::events::{plan_channels, PlanSubscription, StreamMessage};
use crate::storage::types::Context;

/// One queued unit of build work for one file
#[derive(Debug)]
pub struct ActiveBuild {
    /// Logical file path within the plan
    pub path: String,
    /// Assistant message this build derives from
    pub assistant_message_id: String,
    /// Assistant-authored change description for this file
    pub reply_content: String,
    /// Pre-rendered literal content, used only when the file does not exist
    pub file_content: String,
    outcome: Mutex<BuildOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum BuildOutcome {
    Pending,
    Succeeded,
    Failed(String),
}

impl ActiveBuild {
    pub fn new(
        path: impl Into<String>,
        assistant_message_id: impl Into<String>,
        reply_content: impl Into<String>,
        file_content: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            assistant_message_id: assistant_message_id.into(),
            reply_content: reply_content.into(),
            file_content: file_content.into(),
            outcome: Mutex::new(BuildOutcome::Pending),
        }
    }

    pub fn mark_success(&self) {
        *self.outcome.lock() = BuildOutcome::Succeeded;
    }

    pub fn mark_error(&self, msg: impl Into<String>) {
        *self.outcome.lock() = BuildOutcome::Failed(msg.into());
    }

    /// True once a terminal outcome is set
    pub fn build_finished(&self) -> bool {
        *self.outcome.lock() != BuildOutcome::Pending
    }

    pub fn succeeded(&self) -> bool {
        *self.outcome.lock() == BuildOutcome::Succeeded
    }

    pub fn error(&self) -> Option<String> {
        match &*self.outcome.lock() {
            BuildOutcome::Failed(msg) => Some(msg.clone()),
            _ => None,
        }
    }
}

/// Mutable per-plan state, reached only through `ActivePlan::update`
#[derive(Default)]
pub struct PlanState {
    pub build_queues_by_path: HashMap<String, Vec<Arc<ActiveBuild>>>,
    pub is_building_by_path: HashMap<String, bool>,
    pub built_files: HashSet<String>,
    pub contexts_by_path: HashMap<String, Context>,
    pub replies_finished: bool,
}

impl PlanState {
    pub fn is_building(&self, path: &str) -> bool {
        self.is_building_by_path.get(path).copied().unwrap_or(false)
    }

    /// True when every build queued for `path` has a terminal outcome
    pub fn path_finished(&self, path: &str) -> bool {
        self.build_queues_by_path
            .get(path)
            .map(|queue| queue.iter().all(|b| b.build_finished()))
            .unwrap_or(true)
    }

    /// True when every path that ever entered a queue is built, its gate is
    /// clear, and no queued build is still pending
    pub fn build_finished(&self) -> bool {
        self.build_queues_by_path.iter().all(|(path, queue)| {
            self.built_files.contains(path)
                && !self.is_building(path)
                && queue.iter().all(|b| b.build_finished())
        })
    }
}

/// Per-plan runtime handle: identity, cancellation, and event channels
pub struct ActivePlan {
    pub plan_id: String,
    pub branch: String,
    /// The original user prompt for this plan turn
    pub prompt: String,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<StreamMessage>,
    stream_done: mpsc::UnboundedSender<ApiError>,
    state: Mutex<PlanState>,
}

impl ActivePlan {
    /// Cancellation token covering the entire plan run
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Cancel the plan run
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Push a message to the subscriber channel; a gone subscriber is fine
    pub fn send(&self, msg: StreamMessage) {
        let _ = self.events.send(msg);
    }

    /// Sender handle for build-owned tasks that emit progress directly
    pub(crate) fn event_sender(&self) -> &mpsc::UnboundedSender<StreamMessage> {
        &self.events
    }

    /// Deliver a terminal plan error; the first one ends the turn
    pub fn send_done(&self, err: ApiError) {
        let _ = self.stream_done.send(err);
    }

    /// Run `f` against the plan's mutable state under its lock
    pub fn update<R>(&self, f: impl FnOnce(&mut PlanState) -> R) -> R {
        f(&mut self.state.lock())
    }

    pub fn replies_finished(&self) -> bool {
        self.state.lock().replies_finished
    }

    pub fn build_finished(&self) -> bool {
        self.state.lock().build_finished()
    }
}

/// Parameters for registering a plan turn
pub struct RegisterPlanParams {
    pub plan_id: String,
    pub branch: String,
    pub prompt: String,
    /// Context records the user attached, keyed by path
    pub contexts_by_path: HashMap<String, Context>,
}

/// Process-wide registry of active plans, keyed by `(plan_id, branch)`
#[derive(Default)]
pub struct ActivePlans {
    plans: DashMap<(String, String), Arc<ActivePlan>>,
}

impl ActivePlans {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plan turn and hand back its subscription channels.
    /// Replaces any previous registration under the same key.
    pub fn register(&self, params: RegisterPlanParams) -> (Arc<ActivePlan>, PlanSubscription) {
        let (events, stream_done, subscription) = plan_channels();
        let plan = Arc::new(ActivePlan {
            plan_id: params.plan_id.clone(),
            branch: params.branch.clone(),
            prompt: params.prompt,
            cancel: CancellationToken::new(),
            events,
            stream_done,
            state: Mutex::new(PlanState {
                contexts_by_path: params.contexts_by_path,
                ..PlanState::default()
            }),
        });
        debug!(plan_id = %params.plan_id, branch = %params.branch, "registered active plan");
        self.plans
            .insert((params.plan_id, params.branch), Arc::clone(&plan));
        (plan, subscription)
    }

    pub fn get(&self, plan_id: &str, branch: &str) -> Option<Arc<ActivePlan>> {
        self.plans
            .get(&(plan_id.to_string(), branch.to_string()))
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Atomic mutation of a plan's state; the sole mutation path
    pub fn update<R>(
        &self,
        plan_id: &str,
        branch: &str,
        f: impl FnOnce(&mut PlanState) -> R,
    ) -> Option<R> {
        self.get(plan_id, branch).map(|plan| plan.update(f))
    }

    /// Drop the registration at the end of a plan turn
    pub fn remove(&self, plan_id: &str, branch: &str) {
        self.plans
            .remove(&(plan_id.to_string(), branch.to_string()));
    }
}
