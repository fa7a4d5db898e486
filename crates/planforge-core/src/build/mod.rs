//! Per-plan, per-file build orchestration
//!
//! Queued builds are multiplexed onto the builder model one path at a time:
//! the dispatcher gates each path, the state machine drives one batch through
//! the stream with two retry counters, and the commit coordinator serializes
//! results through the plan's repository write lock.

pub mod commit;
pub mod queue;
pub mod replacements;
pub mod result;
pub mod state_machine;


use std::sync::Arc;

use crate::ai::stream::BuilderModel;
use crate::config::BuildConfig;
use crate::plan::active::ActivePlans;
use crate::storage::traits::{PlanStore, RepoVcs};

pub use replacements::{apply_replacements, Replacement};

/// The build pipeline service: queue entry point plus everything it spawns
pub struct BuildPipeline {
    plans: Arc<ActivePlans>,
    model: Arc<dyn BuilderModel>,
    store: Arc<dyn PlanStore>,
    repo: Arc<dyn RepoVcs>,
    config: BuildConfig,
}

impl BuildPipeline {
    pub fn new(
        plans: Arc<ActivePlans>,
        model: Arc<dyn BuilderModel>,
        store: Arc<dyn PlanStore>,
        repo: Arc<dyn RepoVcs>,
        config: BuildConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            plans,
            model,
            store,
            repo,
            config,
        })
    }

    pub fn plans(&self) -> &Arc<ActivePlans> {
        &self.plans
    }

    pub(crate) fn model(&self) -> &dyn BuilderModel {
        self.model.as_ref()
    }

    pub(crate) fn store(&self) -> &dyn PlanStore {
        self.store.as_ref()
    }

    pub(crate) fn repo(&self) -> &dyn RepoVcs {
        self.repo.as_ref()
    }

    pub(crate) fn config(&self) -> &BuildConfig {
        &self.config
    }
}

/// How one batch run ended, as seen by the dispatcher loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BatchOutcome {
    /// The batch's result was persisted and committed
    Committed,
    /// Errored or canceled; gate handling already done, stop draining
    Stopped,
}
