//! Persisted build records and lock parameters

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::build::replacements::Replacement;

/// One persisted build row, created before the model is called
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanBuild {
    pub id: String,
    pub org_id: String,
    pub plan_id: String,
    pub convo_message_ids: Vec<String>,
    pub file_path: String,
    #[serde(default)]
    pub error: Option<String>,
}

impl PlanBuild {
    pub fn new(
        org_id: impl Into<String>,
        plan_id: impl Into<String>,
        convo_message_ids: Vec<String>,
        file_path: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            org_id: org_id.into(),
            plan_id: plan_id.into(),
            convo_message_ids,
            file_path: file_path.into(),
            error: None,
        }
    }
}

/// Terminal outcome for one file: literal content for a new file, or a
/// replacement set over the current state of an existing one
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanFileResult {
    pub org_id: String,
    pub plan_id: String,
    pub plan_build_id: String,
    pub convo_message_ids: Vec<String>,
    pub path: String,
    pub content: String,
    pub replacements: Vec<Replacement>,
    pub context_sha: String,
    pub context_body: String,
    pub any_failed: bool,
}

/// A context record the user attached for a path
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Context {
    pub sha: String,
    pub body: String,
}

/// Pending file bodies accumulated this plan turn
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CurrentPlanState {
    /// Pending body per path
    pub files: HashMap<String, String>,
    /// Human-readable summary of pending changes, used as the amend message
    pub pending_summary: String,
}

impl CurrentPlanState {
    pub fn pending_changes_summary(&self) -> &str {
        &self.pending_summary
    }
}

/// Parameters for fetching the current plan state
#[derive(Debug, Clone)]
pub struct CurrentPlanStateParams {
    pub org_id: String,
    pub plan_id: String,
}

/// Lock scopes offered by the repository lock manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockScope {
    Read,
    Write,
}

/// Parameters for acquiring the plan's repository lock
#[derive(Debug, Clone)]
pub struct LockRepoParams {
    pub org_id: String,
    pub user_id: String,
    pub plan_id: String,
    pub branch: String,
    pub plan_build_id: String,
    pub scope: LockScope,
}

/// Opaque id of a held repository lock
pub type LockId = String;
