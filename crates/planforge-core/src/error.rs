//! Pipeline error types

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ai::stream::StreamFailure;

/// Terminal failures of the build pipeline
#[derive(Debug, Error)]
pub enum BuildError {
    /// Creating the `PlanBuild` row failed during preflight
    #[error("error storing plan build: {0:#}")]
    StorePlanBuild(anyhow::Error),

    /// Fetching the current plan state failed
    #[error("error getting current plan state: {0:#}")]
    GetPlanState(anyhow::Error),

    /// Serializing the prior replacement set for a correction prompt failed
    #[error("error serializing replacements: {0}")]
    SerializeReplacements(#[from] serde_json::Error),

    /// Building the correction prompt failed
    #[error("error getting correct replacement prompt: {0:#}")]
    CorrectionPrompt(anyhow::Error),

    /// The builder stream failed and its retries are spent
    #[error("{failure} for file '{path}' after {retries} retries")]
    Stream {
        path: String,
        retries: u32,
        #[source]
        failure: StreamFailure,
    },

    /// Acquiring the plan's repository write lock failed
    #[error("error locking repo for build file: {0:#}")]
    LockRepo(anyhow::Error),

    /// Persisting a file result failed
    #[error("error storing plan result: {0:#}")]
    StoreResult(anyhow::Error),

    /// Amending the plan's commit failed
    #[error("error committing plan build: {0:#}")]
    Commit(anyhow::Error),
}

impl BuildError {
    /// HTTP status reported on the terminal error sink
    pub fn status(&self) -> u16 {
        match self {
            BuildError::StorePlanBuild(_)
            | BuildError::GetPlanState(_)
            | BuildError::SerializeReplacements(_)
            | BuildError::CorrectionPrompt(_)
            | BuildError::Stream { .. }
            | BuildError::LockRepo(_)
            | BuildError::StoreResult(_)
            | BuildError::Commit(_) => 500,
        }
    }
}

/// Terminal plan error delivered on the one-shot done sink
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiError {
    #[serde(rename = "type")]
    pub kind: ApiErrorType,
    pub status: u16,
    pub msg: String,
}

/// Coarse classification of terminal plan errors
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApiErrorType {
    Other,
}

impl ApiError {
    /// A 500-class error with an operator-readable message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorType::Other,
            status: 500,
            msg: msg.into(),
        }
    }
}

impl From<BuildError> for ApiError {
    fn from(err: BuildError) -> Self {
        Self {
            kind: ApiErrorType::Other,
            status: err.status(),
            msg: err.to_string(),
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "api error ({}): {}", self.status, self.msg)
    }
}

/// Errors surfaced directly to callers of `queue_build`
#[derive(Debug, Error)]
pub enum QueueError {
    /// No active plan registered under `(plan_id, branch)`
    #[error("no active plan for plan {plan_id} on branch {branch}")]
    PlanNotFound { plan_id: String, branch: String },

    /// Build paths are logical paths within the plan, never absolute
    #[error("build path must be relative: {0}")]
    AbsolutePath(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_error_messages() {
        let err = BuildError::StorePlanBuild(anyhow::anyhow!("db down"));
        assert_eq!(err.to_string(), "error storing plan build: db down");

        let err = BuildError::Stream {
            path: "foo.go".to_string(),
            retries: 3,
            failure: StreamFailure::Inactivity,
        };
        assert_eq!(
            err.to_string(),
            "stream timeout due to inactivity for file 'foo.go' after 3 retries"
        );
    }

    #[test]
    fn test_build_error_status() {
        assert_eq!(
            BuildError::LockRepo(anyhow::anyhow!("held elsewhere")).status(),
            500
        );
        assert_eq!(
            BuildError::Commit(anyhow::anyhow!("amend failed")).status(),
            500
        );
    }

    #[test]
    fn test_build_error_converts_to_api_error() {
        let api: ApiError = BuildError::StoreResult(anyhow::anyhow!("write failed")).into();
        assert_eq!(api.status, 500);
        assert_eq!(api.kind, ApiErrorType::Other);
        assert_eq!(api.msg, "error storing plan result: write failed");
    }

    #[test]
    fn test_api_error_internal() {
        let err = ApiError::internal("error storing plan result: boom");
        assert_eq!(err.status, 500);
        assert_eq!(err.kind, ApiErrorType::Other);
        assert!(err.msg.contains("boom"));
    }

    #[test]
    fn test_api_error_serializes_type_field() {
        let err = ApiError::internal("x");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["type"], "other");
        assert_eq!(json["status"], 500);
    }
}
