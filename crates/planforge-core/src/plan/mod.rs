//! Active plan state and event stream

pub mod active;
pub mod events;

pub use active::{ActiveBuild, ActivePlan, ActivePlans, PlanState, RegisterPlanParams};
pub use events::{BuildInfo, PlanSubscription, StreamMessage};
