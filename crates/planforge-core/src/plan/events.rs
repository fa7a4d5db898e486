//! Per-plan event stream
//!
//! Build-owned tasks push progress and terminal messages to a subscriber
//! channel. The done sink is one-shot in effect: the first `ApiError` ends
//! the plan turn, later sends are dropped by the closed receiver.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ApiError;

/// Build progress for one path
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildInfo {
    pub path: String,
    pub num_tokens: usize,
    pub finished: bool,
}

/// Messages delivered on the plan's event channel
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    BuildInfo(BuildInfo),
    Finished,
}

/// Subscriber half of a plan's channels, handed out at registration
pub struct PlanSubscription {
    /// Progress and `Finished` messages
    pub events: mpsc::UnboundedReceiver<StreamMessage>,
    /// Terminal plan errors
    pub stream_done: mpsc::UnboundedReceiver<ApiError>,
}

pub(crate) fn plan_channels() -> (
    mpsc::UnboundedSender<StreamMessage>,
    mpsc::UnboundedSender<ApiError>,
    PlanSubscription,
) {
    let (event_tx, events) = mpsc::unbounded_channel();
    let (done_tx, stream_done) = mpsc::unbounded_channel();
    (
        event_tx,
        done_tx,
        PlanSubscription {
            events,
            stream_done,
        },
    )
}
