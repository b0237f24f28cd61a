//! Events derived from snapshot reductions.
//!
//! These exist for logging and notification only. Consumers read state via
//! the watch channel's [`super::StageView`], never by replaying events.

use crate::model::Stage;
use serde::Serialize;

/// Events emitted by the stage machine while reducing a snapshot.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type")]
pub enum StageEvent {
    /// The displayed current stage moved forward.
    StageAdvanced { from: Stage, to: Stage },
    /// A stage was observed complete for the first time.
    StageCompleted { stage: Stage },
    /// The planning stage was observed (or optimistically marked) approved.
    PlanApproved,
    /// The service reported the current stage as failed.
    StageFailed { stage: Stage, error: String },
    /// The failure flag was cleared, either by a recovering snapshot or by
    /// an optimistic clear after a successful retry submission.
    ErrorCleared { stage: Stage },
    /// The handoff stage completed; the job is terminal.
    WorkflowComplete,
}
