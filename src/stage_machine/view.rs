//! Read-only derived view of a resolution job for consumers.
//!
//! Consumers NEVER mutate this; they receive new views via a watch channel
//! each time the machine reduces a snapshot.

use crate::model::Stage;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Derived per-stage state. Unlike the wire [`crate::model::StageRecord`],
/// `complete` and `approved` here are monotonic: once observed true they
/// stay true regardless of later (possibly stale) snapshots.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageStatus {
    pub complete: bool,
    pub approved: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub session_id: Option<String>,
    pub error_message: Option<String>,
}

/// Read-only snapshot of derived stage state.
#[derive(Debug, Clone)]
pub struct StageView {
    pub job_id: String,
    /// Displayed current stage. Monotonically advancing.
    pub current_stage: Stage,
    pub stages: BTreeMap<Stage, StageStatus>,
    /// True while the service reports the current stage as failed.
    pub failed: bool,
    /// Top-level failure description when `failed` is set.
    pub error_message: Option<String>,
    /// Advisory hint mirrored from the latest snapshot.
    pub next_action: Option<String>,
    /// Set when the last poll cycle exhausted its retry without a snapshot;
    /// the rest of the view is then last-known state, not an error.
    pub last_poll_error: Option<String>,
    /// Number of snapshots reduced so far.
    pub snapshots_observed: u64,
}

impl StageView {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            current_stage: Stage::Deployment,
            stages: BTreeMap::new(),
            failed: false,
            error_message: None,
            next_action: None,
            last_poll_error: None,
            snapshots_observed: 0,
        }
    }

    /// Derived status for a stage; stages never observed report the default
    /// (incomplete, unapproved) status.
    pub fn stage(&self, stage: Stage) -> StageStatus {
        self.stages.get(&stage).cloned().unwrap_or_default()
    }

    pub fn is_complete(&self, stage: Stage) -> bool {
        self.stages.get(&stage).is_some_and(|s| s.complete)
    }

    pub fn is_approved(&self, stage: Stage) -> bool {
        self.stages.get(&stage).is_some_and(|s| s.approved)
    }

    /// Terminal state: the handoff stage completed.
    pub fn is_terminal(&self) -> bool {
        self.is_complete(Stage::Handoff)
    }

    /// Whether the planning approval gate should be exposed.
    pub fn plan_gate_open(&self) -> bool {
        self.is_complete(Stage::Planning) && !self.is_approved(Stage::Planning)
    }

    /// True when the view reflects last-known rather than fresh state.
    pub fn is_stale(&self) -> bool {
        self.last_poll_error.is_some()
    }
}
