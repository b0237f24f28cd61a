//! Wire types mirrored from the external execution service.
//!
//! Everything here is pure data. Snapshots are immutable once received;
//! the orchestrator never mutates a snapshot in place, it derives new
//! state from it (see `stage_machine`).

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The `resolution_state` token the service reports when a stage failed.
pub const RESOLUTION_FAILED: &str = "failed";

/// One phase of the issue-resolution pipeline, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Deployment,
    Planning,
    Implementation,
    Testing,
    Handoff,
}

impl Stage {
    /// All stages in pipeline order.
    pub const ALL: [Stage; 5] = [
        Stage::Deployment,
        Stage::Planning,
        Stage::Implementation,
        Stage::Testing,
        Stage::Handoff,
    ];

    /// Stages strictly before this one, in order.
    #[allow(dead_code)]
    pub fn preceding(self) -> impl Iterator<Item = Stage> {
        Stage::ALL.into_iter().take_while(move |s| *s < self)
    }

    /// Wire name of the stage, matching the service's snake_case tokens.
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Deployment => "deployment",
            Stage::Planning => "planning",
            Stage::Implementation => "implementation",
            Stage::Testing => "testing",
            Stage::Handoff => "handoff",
        }
    }

    /// Short label for compact display (status lines, logs).
    pub fn short(self) -> &'static str {
        match self {
            Stage::Deployment => "Deploy",
            Stage::Planning => "Plan",
            Stage::Implementation => "Impl",
            Stage::Testing => "Test",
            Stage::Handoff => "Handoff",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-stage record inside a [`WorkflowStatus`] snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StageRecord {
    #[serde(default)]
    pub complete: bool,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub approved: Option<bool>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// One polled snapshot of a resolution job, owned by the external service.
///
/// A snapshot may be internally inconsistent when the backend lags (a stage
/// marked complete while a predecessor is not). The state machine absorbs
/// that rather than treating it as an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStatus {
    pub current_stage: Stage,
    /// Free-form status token mirrored from the service, e.g. a stage name
    /// or [`RESOLUTION_FAILED`].
    pub resolution_state: String,
    #[serde(default)]
    pub stages: HashMap<Stage, StageRecord>,
    /// Advisory hint only, never used for decisions.
    #[serde(default)]
    pub next_action: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl WorkflowStatus {
    pub fn is_failed(&self) -> bool {
        self.resolution_state == RESOLUTION_FAILED
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageRecord> {
        self.stages.get(&stage)
    }
}

/// Execution status of one sub-task within a breakdown.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubTaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// One unit of an ordered sub-task breakdown. `sequence` is 1-based and
/// contiguous across the collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubTaskInfo {
    pub sequence: u32,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: SubTaskStatus,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub result_summary: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Output of the upstream breakdown-detection step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakdownAnalysis {
    pub total_sub_tasks: u32,
    #[serde(default)]
    pub reasoning: String,
    pub sub_tasks: Vec<SubTaskInfo>,
}

impl BreakdownAnalysis {
    /// Checks the structural invariants of a breakdown at the ingest
    /// boundary: count matches, sequences are 1-based and contiguous, and
    /// at most one sub-task is processing (execution is strictly
    /// sequential).
    pub fn validate(&self) -> Result<()> {
        if self.sub_tasks.len() != self.total_sub_tasks as usize {
            bail!(
                "breakdown reports {} sub-tasks but contains {}",
                self.total_sub_tasks,
                self.sub_tasks.len()
            );
        }
        for (i, task) in self.sub_tasks.iter().enumerate() {
            let expected = i as u32 + 1;
            if task.sequence != expected {
                bail!(
                    "sub-task at position {} has sequence {} (expected {})",
                    i,
                    task.sequence,
                    expected
                );
            }
        }
        let processing = self
            .sub_tasks
            .iter()
            .filter(|t| t.status == SubTaskStatus::Processing)
            .count();
        if processing > 1 {
            bail!("{} sub-tasks are processing, execution is sequential", processing);
        }
        Ok(())
    }
}

/// Kind of a pending approval request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalKind {
    Mcp,
    Regular,
}

/// One entry in the pending-approval queue. `id` is stable across polls
/// until the item is decided, at which point the service drops it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalItem {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ApprovalKind,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub action_type: Option<String>,
    #[serde(default)]
    pub display_text: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub details: Option<HashMap<String, serde_json::Value>>,
    #[serde(default)]
    pub cwd: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The human's verdict on a pending approval.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Rejected,
}

/// Decision payload submitted back to the service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApprovalDecision {
    pub approval_id: String,
    pub decision: Decision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub_task(sequence: u32, status: SubTaskStatus) -> SubTaskInfo {
        SubTaskInfo {
            sequence,
            title: format!("task {}", sequence),
            description: String::new(),
            status,
            started_at: None,
            completed_at: None,
            result_summary: None,
            session_id: None,
        }
    }

    #[test]
    fn stage_order_is_pipeline_order() {
        assert!(Stage::Deployment < Stage::Planning);
        assert!(Stage::Planning < Stage::Implementation);
        assert!(Stage::Implementation < Stage::Testing);
        assert!(Stage::Testing < Stage::Handoff);

        let before: Vec<Stage> = Stage::Implementation.preceding().collect();
        assert_eq!(before, vec![Stage::Deployment, Stage::Planning]);
        assert_eq!(Stage::Deployment.preceding().count(), 0);
    }

    #[test]
    fn stage_serializes_to_snake_case_tokens() {
        let json = serde_json::to_string(&Stage::Implementation).unwrap();
        assert_eq!(json, "\"implementation\"");
        let parsed: Stage = serde_json::from_str("\"handoff\"").unwrap();
        assert_eq!(parsed, Stage::Handoff);
    }

    #[test]
    fn valid_breakdown_passes_validation() {
        let analysis = BreakdownAnalysis {
            total_sub_tasks: 3,
            reasoning: "split by module".to_string(),
            sub_tasks: vec![
                sub_task(1, SubTaskStatus::Completed),
                sub_task(2, SubTaskStatus::Processing),
                sub_task(3, SubTaskStatus::Pending),
            ],
        };
        analysis.validate().unwrap();
    }

    #[test]
    fn breakdown_rejects_count_mismatch() {
        let analysis = BreakdownAnalysis {
            total_sub_tasks: 2,
            reasoning: String::new(),
            sub_tasks: vec![sub_task(1, SubTaskStatus::Pending)],
        };
        assert!(analysis.validate().is_err());
    }

    #[test]
    fn breakdown_rejects_gapped_sequence() {
        let analysis = BreakdownAnalysis {
            total_sub_tasks: 2,
            reasoning: String::new(),
            sub_tasks: vec![
                sub_task(1, SubTaskStatus::Pending),
                sub_task(3, SubTaskStatus::Pending),
            ],
        };
        assert!(analysis.validate().is_err());
    }

    #[test]
    fn breakdown_rejects_two_processing_sub_tasks() {
        let analysis = BreakdownAnalysis {
            total_sub_tasks: 2,
            reasoning: String::new(),
            sub_tasks: vec![
                sub_task(1, SubTaskStatus::Processing),
                sub_task(2, SubTaskStatus::Processing),
            ],
        };
        assert!(analysis.validate().is_err());
    }

    #[test]
    fn approval_item_parses_service_shape() {
        let json = r#"{
            "id": "appr-42",
            "type": "mcp",
            "tool_name": "Bash",
            "display_text": "run tests",
            "created_at": "2026-08-01T12:00:00Z"
        }"#;
        let item: ApprovalItem = serde_json::from_str(json).unwrap();
        assert_eq!(item.kind, ApprovalKind::Mcp);
        assert_eq!(item.tool_name.as_deref(), Some("Bash"));
        assert!(item.action_type.is_none());
    }

    #[test]
    fn decision_payload_omits_empty_comment() {
        let decision = ApprovalDecision {
            approval_id: "appr-1".to_string(),
            decision: Decision::Rejected,
            comment: None,
        };
        let json = serde_json::to_string(&decision).unwrap();
        assert!(!json.contains("comment"));
        assert!(json.contains("\"rejected\""));
    }
}
