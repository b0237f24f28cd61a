//! Test helpers: a scripted [`ExecutionClient`] and snapshot builders.

use crate::client::ExecutionClient;
use crate::model::{
    ApprovalDecision, ApprovalItem, ApprovalKind, BreakdownAnalysis, Stage, StageRecord,
    SubTaskInfo, SubTaskStatus, WorkflowStatus,
};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Builds a snapshot with the given current stage and completed stages.
pub fn make_snapshot(current: Stage, complete: &[Stage]) -> WorkflowStatus {
    let mut stages = HashMap::new();
    for stage in complete {
        stages.insert(
            *stage,
            StageRecord {
                complete: true,
                ..StageRecord::default()
            },
        );
    }
    WorkflowStatus {
        current_stage: current,
        resolution_state: current.as_str().to_string(),
        stages,
        next_action: None,
        error_message: None,
    }
}

/// Builds a pending approval item of either kind.
pub fn make_approval_item(
    id: &str,
    kind: ApprovalKind,
    tool_name: Option<&str>,
    action_type: Option<&str>,
) -> ApprovalItem {
    ApprovalItem {
        id: id.to_string(),
        kind,
        tool_name: tool_name.map(str::to_string),
        action_type: action_type.map(str::to_string),
        display_text: None,
        prompt: None,
        details: None,
        cwd: None,
        created_at: Utc::now(),
    }
}

/// Builds a sub-task with the given 1-based sequence and status.
pub fn make_sub_task(sequence: u32, status: SubTaskStatus) -> SubTaskInfo {
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

/// An action call the scripted client received.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    ApprovePlan {
        job_id: String,
        notes: Option<String>,
    },
    RetryStage {
        job_id: String,
        stage: Stage,
    },
    Decide(ApprovalDecision),
}

enum StageResponse {
    Snapshot(WorkflowStatus),
    Error(String),
}

/// Scripted stand-in for the external execution service.
///
/// Snapshot and pending-approval responses are queued; once a queue runs
/// dry the last delivered value repeats, which matches a backend that has
/// nothing new to say between polls.
pub struct ScriptedClient {
    stage_queue: Mutex<VecDeque<StageResponse>>,
    last_snapshot: Mutex<Option<WorkflowStatus>>,
    stage_calls: AtomicUsize,
    pending_queue: Mutex<VecDeque<Vec<ApprovalItem>>>,
    last_pending: Mutex<Vec<ApprovalItem>>,
    pending_calls: AtomicUsize,
    breakdown: Mutex<Option<BreakdownAnalysis>>,
    recorded: Mutex<Vec<RecordedCall>>,
    fail_actions: AtomicBool,
    action_delay: Mutex<Option<Duration>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self {
            stage_queue: Mutex::new(VecDeque::new()),
            last_snapshot: Mutex::new(None),
            stage_calls: AtomicUsize::new(0),
            pending_queue: Mutex::new(VecDeque::new()),
            last_pending: Mutex::new(Vec::new()),
            pending_calls: AtomicUsize::new(0),
            breakdown: Mutex::new(None),
            recorded: Mutex::new(Vec::new()),
            fail_actions: AtomicBool::new(false),
            action_delay: Mutex::new(None),
        }
    }

    pub fn push_snapshot(&self, snapshot: WorkflowStatus) {
        self.stage_queue
            .lock()
            .unwrap()
            .push_back(StageResponse::Snapshot(snapshot));
    }

    pub fn push_snapshot_error(&self, error: &str) {
        self.stage_queue
            .lock()
            .unwrap()
            .push_back(StageResponse::Error(error.to_string()));
    }

    pub fn push_pending(&self, items: Vec<ApprovalItem>) {
        self.pending_queue.lock().unwrap().push_back(items);
    }

    pub fn set_breakdown(&self, analysis: BreakdownAnalysis) {
        *self.breakdown.lock().unwrap() = Some(analysis);
    }

    /// Makes every subsequent action call fail.
    pub fn fail_actions(&self, fail: bool) {
        self.fail_actions.store(fail, Ordering::SeqCst);
    }

    /// Delays every action call, for exercising in-flight races under a
    /// paused clock.
    pub fn set_action_delay(&self, delay: Duration) {
        *self.action_delay.lock().unwrap() = Some(delay);
    }

    pub fn stage_status_calls(&self) -> usize {
        self.stage_calls.load(Ordering::SeqCst)
    }

    pub fn pending_approval_calls(&self) -> usize {
        self.pending_calls.load(Ordering::SeqCst)
    }

    pub fn recorded_calls(&self) -> Vec<RecordedCall> {
        self.recorded.lock().unwrap().clone()
    }

    async fn action_gate(&self) -> Result<()> {
        let delay = *self.action_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_actions.load(Ordering::SeqCst) {
            bail!("service rejected the action");
        }
        Ok(())
    }
}

impl Default for ScriptedClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionClient for ScriptedClient {
    async fn stage_status(&self, _job_id: &str) -> Result<WorkflowStatus> {
        self.stage_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.stage_queue.lock().unwrap().pop_front();
        match next {
            Some(StageResponse::Snapshot(snapshot)) => {
                *self.last_snapshot.lock().unwrap() = Some(snapshot.clone());
                Ok(snapshot)
            }
            Some(StageResponse::Error(error)) => Err(anyhow!(error)),
            None => self
                .last_snapshot
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| anyhow!("no snapshot scripted")),
        }
    }

    async fn approve_plan(&self, job_id: &str, notes: Option<&str>) -> Result<()> {
        self.recorded.lock().unwrap().push(RecordedCall::ApprovePlan {
            job_id: job_id.to_string(),
            notes: notes.map(str::to_string),
        });
        self.action_gate().await
    }

    async fn retry_stage(&self, job_id: &str, stage: Stage) -> Result<()> {
        self.recorded.lock().unwrap().push(RecordedCall::RetryStage {
            job_id: job_id.to_string(),
            stage,
        });
        self.action_gate().await
    }

    async fn breakdown_status(&self, _job_id: &str) -> Result<BreakdownAnalysis> {
        self.breakdown
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| anyhow!("no breakdown scripted"))
    }

    async fn pending_approvals(&self) -> Result<Vec<ApprovalItem>> {
        self.pending_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.pending_queue.lock().unwrap().pop_front();
        match next {
            Some(items) => {
                *self.last_pending.lock().unwrap() = items.clone();
                Ok(items)
            }
            None => Ok(self.last_pending.lock().unwrap().clone()),
        }
    }

    async fn submit_approval_decision(&self, decision: &ApprovalDecision) -> Result<()> {
        self.recorded
            .lock()
            .unwrap()
            .push(RecordedCall::Decide(decision.clone()));
        self.action_gate().await
    }
}
