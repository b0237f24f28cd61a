//! Composition root for one resolution job.
//!
//! Owns the client, the structured logger, the shared stage machine, and
//! the two independent poll loops. Exposes the derived read-only views and
//! the imperative actions the surrounding application drives: approve the
//! plan, retry a failed stage, start the breakdown now, decide a pending
//! approval.

use crate::approval_center::ApprovalCenter;
use crate::approval_gate::PlanApprovalGate;
use crate::breakdown::{StartExecution, TaskBreakdownTracker};
use crate::client::ExecutionClient;
use crate::config::OrchestratorConfig;
use crate::model::{ApprovalItem, Decision, Stage};
use crate::poller::{spawn_stage_poller, PollerHandle};
use crate::retry::RetryController;
use crate::stage_machine::{StageStateMachine, StageView};
use crate::structured_logger::StructuredLogger;
use anyhow::{Context, Result};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

pub struct Orchestrator {
    client: Arc<dyn ExecutionClient>,
    logger: Arc<StructuredLogger>,
    config: OrchestratorConfig,
    job_id: String,
    machine: Arc<AsyncMutex<StageStateMachine>>,
    stage_view_rx: watch::Receiver<StageView>,
    gate: Arc<PlanApprovalGate>,
    retry: Arc<RetryController>,
    center: Arc<ApprovalCenter>,
    stage_poller: Mutex<Option<PollerHandle>>,
    approval_poller: Mutex<Option<PollerHandle>>,
    breakdown: Mutex<Option<Arc<TaskBreakdownTracker>>>,
}

impl Orchestrator {
    /// Wires up every component for a job. Polling does not start until
    /// [`Orchestrator::start`].
    pub fn new(
        client: Arc<dyn ExecutionClient>,
        config: OrchestratorConfig,
        job_id: impl Into<String>,
    ) -> Result<Self> {
        let job_id = job_id.into();
        let session_id = Uuid::new_v4().to_string();
        let logger = Arc::new(
            StructuredLogger::new(&session_id, &config.resolved_logs_dir())
                .context("failed to create structured logger")?,
        );

        let (machine, stage_view_rx) = StageStateMachine::new(&job_id, logger.clone());
        let machine = Arc::new(AsyncMutex::new(machine));

        let gate = Arc::new(PlanApprovalGate::new(
            client.clone(),
            machine.clone(),
            logger.clone(),
            job_id.clone(),
        ));
        let retry = Arc::new(RetryController::new(
            client.clone(),
            machine.clone(),
            logger.clone(),
            job_id.clone(),
        ));
        let center = ApprovalCenter::new(client.clone(), logger.clone());

        Ok(Self {
            client,
            logger,
            config,
            job_id,
            machine,
            stage_view_rx,
            gate,
            retry,
            center,
            stage_poller: Mutex::new(None),
            approval_poller: Mutex::new(None),
            breakdown: Mutex::new(None),
        })
    }

    /// Spawns the stage poll loop and the approval-center poll loop.
    pub fn start(&self) {
        let stage_handle = spawn_stage_poller(
            self.client.clone(),
            self.machine.clone(),
            self.job_id.clone(),
            self.config.poll_interval(),
            self.config.poll_retry_limit,
        );
        *self.stage_poller.lock().unwrap() = Some(stage_handle);

        let approval_handle = self.center.spawn_poller(self.config.approval_poll_interval());
        *self.approval_poller.lock().unwrap() = Some(approval_handle);
    }

    /// Stops both poll loops and waits for their tasks to finish.
    pub async fn shutdown(&self) {
        let stage = self.stage_poller.lock().unwrap().take();
        if let Some(handle) = stage {
            handle.stop().await;
        }
        let approvals = self.approval_poller.lock().unwrap().take();
        if let Some(handle) = approvals {
            handle.stop().await;
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn logger(&self) -> &Arc<StructuredLogger> {
        &self.logger
    }

    /// Latest derived stage view.
    pub fn stage_view(&self) -> StageView {
        self.stage_view_rx.borrow().clone()
    }

    /// Watch receiver for derived stage views.
    pub fn subscribe_stages(&self) -> watch::Receiver<StageView> {
        self.stage_view_rx.clone()
    }

    /// Whether the planning approval gate should currently be offered.
    pub fn plan_gate_exposed(&self) -> bool {
        self.gate.is_exposed(&self.stage_view_rx.borrow())
    }

    pub fn plan_approved(&self) -> bool {
        self.gate.is_approved()
    }

    /// Submits the planning approval. `Ok(false)` means the call was a
    /// no-op (duplicate click or already approved).
    pub async fn approve_plan(&self, notes: Option<&str>) -> Result<bool> {
        self.gate.approve(notes).await
    }

    /// Retries a failed stage. `Ok(false)` means a retry is already in
    /// flight for this job.
    pub async fn retry_stage(&self, stage: Stage) -> Result<bool> {
        self.retry.retry(stage).await
    }

    pub fn pending_approvals(&self) -> Vec<ApprovalItem> {
        self.center.pending()
    }

    pub fn pending_count(&self) -> usize {
        self.center.pending_count()
    }

    pub fn has_urgent_pending(&self) -> bool {
        self.center.has_urgent_pending()
    }

    /// Decides one pending approval. `Ok(false)` means a decision for the
    /// same item is already in flight.
    pub async fn decide_approval(
        &self,
        approval_id: &str,
        decision: Decision,
        comment: Option<String>,
    ) -> Result<bool> {
        self.center.decide(approval_id, decision, comment).await
    }

    /// Fetches the breakdown analysis and arms the auto-start countdown.
    /// Replaces any tracker from an earlier breakdown (its timers are
    /// cancelled on drop).
    pub async fn load_breakdown(&self, on_start: StartExecution) -> Result<Arc<TaskBreakdownTracker>> {
        let analysis = self.client.breakdown_status(&self.job_id).await?;
        let tracker = Arc::new(TaskBreakdownTracker::new(
            analysis,
            self.config.auto_start_delay(),
            on_start,
        )?);
        *self.breakdown.lock().unwrap() = Some(tracker.clone());
        Ok(tracker)
    }

    pub fn breakdown(&self) -> Option<Arc<TaskBreakdownTracker>> {
        self.breakdown.lock().unwrap().clone()
    }

    /// Starts breakdown execution now, if it has not already started.
    pub fn start_breakdown_now(&self) -> bool {
        match self.breakdown() {
            Some(tracker) => tracker.start_now(),
            None => false,
        }
    }

    /// Re-polls sub-task statuses into the tracker. After the start fired,
    /// this is the only thing that moves sub-task state.
    pub async fn refresh_breakdown(&self) -> Result<()> {
        let Some(tracker) = self.breakdown() else {
            return Ok(());
        };
        let analysis = self.client.breakdown_status(&self.job_id).await?;
        tracker.apply_statuses(analysis)
    }
}
