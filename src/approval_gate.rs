//! Human approval gate for the planning stage.
//!
//! Exposed once planning is complete and not yet approved. Submission is
//! single-flight: the guard is a compare-and-swap on an atomic flag, not a
//! disabled button, so a double-click can never produce two submissions.

use crate::client::ExecutionClient;
use crate::stage_machine::{StageStateMachine, StageView};
use crate::structured_logger::StructuredLogger;
use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct PlanApprovalGate {
    client: Arc<dyn ExecutionClient>,
    machine: Arc<Mutex<StageStateMachine>>,
    logger: Arc<StructuredLogger>,
    job_id: String,
    in_flight: AtomicBool,
    approved: AtomicBool,
}

impl PlanApprovalGate {
    pub fn new(
        client: Arc<dyn ExecutionClient>,
        machine: Arc<Mutex<StageStateMachine>>,
        logger: Arc<StructuredLogger>,
        job_id: String,
    ) -> Self {
        Self {
            client,
            machine,
            logger,
            job_id,
            in_flight: AtomicBool::new(false),
            approved: AtomicBool::new(false),
        }
    }

    /// Whether the gate should be offered for the given view.
    pub fn is_exposed(&self, view: &StageView) -> bool {
        view.plan_gate_open() && !self.approved.load(Ordering::SeqCst)
    }

    /// Whether a submission is currently in flight.
    #[allow(dead_code)]
    pub fn is_submitting(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Terminal display state: an approval succeeded through this gate.
    pub fn is_approved(&self) -> bool {
        self.approved.load(Ordering::SeqCst)
    }

    /// Submits the planning approval with optional free-text notes.
    ///
    /// Returns `Ok(true)` when a submission was made, `Ok(false)` when the
    /// call was a no-op because another submission is in flight or the gate
    /// already reached its approved state. On failure the guard re-arms so
    /// the user can retry.
    pub async fn approve(&self, notes: Option<&str>) -> Result<bool> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(false);
        }
        if self.approved.load(Ordering::SeqCst) {
            self.in_flight.store(false, Ordering::SeqCst);
            return Ok(false);
        }

        let result = self.client.approve_plan(&self.job_id, notes).await;
        match result {
            Ok(()) => {
                self.approved.store(true, Ordering::SeqCst);
                self.logger.log_action("approve_plan", &self.job_id, true);
                // Close the gate in the derived view before the next poll
                // confirms the approval.
                self.machine.lock().await.mark_plan_approved();
                self.in_flight.store(false, Ordering::SeqCst);
                Ok(true)
            }
            Err(e) => {
                self.logger.log_action("approve_plan", &self.job_id, false);
                self.in_flight.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }
}
