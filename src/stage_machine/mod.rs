//! Derived stage state machine for one resolution job.
//!
//! This is the ONLY place polled snapshots turn into derived stage state.
//! The machine owns the view, reduces each snapshot synchronously (no I/O),
//! emits events for logging, and broadcasts the new view to subscribers via
//! a watch channel.
//!
//! Reduction is deliberately defensive about snapshot ordering: polls may
//! resolve out of request order, so per-stage `complete`/`approved` keep the
//! maximum state ever observed and the displayed current stage never
//! regresses. An internally inconsistent snapshot (a stage complete while a
//! predecessor is not) is absorbed as not-yet-authoritative, never an error.

mod events;
mod view;

pub use events::StageEvent;
pub use view::StageView;

use crate::model::{Stage, WorkflowStatus};
use crate::structured_logger::StructuredLogger;
use std::sync::Arc;
use tokio::sync::watch;

/// Reduces polled snapshots into a monotonic [`StageView`].
pub struct StageStateMachine {
    view: StageView,
    view_tx: watch::Sender<StageView>,
    logger: Arc<StructuredLogger>,
    seq: u64,
}

impl StageStateMachine {
    /// Creates a machine for a job, starting at the deployment stage.
    ///
    /// Returns the machine and a watch receiver for derived views.
    pub fn new(
        job_id: &str,
        logger: Arc<StructuredLogger>,
    ) -> (Self, watch::Receiver<StageView>) {
        let view = StageView::new(job_id);
        let (view_tx, view_rx) = watch::channel(view.clone());
        let machine = Self {
            view,
            view_tx,
            logger,
            seq: 0,
        };
        (machine, view_rx)
    }

    /// Current derived view.
    pub fn view(&self) -> &StageView {
        &self.view
    }

    /// Reduces one snapshot into the view and broadcasts the result.
    ///
    /// Returns the events derived from this snapshot (already logged).
    pub fn observe(&mut self, snapshot: &WorkflowStatus) -> Vec<StageEvent> {
        self.seq += 1;
        self.logger.log_snapshot(&self.view.job_id, self.seq, snapshot);

        let events = reduce(&mut self.view, snapshot);
        self.finish(events)
    }

    /// Records a completed poll cycle that produced no snapshot. The view
    /// keeps its last-known state and is marked stale.
    pub fn record_poll_error(&mut self, error: String) {
        self.logger.log_poll_error("StagePoller", &error);
        self.view.last_poll_error = Some(error);
        let _ = self.view_tx.send(self.view.clone());
    }

    /// Optimistically marks planning approved after a successful approve
    /// submission, so the gate disappears before the next poll confirms it.
    pub fn mark_plan_approved(&mut self) -> Vec<StageEvent> {
        self.seq += 1;
        let mut events = Vec::new();
        let status = self.view.stages.entry(Stage::Planning).or_default();
        if !status.approved {
            status.approved = true;
            events.push(StageEvent::PlanApproved);
        }
        self.finish(events)
    }

    /// Optimistically clears the failure flag after a successful retry
    /// submission. Only the next real poll may advance the stage.
    pub fn clear_error(&mut self) -> Vec<StageEvent> {
        self.seq += 1;
        let mut events = Vec::new();
        if self.view.failed {
            self.view.failed = false;
            self.view.error_message = None;
            let current = self.view.current_stage;
            if let Some(status) = self.view.stages.get_mut(&current) {
                status.error_message = None;
            }
            events.push(StageEvent::ErrorCleared { stage: current });
        }
        self.finish(events)
    }

    fn finish(&mut self, events: Vec<StageEvent>) -> Vec<StageEvent> {
        for event in &events {
            self.logger.log_stage_event(self.seq, event);
        }
        let _ = self.view_tx.send(self.view.clone());
        events
    }
}

/// Pure reduction of `(previous view, snapshot) -> new view`, returning the
/// derived events. No I/O, no clocks.
fn reduce(view: &mut StageView, snapshot: &WorkflowStatus) -> Vec<StageEvent> {
    let mut events = Vec::new();

    view.snapshots_observed += 1;
    view.last_poll_error = None;
    view.next_action = snapshot.next_action.clone();

    let was_terminal = view.is_terminal();

    // Last-complete-wins merge per stage. Completion and approval are
    // monotonic; timestamps and session ids take the latest non-empty value.
    for stage in Stage::ALL {
        let Some(record) = snapshot.stage(stage) else {
            continue;
        };
        let status = view.stages.entry(stage).or_default();
        if record.complete && !status.complete {
            status.complete = true;
            events.push(StageEvent::StageCompleted { stage });
        }
        if record.approved == Some(true) && !status.approved {
            status.approved = true;
            if stage == Stage::Planning {
                events.push(StageEvent::PlanApproved);
            }
        }
        if record.started_at.is_some() {
            status.started_at = record.started_at;
        }
        if record.completed_at.is_some() {
            status.completed_at = record.completed_at;
        }
        if record.session_id.is_some() {
            status.session_id = record.session_id.clone();
        }
    }

    // The displayed stage may advance only to a stage whose predecessors are
    // all complete, never past what the snapshot reports, and never backward.
    let allowed = first_incomplete(view);
    let candidate = snapshot.current_stage.min(allowed);
    if candidate > view.current_stage {
        events.push(StageEvent::StageAdvanced {
            from: view.current_stage,
            to: candidate,
        });
        view.current_stage = candidate;
    }

    if snapshot.is_failed() {
        let current = view.current_stage;
        let error = snapshot
            .error_message
            .clone()
            .or_else(|| {
                snapshot
                    .stage(current)
                    .and_then(|r| r.error_message.clone())
            })
            .unwrap_or_else(|| format!("stage {} failed", current));
        let changed = !view.failed || view.error_message.as_deref() != Some(error.as_str());
        view.failed = true;
        view.error_message = Some(error.clone());
        view.stages.entry(current).or_default().error_message = Some(error.clone());
        if changed {
            events.push(StageEvent::StageFailed {
                stage: current,
                error,
            });
        }
    } else if view.failed {
        // The service no longer reports the failure; the retry took effect.
        view.failed = false;
        view.error_message = None;
        let current = view.current_stage;
        if let Some(status) = view.stages.get_mut(&current) {
            status.error_message = None;
        }
        events.push(StageEvent::ErrorCleared { stage: current });
    }

    if !was_terminal && view.is_terminal() {
        events.push(StageEvent::WorkflowComplete);
    }

    events
}

/// First stage not yet complete in the merged view; `Handoff` when every
/// stage is complete.
fn first_incomplete(view: &StageView) -> Stage {
    Stage::ALL
        .into_iter()
        .find(|s| !view.is_complete(*s))
        .unwrap_or(Stage::Handoff)
}
