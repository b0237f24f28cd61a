//! Periodic stage-status polling for one resolution job.
//!
//! The poller is a spawned task ticking on a fixed interval. Each cycle
//! fetches a snapshot (with one bounded retry) and hands it to the stage
//! machine. A failed cycle marks the view stale and never halts the
//! schedule. The task stops when the job reaches its terminal stage, when
//! the handle asks it to, or when the handle is dropped.

use crate::client::ExecutionClient;
use crate::model::WorkflowStatus;
use crate::stage_machine::StageStateMachine;
use anyhow::{anyhow, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// Owns the polling task. Dropping the handle closes the stop channel,
/// which tears the task down on its next cycle.
pub struct PollerHandle {
    pub(crate) stop_tx: mpsc::Sender<()>,
    pub(crate) task: JoinHandle<()>,
}

impl PollerHandle {
    /// Stops the poller and waits for the task to finish.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(()).await;
        let _ = self.task.await;
    }

    /// Whether the polling task has exited on its own (terminal stage).
    #[allow(dead_code)]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Spawns the polling loop for `job_id`.
///
/// `retry_limit` is the number of immediate re-attempts after a failed
/// fetch within one cycle (default 1).
pub fn spawn_stage_poller(
    client: Arc<dyn ExecutionClient>,
    machine: Arc<Mutex<StageStateMachine>>,
    job_id: String,
    interval: Duration,
    retry_limit: u32,
) -> PollerHandle {
    let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match fetch_with_retry(client.as_ref(), &job_id, retry_limit).await {
                        Ok(snapshot) => {
                            let mut machine = machine.lock().await;
                            machine.observe(&snapshot);
                            if machine.view().is_terminal() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::warn!("stage poll for {} failed: {:#}", job_id, e);
                            machine.lock().await.record_poll_error(format!("{:#}", e));
                        }
                    }
                }
                _ = stop_rx.recv() => {
                    break;
                }
            }
        }
    });

    PollerHandle { stop_tx, task }
}

async fn fetch_with_retry(
    client: &dyn ExecutionClient,
    job_id: &str,
    retry_limit: u32,
) -> Result<WorkflowStatus> {
    let mut last_err = None;
    for _ in 0..=retry_limit {
        match client.stage_status(job_id).await {
            Ok(snapshot) => return Ok(snapshot),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow!("stage poll produced no result")))
}
