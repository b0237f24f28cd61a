//! Retry of a stage the service reported as failed.
//!
//! On a successful submission the local error flag clears optimistically,
//! anticipating a better snapshot on the next poll. The stage itself never
//! advances here; only a real poll may do that.

use crate::client::ExecutionClient;
use crate::model::Stage;
use crate::stage_machine::StageStateMachine;
use crate::structured_logger::StructuredLogger;
use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct RetryController {
    client: Arc<dyn ExecutionClient>,
    machine: Arc<Mutex<StageStateMachine>>,
    logger: Arc<StructuredLogger>,
    job_id: String,
    in_flight: AtomicBool,
}

impl RetryController {
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
        }
    }

    #[allow(dead_code)]
    pub fn is_submitting(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Asks the service to retry `stage`.
    ///
    /// Single-flight per job: returns `Ok(false)` while another retry is in
    /// flight. On failure the local error flag stays set and the error is
    /// surfaced to the caller.
    pub async fn retry(&self, stage: Stage) -> Result<bool> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(false);
        }

        let result = self.client.retry_stage(&self.job_id, stage).await;
        self.in_flight.store(false, Ordering::SeqCst);

        match result {
            Ok(()) => {
                self.logger.log_action("retry_stage", stage.as_str(), true);
                self.machine.lock().await.clear_error();
                Ok(true)
            }
            Err(e) => {
                self.logger.log_action("retry_stage", stage.as_str(), false);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RESOLUTION_FAILED;
    use crate::test_support::{make_snapshot, RecordedCall, ScriptedClient};
    use tempfile::TempDir;
    use tokio::time::{advance, Duration};

    fn create_failed_controller() -> (
        Arc<RetryController>,
        Arc<ScriptedClient>,
        Arc<Mutex<StageStateMachine>>,
        TempDir,
    ) {
        let temp = TempDir::new().unwrap();
        let logger = Arc::new(StructuredLogger::new("retry-test", temp.path()).unwrap());
        let (mut machine, _view_rx) = StageStateMachine::new("job-1", logger.clone());
        let mut failed = make_snapshot(
            Stage::Implementation,
            &[Stage::Deployment, Stage::Planning],
        );
        failed.resolution_state = RESOLUTION_FAILED.to_string();
        failed.error_message = Some("API rate limit exceeded".to_string());
        machine.observe(&failed);

        let machine = Arc::new(Mutex::new(machine));
        let client = Arc::new(ScriptedClient::new());
        let controller = Arc::new(RetryController::new(
            client.clone(),
            machine.clone(),
            logger,
            "job-1".to_string(),
        ));
        (controller, client, machine, temp)
    }

    #[tokio::test]
    async fn success_clears_the_error_before_the_next_poll() {
        let (controller, client, machine, _temp) = create_failed_controller();
        assert!(machine.lock().await.view().failed);

        assert!(controller.retry(Stage::Implementation).await.unwrap());

        assert_eq!(
            client.recorded_calls(),
            vec![RecordedCall::RetryStage {
                job_id: "job-1".to_string(),
                stage: Stage::Implementation,
            }]
        );
        let view = machine.lock().await.view().clone();
        assert!(!view.failed);
        assert!(view.error_message.is_none());
        // The stage did not advance; only a poll may do that.
        assert_eq!(view.current_stage, Stage::Implementation);
    }

    #[tokio::test]
    async fn failure_leaves_the_error_flag_set() {
        let (controller, client, machine, _temp) = create_failed_controller();
        client.fail_actions(true);

        assert!(controller.retry(Stage::Implementation).await.is_err());

        let view = machine.lock().await.view().clone();
        assert!(view.failed);
        assert_eq!(view.error_message.as_deref(), Some("API rate limit exceeded"));
        assert!(!controller.is_submitting());
    }

    #[tokio::test(start_paused = true)]
    async fn retries_are_single_flight_per_job() {
        let (controller, client, _machine, _temp) = create_failed_controller();
        client.set_action_delay(Duration::from_millis(100));

        let first = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.retry(Stage::Implementation).await })
        };
        tokio::task::yield_now().await;
        assert!(controller.is_submitting());
        assert!(!controller.retry(Stage::Implementation).await.unwrap());

        advance(Duration::from_millis(150)).await;
        assert!(first.await.unwrap().unwrap());
        assert_eq!(client.recorded_calls().len(), 1);
    }
}
