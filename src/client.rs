//! Interface to the external execution service.
//!
//! The service is an opaque, slow, fallible producer of status snapshots.
//! The orchestrator only ever reads snapshots and issues discrete action
//! calls; it never merges local edits into server-owned collections.

use crate::model::{ApprovalDecision, ApprovalItem, BreakdownAnalysis, Stage, WorkflowStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;

/// Everything the orchestrator needs from the execution service.
///
/// All methods are suspension points; derived-state computation never
/// happens behind this trait.
#[async_trait]
pub trait ExecutionClient: Send + Sync {
    /// Fetches the latest workflow snapshot for a job.
    async fn stage_status(&self, job_id: &str) -> Result<WorkflowStatus>;

    /// Submits the planning-stage approval with optional reviewer notes.
    async fn approve_plan(&self, job_id: &str, notes: Option<&str>) -> Result<()>;

    /// Asks the service to retry a failed stage.
    async fn retry_stage(&self, job_id: &str, stage: Stage) -> Result<()>;

    /// Fetches the sub-task breakdown produced for a job.
    async fn breakdown_status(&self, job_id: &str) -> Result<BreakdownAnalysis>;

    /// Fetches the full pending-approval queue (not job-scoped).
    async fn pending_approvals(&self) -> Result<Vec<ApprovalItem>>;

    /// Records a human decision for one pending approval.
    async fn submit_approval_decision(&self, decision: &ApprovalDecision) -> Result<()>;
}

/// HTTP binding for [`ExecutionClient`].
pub struct HttpExecutionClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpExecutionClient {
    /// Creates a client for the service at `base_url` (no trailing slash).
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build HTTP client")?;
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Ok(Self { http, base_url })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

#[async_trait]
impl ExecutionClient for HttpExecutionClient {
    async fn stage_status(&self, job_id: &str) -> Result<WorkflowStatus> {
        let url = self.url(&format!("jobs/{}/stage-status", job_id));
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?
            .error_for_status()
            .with_context(|| format!("GET {} rejected", url))?;
        response
            .json()
            .await
            .context("stage-status response was not a valid snapshot")
    }

    async fn approve_plan(&self, job_id: &str, notes: Option<&str>) -> Result<()> {
        let url = self.url(&format!("jobs/{}/approve-plan", job_id));
        self.http
            .post(&url)
            .json(&serde_json::json!({ "notes": notes }))
            .send()
            .await
            .with_context(|| format!("POST {} failed", url))?
            .error_for_status()
            .with_context(|| format!("POST {} rejected", url))?;
        Ok(())
    }

    async fn retry_stage(&self, job_id: &str, stage: Stage) -> Result<()> {
        let url = self.url(&format!("jobs/{}/retry-stage", job_id));
        self.http
            .post(&url)
            .json(&serde_json::json!({ "stage": stage }))
            .send()
            .await
            .with_context(|| format!("POST {} failed", url))?
            .error_for_status()
            .with_context(|| format!("POST {} rejected", url))?;
        Ok(())
    }

    async fn breakdown_status(&self, job_id: &str) -> Result<BreakdownAnalysis> {
        let url = self.url(&format!("jobs/{}/breakdown-status", job_id));
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?
            .error_for_status()
            .with_context(|| format!("GET {} rejected", url))?;
        response
            .json()
            .await
            .context("breakdown-status response was not a valid analysis")
    }

    async fn pending_approvals(&self) -> Result<Vec<ApprovalItem>> {
        let url = self.url("approvals/pending");
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?
            .error_for_status()
            .with_context(|| format!("GET {} rejected", url))?;
        response
            .json()
            .await
            .context("pending-approvals response was not a valid item list")
    }

    async fn submit_approval_decision(&self, decision: &ApprovalDecision) -> Result<()> {
        let url = self.url("approvals/decision");
        self.http
            .post(&url)
            .json(decision)
            .send()
            .await
            .with_context(|| format!("POST {} failed", url))?
            .error_for_status()
            .with_context(|| format!("POST {} rejected", url))?;
        Ok(())
    }
}
