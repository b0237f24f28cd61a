//! Job-agnostic queue of pending approval requests.
//!
//! Polls the pending-approvals endpoint on its own cadence, classifies
//! urgency as a pure function of each item, and submits decisions with a
//! per-item single-flight guard. The local list is always a full replace
//! of the server's; decided items disappear on the forced refetch that
//! follows every successful decision.

use crate::client::ExecutionClient;
use crate::model::{ApprovalDecision, ApprovalItem, ApprovalKind, Decision};
use crate::poller::PollerHandle;
use crate::structured_logger::StructuredLogger;
use anyhow::Result;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Priority tier of a pending approval.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    Medium,
    High,
}

/// Pure urgency classification. This function is the single source of
/// truth: urgency is recomputed from the item on every poll and never
/// persisted separately from its inputs.
pub fn classify(item: &ApprovalItem) -> Urgency {
    match item.kind {
        ApprovalKind::Mcp => match item.tool_name.as_deref() {
            Some("Bash" | "Write" | "Edit" | "Delete") => Urgency::High,
            Some("WebFetch" | "WebSearch") => Urgency::Medium,
            // Unknown and missing tool names rank low; the explicit arm is
            // here so new tool names cannot fall through silently.
            Some(_) | None => Urgency::Low,
        },
        ApprovalKind::Regular => match item.action_type.as_deref() {
            Some("command") => Urgency::High,
            Some(_) | None => Urgency::Medium,
        },
    }
}

/// Whether any pending item classifies as high urgency.
pub fn has_urgent(items: &[ApprovalItem]) -> bool {
    items.iter().any(|item| classify(item) == Urgency::High)
}

/// Badge text for a pending count, capped at "9+". Display only.
pub fn display_count(count: usize) -> String {
    if count > 9 {
        "9+".to_string()
    } else {
        count.to_string()
    }
}

pub struct ApprovalCenter {
    client: Arc<dyn ExecutionClient>,
    logger: Arc<StructuredLogger>,
    pending_tx: watch::Sender<Vec<ApprovalItem>>,
    pending_rx: watch::Receiver<Vec<ApprovalItem>>,
    in_flight: Mutex<HashSet<String>>,
}

impl ApprovalCenter {
    pub fn new(client: Arc<dyn ExecutionClient>, logger: Arc<StructuredLogger>) -> Arc<Self> {
        let (pending_tx, pending_rx) = watch::channel(Vec::new());
        Arc::new(Self {
            client,
            logger,
            pending_tx,
            pending_rx,
            in_flight: Mutex::new(HashSet::new()),
        })
    }

    /// Watch receiver for the pending list.
    #[allow(dead_code)]
    pub fn subscribe(&self) -> watch::Receiver<Vec<ApprovalItem>> {
        self.pending_rx.clone()
    }

    /// Latest pending items.
    pub fn pending(&self) -> Vec<ApprovalItem> {
        self.pending_rx.borrow().clone()
    }

    pub fn pending_count(&self) -> usize {
        self.pending_rx.borrow().len()
    }

    pub fn has_urgent_pending(&self) -> bool {
        has_urgent(&self.pending_rx.borrow())
    }

    /// Fetches the pending list and replaces the local copy wholesale.
    pub async fn refresh(&self) -> Result<()> {
        let items = self.client.pending_approvals().await?;
        let _ = self.pending_tx.send(items);
        Ok(())
    }

    /// Spawns the 2-second poll loop. Independent of the stage poller.
    pub fn spawn_poller(self: &Arc<Self>, interval: Duration) -> PollerHandle {
        let center = self.clone();
        let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        // One bounded retry inside the cycle; a failed
                        // cycle keeps the last list and the schedule.
                        let mut result = center.refresh().await;
                        if result.is_err() {
                            result = center.refresh().await;
                        }
                        if let Err(e) = result {
                            tracing::warn!("approval poll failed: {:#}", e);
                            center.logger.log_poll_error("ApprovalCenter", &format!("{:#}", e));
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

    /// Submits a decision for one pending approval.
    ///
    /// Single-flight per approval id; decisions for different items may be
    /// in flight concurrently. Returns `Ok(false)` when a decision for the
    /// same item is already in flight. On success the pending list is
    /// refetched immediately so the decided item disappears without
    /// waiting for the next poll.
    pub async fn decide(
        &self,
        approval_id: &str,
        decision: Decision,
        comment: Option<String>,
    ) -> Result<bool> {
        {
            let mut in_flight = self.in_flight.lock().unwrap();
            if !in_flight.insert(approval_id.to_string()) {
                return Ok(false);
            }
        }

        let payload = ApprovalDecision {
            approval_id: approval_id.to_string(),
            decision,
            comment,
        };
        let result = self.client.submit_approval_decision(&payload).await;
        self.in_flight.lock().unwrap().remove(approval_id);

        match result {
            Ok(()) => {
                self.logger.log_action("decide_approval", approval_id, true);
                if let Err(e) = self.refresh().await {
                    // The poll loop will catch the list up on its next tick.
                    tracing::warn!("refetch after decision failed: {:#}", e);
                }
                Ok(true)
            }
            Err(e) => {
                self.logger.log_action("decide_approval", approval_id, false);
                Err(e)
            }
        }
    }
}
