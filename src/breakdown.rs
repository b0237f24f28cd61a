//! Ordered sub-task breakdown tracking with a cancellable auto-start.
//!
//! When a breakdown analysis arrives, two timers run: a 1-second countdown
//! purely for display and a single-shot timer that starts execution after
//! `auto_start_delay`. A manual start races against the single-shot timer;
//! whichever fires first wins through one atomic compare-and-swap, and the
//! loser is a guaranteed no-op. After the start fires, sub-task statuses
//! are driven entirely by external polling.

use crate::model::{BreakdownAnalysis, SubTaskInfo, SubTaskStatus};
use anyhow::Result;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Callback invoked exactly once when execution starts.
pub type StartExecution = Arc<dyn Fn() + Send + Sync>;

pub struct TaskBreakdownTracker {
    analysis: Mutex<BreakdownAnalysis>,
    started: Arc<AtomicBool>,
    on_start: StartExecution,
    countdown_tx: Arc<watch::Sender<u64>>,
    countdown_rx: watch::Receiver<u64>,
    countdown_task: Mutex<Option<JoinHandle<()>>>,
    auto_task: Mutex<Option<JoinHandle<()>>>,
    manual_expanded: Mutex<HashSet<u32>>,
}

impl TaskBreakdownTracker {
    /// Accepts a validated analysis and arms both timers.
    ///
    /// # Errors
    ///
    /// Returns an error if the analysis violates its structural invariants
    /// (sequence contiguity, single processing sub-task).
    pub fn new(
        analysis: BreakdownAnalysis,
        auto_start_delay: Duration,
        on_start: StartExecution,
    ) -> Result<Self> {
        analysis.validate()?;

        let started = Arc::new(AtomicBool::new(false));
        let initial = auto_start_delay.as_millis().div_ceil(1000) as u64;
        let (tx, countdown_rx) = watch::channel(initial);
        let countdown_tx = Arc::new(tx);

        let auto_task = {
            let started = started.clone();
            let on_start = on_start.clone();
            let countdown_tx = countdown_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(auto_start_delay).await;
                try_fire(&started, on_start.as_ref(), &countdown_tx);
            })
        };

        let countdown_task = {
            let started = started.clone();
            let countdown_tx = countdown_tx.clone();
            tokio::spawn(async move {
                let mut remaining = initial;
                while remaining > 0 {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    if started.load(Ordering::SeqCst) {
                        break;
                    }
                    remaining -= 1;
                    let _ = countdown_tx.send(remaining);
                }
            })
        };

        Ok(Self {
            analysis: Mutex::new(analysis),
            started,
            on_start,
            countdown_tx,
            countdown_rx,
            countdown_task: Mutex::new(Some(countdown_task)),
            auto_task: Mutex::new(Some(auto_task)),
            manual_expanded: Mutex::new(HashSet::new()),
        })
    }

    /// Starts execution immediately if the auto timer has not yet fired.
    ///
    /// Cancels both timers and performs the exact transition the auto
    /// timer would have performed. Returns false when the start already
    /// happened, in which case this call changed nothing.
    pub fn start_now(&self) -> bool {
        let fired = try_fire(&self.started, self.on_start.as_ref(), &self.countdown_tx);
        if fired {
            self.cancel_timers();
        }
        fired
    }

    pub fn has_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Seconds shown on the countdown display right now.
    pub fn countdown_seconds(&self) -> u64 {
        *self.countdown_rx.borrow()
    }

    /// Watch receiver for countdown display updates.
    #[allow(dead_code)]
    pub fn subscribe_countdown(&self) -> watch::Receiver<u64> {
        self.countdown_rx.clone()
    }

    /// Replaces sub-task statuses with the latest polled collection.
    /// Full replace, never a merge; the collection is server-owned.
    pub fn apply_statuses(&self, analysis: BreakdownAnalysis) -> Result<()> {
        analysis.validate()?;
        *self.analysis.lock().unwrap() = analysis;
        Ok(())
    }

    pub fn sub_tasks(&self) -> Vec<SubTaskInfo> {
        self.analysis.lock().unwrap().sub_tasks.clone()
    }

    pub fn reasoning(&self) -> String {
        self.analysis.lock().unwrap().reasoning.clone()
    }

    /// Sequence of the sub-task currently processing, if any.
    pub fn processing_sequence(&self) -> Option<u32> {
        self.analysis
            .lock()
            .unwrap()
            .sub_tasks
            .iter()
            .find(|t| t.status == SubTaskStatus::Processing)
            .map(|t| t.sequence)
    }

    /// Toggles the user's manual expansion of one sub-task.
    #[allow(dead_code)]
    pub fn toggle_expanded(&self, sequence: u32) {
        let mut expanded = self.manual_expanded.lock().unwrap();
        if !expanded.remove(&sequence) {
            expanded.insert(sequence);
        }
    }

    /// A sub-task displays expanded when the user expanded it or when it is
    /// the one currently processing. The implicit expansion never clears a
    /// manual one.
    pub fn is_expanded(&self, sequence: u32) -> bool {
        if self.manual_expanded.lock().unwrap().contains(&sequence) {
            return true;
        }
        self.processing_sequence() == Some(sequence)
    }

    fn cancel_timers(&self) {
        if let Some(task) = self.auto_task.lock().unwrap().take() {
            task.abort();
        }
        if let Some(task) = self.countdown_task.lock().unwrap().take() {
            task.abort();
        }
    }
}

impl Drop for TaskBreakdownTracker {
    fn drop(&mut self) {
        self.cancel_timers();
    }
}

/// The single place the started flag flips. Winner invokes the callback
/// and forces the countdown display to zero; the loser observes the swap
/// failure and does nothing.
fn try_fire(
    started: &AtomicBool,
    on_start: &(dyn Fn() + Send + Sync),
    countdown_tx: &watch::Sender<u64>,
) -> bool {
    if started
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
    {
        let _ = countdown_tx.send(0);
        on_start();
        true
    } else {
        false
    }
}
