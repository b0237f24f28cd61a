mod approval_center;
mod approval_gate;
mod breakdown;
mod client;
mod config;
mod model;
mod orchestrator;
mod poller;
mod retry;
mod stage_machine;
mod structured_logger;

#[cfg(test)]
mod test_support;

use anyhow::Result;
use approval_center::display_count;
use clap::Parser;
use client::HttpExecutionClient;
use config::OrchestratorConfig;
use model::{Decision, Stage};
use orchestrator::Orchestrator;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "resolution")]
#[command(about = "Orchestrator for an externally-executed issue-resolution pipeline")]
#[command(version)]
struct Cli {
    /// Resolution job to orchestrate
    job_id: String,

    /// Base URL of the execution service (overrides the config file)
    #[arg(long)]
    base_url: Option<String>,

    /// Path to a YAML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Stage poll interval in milliseconds (overrides the config file)
    #[arg(long)]
    poll_interval_ms: Option<u64>,

    /// Approve the plan as soon as the planning gate opens
    #[arg(long)]
    auto_approve: bool,

    /// Retry a failed stage automatically instead of stopping at it
    #[arg(long)]
    auto_retry: bool,

    /// Approve pending tool/action requests as they appear (unattended runs)
    #[arg(long)]
    approve_pending: bool,

    /// Start breakdown execution immediately, skipping the countdown
    #[arg(long)]
    no_countdown: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = OrchestratorConfig::load_or_default(cli.config.as_deref())?;
    if let Some(base_url) = &cli.base_url {
        config.base_url = base_url.clone();
    }
    if let Some(interval) = cli.poll_interval_ms {
        config.poll_interval_ms = interval;
    }

    let client = Arc::new(HttpExecutionClient::new(config.base_url.clone())?);
    let orchestrator = Orchestrator::new(client, config, cli.job_id.clone())?;

    println!("[session] Orchestrator session ID: {}", orchestrator.logger().session_id());
    println!("[session] Event log: {}", orchestrator.logger().path().display());
    println!("[session] Watching job {}", orchestrator.job_id());

    orchestrator.start();
    let exit = run_headless(&cli, &orchestrator).await;
    orchestrator.shutdown().await;
    exit
}

/// Follows the job from the terminal: prints stage transitions, surfaces
/// failures and the planning gate, and tracks the breakdown countdown.
async fn run_headless(cli: &Cli, orchestrator: &Orchestrator) -> Result<()> {
    let mut views = orchestrator.subscribe_stages();
    let mut ticker = tokio::time::interval(Duration::from_secs(1));

    let mut last_stage: Option<Stage> = None;
    let mut last_error: Option<String> = None;
    let mut was_stale = false;
    let mut last_pending = 0usize;
    let mut last_countdown: Option<u64> = None;
    let mut last_processing: Option<u32> = None;
    let mut breakdown_attempted = false;
    let mut gate_announced = false;

    loop {
        tokio::select! {
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = orchestrator.stage_view();

                if last_stage != Some(view.current_stage) {
                    println!("[stage] {} ({})", view.current_stage, view.current_stage.short());
                    last_stage = Some(view.current_stage);
                }

                if view.is_stale() {
                    if !was_stale {
                        println!("[poll] showing last known state ({})",
                            view.last_poll_error.as_deref().unwrap_or("poll failed"));
                        was_stale = true;
                    }
                } else {
                    was_stale = false;
                }

                if view.failed {
                    if view.error_message != last_error {
                        println!(
                            "[error] stage {} failed: {}",
                            view.current_stage,
                            view.error_message.as_deref().unwrap_or("unknown error")
                        );
                        last_error = view.error_message.clone();
                        if cli.auto_retry {
                            match orchestrator.retry_stage(view.current_stage).await {
                                Ok(true) => println!("[retry] retry submitted"),
                                Ok(false) => {}
                                Err(e) => println!("[retry] retry failed: {:#}", e),
                            }
                        }
                    }
                } else {
                    last_error = None;
                }

                if orchestrator.plan_gate_exposed() {
                    if cli.auto_approve && !orchestrator.plan_approved() {
                        match orchestrator.approve_plan(None).await {
                            Ok(true) => println!("[gate] plan approved"),
                            Ok(false) => {}
                            Err(e) => println!("[gate] approval failed: {:#}", e),
                        }
                    } else if !cli.auto_approve && !gate_announced {
                        gate_announced = true;
                        println!("[gate] planning awaits approval (re-run with --auto-approve)");
                    }
                } else {
                    gate_announced = false;
                }

                if view.current_stage >= Stage::Implementation && !breakdown_attempted {
                    breakdown_attempted = true;
                    load_breakdown(cli, orchestrator).await;
                }

                if view.is_terminal() {
                    print_summary(orchestrator);
                    break;
                }
            }
            _ = ticker.tick() => {
                report_approvals(cli, orchestrator, &mut last_pending).await;
                report_breakdown(orchestrator, &mut last_countdown, &mut last_processing).await;
            }
        }
    }

    Ok(())
}

async fn load_breakdown(cli: &Cli, orchestrator: &Orchestrator) {
    let result = orchestrator
        .load_breakdown(Arc::new(|| println!("[breakdown] execution started")))
        .await;
    match result {
        Ok(tracker) => {
            println!(
                "[breakdown] {} sub-tasks: {}",
                tracker.sub_tasks().len(),
                tracker.reasoning()
            );
            if cli.no_countdown {
                orchestrator.start_breakdown_now();
            }
        }
        // Jobs without a breakdown are normal; nothing to track.
        Err(e) => println!("[breakdown] none available: {:#}", e),
    }
}

async fn report_approvals(cli: &Cli, orchestrator: &Orchestrator, last_pending: &mut usize) {
    let pending = orchestrator.pending_approvals();
    if orchestrator.pending_count() != *last_pending {
        *last_pending = orchestrator.pending_count();
        println!(
            "[approvals] {} pending{}",
            display_count(orchestrator.pending_count()),
            if orchestrator.has_urgent_pending() { " (urgent)" } else { "" }
        );
        for item in &pending {
            println!(
                "[approvals]   {}: {}",
                item.id,
                item.display_text.as_deref().unwrap_or("(no description)")
            );
        }
    }
    if cli.approve_pending {
        for item in pending {
            match orchestrator
                .decide_approval(&item.id, Decision::Approved, None)
                .await
            {
                Ok(true) => println!("[approvals] approved {}", item.id),
                Ok(false) => {}
                Err(e) => println!("[approvals] decision for {} failed: {:#}", item.id, e),
            }
        }
    }
}

async fn report_breakdown(
    orchestrator: &Orchestrator,
    last_countdown: &mut Option<u64>,
    last_processing: &mut Option<u32>,
) {
    let Some(tracker) = orchestrator.breakdown() else {
        return;
    };

    if !tracker.has_started() {
        let seconds = tracker.countdown_seconds();
        if *last_countdown != Some(seconds) {
            *last_countdown = Some(seconds);
            println!("[breakdown] auto-start in {}s", seconds);
        }
        return;
    }

    if let Err(e) = orchestrator.refresh_breakdown().await {
        println!("[breakdown] status poll failed: {:#}", e);
        return;
    }
    let processing = tracker.processing_sequence();
    if processing != *last_processing {
        *last_processing = processing;
        if let Some(sequence) = processing {
            for task in tracker.sub_tasks() {
                if task.sequence == sequence && tracker.is_expanded(sequence) {
                    println!("[breakdown] running {}/{}: {}",
                        task.sequence,
                        tracker.sub_tasks().len(),
                        task.title
                    );
                }
            }
        }
    }
}

fn print_summary(orchestrator: &Orchestrator) {
    let view = orchestrator.stage_view();
    println!("[done] handoff complete after {} snapshots", view.snapshots_observed);
    for stage in Stage::ALL {
        let status = view.stage(stage);
        println!(
            "[done]   {} {}{}",
            if status.complete { "x" } else { " " },
            stage,
            if status.approved { " (approved)" } else { "" }
        );
    }
}
