//! Cron-driven watch loop that triggers pipeline runs.

use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use cron::Schedule as CronSchedule;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::pipeline::{Pipeline, PipelineOutcome};

/// Parse and validate a cron expression.
pub fn parse_schedule(cron_expr: &str) -> Result<CronSchedule> {
    CronSchedule::from_str(cron_expr)
        .map_err(|e| anyhow::anyhow!("Invalid cron expression '{}': {}", cron_expr, e))
}

/// The next `count` fire times after `after`.
pub fn next_runs(schedule: &CronSchedule, after: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
    schedule.after(&after).take(count).collect()
}

/// Run the pipeline on every tick of `cron_expr` until `cancel` fires.
///
/// Each run is spawned so a long validation wait does not delay the next
/// tick; a tick that lands while a run is still in flight is skipped. On
/// cancellation the loop waits for spawned runs to finish before returning.
pub async fn run_watch_loop(pipeline: Arc<Pipeline>, cron_expr: &str, cancel: CancellationToken) -> Result<()> {
    let schedule = parse_schedule(cron_expr)?;
    let runs = TaskTracker::new();
    info!(cron = %cron_expr, "watch loop started");

    loop {
        let Some(next) = next_runs(&schedule, Utc::now(), 1).into_iter().next() else {
            warn!(cron = %cron_expr, "schedule has no future runs");
            break;
        };
        debug!(next = %next, "next scheduled run");
        let wait = (next - Utc::now()).to_std().unwrap_or_default();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("watch loop stopping");
                break;
            }
            _ = tokio::time::sleep(wait) => {}
        }

        let pipeline = pipeline.clone();
        runs.spawn(async move {
            match pipeline.run(None).await {
                Ok(PipelineOutcome::Completed(incident)) => {
                    info!(incident_id = %incident.id, resolved = incident.is_resolved(), "scheduled run finished");
                }
                Ok(outcome) => info!(?outcome, "scheduled run found nothing to do"),
                Err(PipelineError::AlreadyRunning) => warn!("previous run still in flight; tick skipped"),
            }
        });
    }

    runs.close();
    if !runs.is_empty() {
        info!(in_flight = runs.len(), "waiting for in-flight runs");
    }
    runs.wait().await;
    Ok(())
}
