//! Queued-job dispatcher.
//!
//! A supervised loop polls queued jobs every tick and claims each with a
//! compare-and-set on the status, so exactly one dispatcher instance holds
//! the lease per job. Claimed jobs execute as independent tasks.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error};

use crate::core::JobStatus;
use crate::error::Result;
use crate::jobs::Orchestrator;

/// Dispatcher poll interval.
pub const DISPATCH_TICK: Duration = Duration::from_secs(5);

/// Maximum queued jobs claimed per tick.
pub const DISPATCH_BATCH: usize = 10;

/// Claims and launches queued jobs once. Returns how many were claimed.
///
/// # Errors
///
/// Returns an error if the queued-job query fails; individual claim
/// failures only skip that job.
pub async fn dispatch_once(orchestrator: &Arc<Orchestrator>) -> Result<usize> {
    let queued = orchestrator.store().list_jobs(JobStatus::Queued, DISPATCH_BATCH)?;
    let mut claimed = 0usize;

    for job in queued {
        let won = orchestrator.store().cas_job_status(
            &job.id,
            JobStatus::Queued,
            JobStatus::Running,
            Some("starting job execution"),
        )?;
        if !won {
            debug!(job = %job.id, "lost dispatch race");
            continue;
        }
        claimed += 1;

        let orchestrator = Arc::clone(orchestrator);
        let mut running = job;
        running.status = JobStatus::Running;
        tokio::spawn(async move {
            orchestrator.execute_job(running).await;
        });
    }

    Ok(claimed)
}

/// Supervised dispatcher loop; exits when the shutdown signal flips.
pub async fn run_dispatcher(orchestrator: Arc<Orchestrator>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(DISPATCH_TICK);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = dispatch_once(&orchestrator).await {
                    error!(error = %e, "dispatch tick failed");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
