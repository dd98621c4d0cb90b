// crates/server/src/janitor.rs
//! Periodic housekeeping for the job store: fails jobs that stopped
//! reporting progress and forgets old terminal jobs.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use diligence_core::ProjectEvent;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::jobs::JobKind;
use crate::state::AppState;

#[derive(Debug, Clone, Copy)]
pub struct JanitorSettings {
    pub interval: Duration,
    /// A non-terminal job untouched for this long is failed.
    pub stale_after: Duration,
    /// Terminal jobs older than this are removed.
    pub retention: Duration,
}

impl Default for JanitorSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            stale_after: Duration::from_secs(900),
            retention: Duration::from_secs(86_400),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub stale_failed: usize,
    pub removed: usize,
}

fn cutoff(now: DateTime<Utc>, age: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(age)
        .ok()
        .and_then(|age| now.checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// One pass over the job store.
pub async fn sweep(state: &AppState, settings: &JanitorSettings, now: DateTime<Utc>) -> SweepReport {
    let mut report = SweepReport::default();

    let stale_cutoff = cutoff(now, settings.stale_after);
    for job in state.jobs.non_terminal() {
        if job.snapshot().updated_at >= stale_cutoff {
            continue;
        }
        let error = format!("no progress for {}s", settings.stale_after.as_secs());
        let revert =
            (job.kind() == JobKind::GenerateAnswers).then_some(ProjectEvent::GenerationFailed);
        if !state.runner.fail_job(&job, &error, revert).await {
            continue;
        }
        report.stale_failed += 1;
        warn!(job_id = %job.id(), kind = %job.kind(), "failed stale job");
    }

    let retention_cutoff = cutoff(now, settings.retention);
    for job in state.jobs.terminal_before(retention_cutoff) {
        match state.jobs.remove(job.id()).await {
            Ok(true) => report.removed += 1,
            Ok(false) => {}
            Err(e) => warn!(job_id = %job.id(), error = %e, "failed to remove expired job"),
        }
    }

    if report != SweepReport::default() {
        info!(
            stale_failed = report.stale_failed,
            removed = report.removed,
            "job sweep complete"
        );
    }
    report
}

/// Run [`sweep`] every `settings.interval` until the runtime shuts down.
pub fn spawn(state: Arc<AppState>, settings: JanitorSettings) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(settings.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            sweep(&state, &settings, Utc::now()).await;
        }
    })
}
