//! Application metrics for Prometheus monitoring.
//!
//! This module provides:
//! - Prometheus metrics recorder initialization
//! - Metric definitions (counters, histograms, gauges)
//! - Helper functions for recording job metrics

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;

use crate::jobs::{JobKind, JobStatus};

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Call once at startup, before any metrics are recorded. Returns `true` if
/// this call installed the recorder, `false` if already initialized.
/// Concurrent callers wait until the handle is available.
pub fn init_metrics() -> bool {
    let mut installed = false;
    PROMETHEUS_HANDLE.get_or_init(|| {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        if metrics::set_global_recorder(recorder).is_err() {
            tracing::warn!("Failed to set global metrics recorder (already set)");
        }
        installed = true;
        handle
    });

    if installed {
        describe_metrics();
        tracing::info!("Prometheus metrics initialized");
    }
    installed
}

fn describe_metrics() {
    describe_counter!("jobs_submitted_total", "Jobs accepted, by kind");
    describe_counter!(
        "jobs_finished_total",
        "Jobs that reached a terminal status, by kind and status"
    );
    describe_histogram!(
        "job_duration_seconds",
        "Wall-clock time from a job starting to its terminal status"
    );
    describe_counter!(
        "jobs_rejected_total",
        "Submissions refused, by reason (validation, not_found, conflict)"
    );
    describe_gauge!("jobs_in_flight", "Jobs currently executing");
}

/// Render current metrics in Prometheus text format.
///
/// Returns `None` if metrics are not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|h| h.render())
}

pub fn record_job_submitted(kind: JobKind) {
    counter!("jobs_submitted_total", "kind" => kind.as_str()).increment(1);
}

pub fn record_job_rejected(reason: &'static str) {
    counter!("jobs_rejected_total", "reason" => reason).increment(1);
}

pub fn record_job_finished(kind: JobKind, status: JobStatus, duration: Option<Duration>) {
    counter!(
        "jobs_finished_total",
        "kind" => kind.as_str(),
        "status" => status.as_str()
    )
    .increment(1);
    if let Some(duration) = duration {
        histogram!("job_duration_seconds", "kind" => kind.as_str()).record(duration.as_secs_f64());
    }
}

/// Counts a job in `jobs_in_flight` until dropped, including when its task
/// is aborted.
pub struct InFlightGuard;

impl InFlightGuard {
    pub fn new() -> Self {
        gauge!("jobs_in_flight").increment(1.0);
        Self
    }
}

impl Default for InFlightGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        gauge!("jobs_in_flight").decrement(1.0);
    }
}
