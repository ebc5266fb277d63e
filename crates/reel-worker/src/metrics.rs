//! Prometheus metrics for the worker.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;

use reel_queue::QueueCounts;

/// Install the Prometheus recorder with an HTTP listener on `addr`.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()
}

/// Metric names as constants for consistency.
pub mod names {
    // Job lifecycle
    pub const JOBS_ENQUEUED_TOTAL: &str = "reel_jobs_enqueued_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "reel_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "reel_jobs_failed_total";
    pub const JOBS_RETRIED_TOTAL: &str = "reel_jobs_retried_total";
    pub const JOB_DURATION_SECONDS: &str = "reel_job_duration_seconds";

    // Pipeline
    pub const STAGE_DURATION_SECONDS: &str = "reel_stage_duration_seconds";
    pub const SCENES_SKIPPED_TOTAL: &str = "reel_scenes_skipped_total";

    // Queue and pool
    pub const QUEUE_ENTRIES: &str = "reel_queue_entries";
    pub const WORKERS_BUSY: &str = "reel_workers_busy";
}

pub fn record_job_enqueued(priority: i32) {
    let labels = [("priority", priority.to_string())];
    counter!(names::JOBS_ENQUEUED_TOTAL, &labels).increment(1);
}

pub fn record_job_completed(duration_secs: f64) {
    counter!(names::JOBS_COMPLETED_TOTAL).increment(1);
    histogram!(names::JOB_DURATION_SECONDS).record(duration_secs);
}

pub fn record_job_failed(permanent: bool) {
    let kind = if permanent { "permanent" } else { "exhausted" };
    let labels = [("kind", kind.to_string())];
    counter!(names::JOBS_FAILED_TOTAL, &labels).increment(1);
}

pub fn record_job_retried(attempts: u32) {
    let labels = [("attempt", attempts.to_string())];
    counter!(names::JOBS_RETRIED_TOTAL, &labels).increment(1);
}

pub fn record_stage_duration(stage: &str, duration_secs: f64) {
    let labels = [("stage", stage.to_string())];
    histogram!(names::STAGE_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn record_scene_skipped() {
    counter!(names::SCENES_SKIPPED_TOTAL).increment(1);
}

pub fn set_queue_counts(counts: &QueueCounts) {
    for (state, value) in [
        ("waiting", counts.waiting),
        ("active", counts.active),
        ("completed", counts.completed),
        ("failed", counts.failed),
    ] {
        let labels = [("state", state.to_string())];
        gauge!(names::QUEUE_ENTRIES, &labels).set(value as f64);
    }
}

pub fn set_workers_busy(count: usize) {
    gauge!(names::WORKERS_BUSY).set(count as f64);
}
