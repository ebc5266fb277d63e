//! Per-run job logging.
//!
//! Every event a run emits carries the job id, the operation and the run
//! number, so one composition can be followed across workers and retries.

use std::time::Duration;
use tracing::{debug, error, info, warn, Span};

use reel_models::JobId;

#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: JobId,
    operation: &'static str,
    run: u32,
}

impl JobLogger {
    /// Logger for the first run of `operation` on `job_id`.
    pub fn new(job_id: &JobId, operation: &'static str) -> Self {
        Self {
            job_id: job_id.clone(),
            operation,
            run: 1,
        }
    }

    /// Tag events with the 1-based run number.
    pub fn with_attempt(self, run: u32) -> Self {
        Self { run: run.max(1), ..self }
    }

    pub fn log_start(&self, detail: &str) {
        info!(
            job_id = %self.job_id,
            operation = self.operation,
            run = self.run,
            "Run started: {detail}"
        );
    }

    pub fn log_progress(&self, detail: &str) {
        info!(job_id = %self.job_id, operation = self.operation, "{detail}");
    }

    /// A pipeline stage finished after `elapsed`.
    pub fn log_stage(&self, stage: &str, elapsed: Duration) {
        debug!(
            job_id = %self.job_id,
            operation = self.operation,
            stage,
            elapsed_ms = elapsed.as_millis() as u64,
            "Stage done"
        );
    }

    pub fn log_warning(&self, detail: &str) {
        warn!(
            job_id = %self.job_id,
            operation = self.operation,
            run = self.run,
            "{detail}"
        );
    }

    pub fn log_error(&self, detail: &str) {
        error!(
            job_id = %self.job_id,
            operation = self.operation,
            run = self.run,
            "{detail}"
        );
    }

    pub fn log_completion(&self, detail: &str) {
        info!(
            job_id = %self.job_id,
            operation = self.operation,
            run = self.run,
            "Run completed: {detail}"
        );
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }

    pub fn attempt(&self) -> u32 {
        self.run
    }

    /// Span wrapping everything a run does, including encoder output.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            operation = self.operation,
            run = self.run
        )
    }
}
