//! Administrative controls over the queue and its worker pool.

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use reel_queue::{CleanReport, CompositionQueue, EntryState, QueueCounts};

use crate::error::WorkerResult;
use crate::executor::WorkerPool;
use crate::metrics;

/// Completed entries older than this are removed by `clean_default`.
pub const DEFAULT_COMPLETED_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_COMPLETED_LIMIT: usize = 100;
/// Failed entries older than this are removed by `clean_default`.
pub const DEFAULT_FAILED_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);
pub const DEFAULT_FAILED_LIMIT: usize = 50;

#[derive(Clone)]
pub struct QueueAdmin {
    queue: Arc<CompositionQueue>,
    pool: Arc<WorkerPool>,
}

impl QueueAdmin {
    pub fn new(queue: Arc<CompositionQueue>, pool: Arc<WorkerPool>) -> Self {
        Self { queue, pool }
    }

    /// Point-in-time entry counts by state.
    pub async fn status(&self) -> QueueCounts {
        let counts = self.queue.counts().await;
        metrics::set_queue_counts(&counts);
        counts
    }

    /// Stop dispatching. Jobs already running finish normally.
    pub fn pause(&self) -> bool {
        self.pool.pause()
    }

    pub fn resume(&self) -> bool {
        self.pool.resume()
    }

    pub fn is_paused(&self) -> bool {
        self.pool.is_paused()
    }

    /// Remove completed and failed entries older than the given ages,
    /// oldest first, at most `max_count` in total.
    pub async fn clean(
        &self,
        max_age_completed: Duration,
        max_age_failed: Duration,
        max_count: usize,
    ) -> WorkerResult<CleanReport> {
        let report = self
            .queue
            .clean(max_age_completed, max_age_failed, max_count)
            .await?;
        info!(
            completed = report.completed,
            failed = report.failed,
            "Cleaned queue entries"
        );
        Ok(report)
    }

    /// Routine cleanup: completed after a day (up to 100), failed after a
    /// week (up to 50).
    pub async fn clean_default(&self) -> WorkerResult<CleanReport> {
        let completed = self
            .queue
            .clean_state(EntryState::Completed, DEFAULT_COMPLETED_MAX_AGE, DEFAULT_COMPLETED_LIMIT)
            .await?;
        let failed = self
            .queue
            .clean_state(EntryState::Failed, DEFAULT_FAILED_MAX_AGE, DEFAULT_FAILED_LIMIT)
            .await?;

        let report = CleanReport { completed, failed };
        if report.total() > 0 {
            info!(completed, failed, "Cleaned old queue entries");
        }
        Ok(report)
    }
}
