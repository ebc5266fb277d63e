//! Composition service: the queue, the worker pool and the job store
//! wired together behind one handle.
//!
//! Construct one `QueueService` at process start, call [`QueueService::start`]
//! and hand clones of it to whatever accepts requests.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use reel_media::{MediaEncoder, TempWorkspace};
use reel_models::{
    CompositionJob, CompositionOptions, ExportOptions, JobId, JobStatus, JobType,
};
use reel_queue::{ComposeMovieJob, CompositionQueue, EnqueueOptions, QueueEntry, QueueError};

use crate::admin::QueueAdmin;
use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::executor::WorkerPool;
use crate::metrics;
use crate::store::{JobStore, SceneCatalog};

/// Default page size for `history`.
pub const DEFAULT_HISTORY_LIMIT: usize = 10;
/// Number of most recent jobs `stats` looks at.
pub const STATS_WINDOW: usize = 100;

/// A request to compose a project's scenes into a movie.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposeRequest {
    pub project_id: String,
    pub user_id: String,
    #[serde(default)]
    pub options: CompositionOptions,
    /// Id of the `queued` record already in the job store
    pub job_store_id: JobId,
}

/// Answer to a status query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusView {
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&CompositionJob> for JobStatusView {
    fn from(job: &CompositionJob) -> Self {
        Self {
            status: job.status,
            output: job.output.as_ref().map(|o| o.url().to_string()),
            error: job.error.clone(),
        }
    }
}

/// Aggregate over a user's recent jobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingStats {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub processing: usize,
    /// Mean of `completedAt - startedAt` over completed jobs, in ms
    pub average_processing_time_ms: u64,
}

#[derive(Clone)]
pub struct QueueService {
    config: WorkerConfig,
    queue: Arc<CompositionQueue>,
    jobs: Arc<dyn JobStore>,
    pool: Arc<WorkerPool>,
    admin: QueueAdmin,
}

impl QueueService {
    pub fn new(
        config: WorkerConfig,
        queue: CompositionQueue,
        jobs: Arc<dyn JobStore>,
        scenes: Arc<dyn SceneCatalog>,
        encoder: Arc<dyn MediaEncoder>,
    ) -> Self {
        let queue = Arc::new(queue);
        let pool = Arc::new(WorkerPool::new(
            config.clone(),
            Arc::clone(&queue),
            Arc::clone(&jobs),
            scenes,
            encoder,
        ));
        let admin = QueueAdmin::new(Arc::clone(&queue), Arc::clone(&pool));

        Self {
            config,
            queue,
            jobs,
            pool,
            admin,
        }
    }

    /// Remove workspaces left by a previous run, then start the workers.
    pub async fn start(&self) -> WorkerResult<()> {
        let swept = TempWorkspace::sweep_orphans(&self.config.work_dir).await?;
        if swept > 0 {
            info!(swept, work_dir = %self.config.work_dir.display(), "Removed orphaned workspaces");
        }
        self.pool.start().await
    }

    /// Stop dispatching and wait for in-flight jobs, up to the configured
    /// shutdown timeout.
    pub async fn stop(&self) {
        self.pool.stop().await;
    }

    pub fn admin(&self) -> &QueueAdmin {
        &self.admin
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Queue a composition for a `queued` record the caller already created.
    ///
    /// Returns the queue entry id.
    pub async fn enqueue(&self, request: ComposeRequest) -> WorkerResult<String> {
        request.options.validate()?;

        let record = self
            .jobs
            .get(&request.job_store_id)
            .await?
            .filter(|job| job.user_id == request.user_id)
            .ok_or_else(|| WorkerError::JobNotFound(request.job_store_id.to_string()))?;
        if record.status != JobStatus::Queued {
            return Err(WorkerError::InvalidState {
                job_id: record.id.to_string(),
                status: record.status,
            });
        }

        let enqueue_options = EnqueueOptions::default()
            .with_priority(request.options.priority.unwrap_or(0))
            .with_delay(Duration::from_millis(request.options.delay.unwrap_or(0)));
        let job = ComposeMovieJob::new(
            request.job_store_id,
            request.user_id,
            request.project_id,
            request.options,
        );

        let entry = self.queue.enqueue(job, enqueue_options).await?;
        metrics::record_job_enqueued(entry.priority);
        Ok(entry.id)
    }

    /// Create the job record and queue it in one step.
    pub async fn submit(
        &self,
        user_id: &str,
        project_id: &str,
        options: CompositionOptions,
    ) -> WorkerResult<(JobId, String)> {
        options.validate()?;
        let record = CompositionJob::new_compose_movie(user_id, project_id, options.clone());
        let job_id = record.id.clone();
        self.jobs.create(record).await?;

        let request = ComposeRequest {
            project_id: project_id.to_string(),
            user_id: user_id.to_string(),
            options,
            job_store_id: job_id.clone(),
        };
        match self.enqueue(request).await {
            Ok(entry_id) => Ok((job_id, entry_id)),
            Err(e) => {
                // Do not leave a queued record nothing will ever pick up.
                self.jobs.delete(&job_id).await.ok();
                Err(e)
            }
        }
    }

    /// Status of a job owned by `user_id`; `None` if unknown to this user.
    pub async fn job_status(
        &self,
        job_id: &JobId,
        user_id: &str,
    ) -> WorkerResult<Option<JobStatusView>> {
        Ok(self
            .owned_job(job_id, user_id)
            .await?
            .as_ref()
            .map(JobStatusView::from))
    }

    /// Scheduling record of a queue entry, while the queue retains it.
    pub async fn entry(&self, entry_id: &str) -> Option<QueueEntry> {
        self.queue.get(entry_id).await
    }

    /// A user's movie jobs, newest first.
    pub async fn history(
        &self,
        user_id: &str,
        limit: Option<usize>,
    ) -> WorkerResult<Vec<CompositionJob>> {
        self.jobs
            .list_for_user(user_id, Some(JobType::Video), limit.unwrap_or(DEFAULT_HISTORY_LIMIT))
            .await
    }

    /// Counts and mean processing time over the user's latest jobs.
    pub async fn stats(&self, user_id: &str) -> WorkerResult<ProcessingStats> {
        let jobs = self.jobs.list_for_user(user_id, None, STATS_WINDOW).await?;

        let mut stats = ProcessingStats {
            total: jobs.len(),
            ..Default::default()
        };
        let mut timed = Vec::new();
        for job in &jobs {
            match job.status {
                JobStatus::Completed => {
                    stats.completed += 1;
                    if let Some(ms) = job.processing_time_ms() {
                        timed.push(ms.max(0) as u64);
                    }
                }
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Processing => stats.processing += 1,
                JobStatus::Queued => {}
            }
        }
        if !timed.is_empty() {
            stats.average_processing_time_ms = timed.iter().sum::<u64>() / timed.len() as u64;
        }

        Ok(stats)
    }

    /// Delete a job owned by `user_id`.
    ///
    /// Terminal jobs are deleted together with any retained queue entry. A
    /// job still waiting in the queue is cancelled. A job that is being
    /// processed cannot be deleted.
    pub async fn delete_job(&self, job_id: &JobId, user_id: &str) -> WorkerResult<()> {
        let record = self
            .owned_job(job_id, user_id)
            .await?
            .ok_or_else(|| WorkerError::JobNotFound(job_id.to_string()))?;

        let busy = || WorkerError::InvalidState {
            job_id: job_id.to_string(),
            status: JobStatus::Processing,
        };
        if record.status == JobStatus::Processing {
            return Err(busy());
        }

        match self.queue.remove_job(job_id).await {
            Ok(_) => {}
            Err(QueueError::EntryActive(_)) => return Err(busy()),
            Err(e) => return Err(e.into()),
        }
        self.jobs.delete(job_id).await?;

        info!(job_id = %job_id, status = %record.status, "Deleted job");
        Ok(())
    }

    /// Export settings offered to clients.
    pub fn export_options(&self) -> ExportOptions {
        ExportOptions::catalog()
    }

    async fn owned_job(&self, job_id: &JobId, user_id: &str) -> WorkerResult<Option<CompositionJob>> {
        Ok(self
            .jobs
            .get(job_id)
            .await?
            .filter(|job| job.user_id == user_id))
    }
}
