//! Worker pool.
//!
//! `concurrency` long-lived loops each claim one queue entry at a time, so
//! the number of active entries never exceeds the pool size. Idle loops
//! sleep until an enqueue or retry wakes them, the next delayed entry
//! becomes eligible, or the poll interval passes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn, Instrument};

use reel_media::{MediaEncoder, TempWorkspace};
use reel_models::{completed_in_order, ComposeMovieOutput, CompositionJob, JobId, JobOutput, JobStatus};
use reel_queue::{AckDisposition, CompositionQueue, Outcome, QueueEntry};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::pipeline::{Pipeline, PipelineOutput};
use crate::retry::{with_retries, ErrorStreak, WritePolicy};
use crate::store::{JobStore, SceneCatalog};

const OPERATION: &str = "compose_movie";

/// Lifecycle of the pool, broadcast to every worker loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Running,
    /// In-flight jobs finish; nothing new is claimed
    Paused,
    Stopped,
}

/// Per-job work shared by all loops.
struct JobRunner {
    config: WorkerConfig,
    queue: Arc<CompositionQueue>,
    jobs: Arc<dyn JobStore>,
    scenes: Arc<dyn SceneCatalog>,
    pipeline: Pipeline,
    store_retry: WritePolicy,
    busy: AtomicUsize,
}

/// What claiming an entry found in the job store.
enum Claim {
    /// Record moved to `processing`; run the pipeline
    Run,
    /// Record already terminal, e.g. settled just before a restart
    Settled(JobStatus),
}

pub struct WorkerPool {
    runner: Arc<JobRunner>,
    control: watch::Sender<PoolState>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(
        config: WorkerConfig,
        queue: Arc<CompositionQueue>,
        jobs: Arc<dyn JobStore>,
        scenes: Arc<dyn SceneCatalog>,
        encoder: Arc<dyn MediaEncoder>,
    ) -> Self {
        let pipeline = Pipeline::new(encoder, &config);
        let (control, _) = watch::channel(PoolState::Running);

        Self {
            runner: Arc::new(JobRunner {
                config,
                queue,
                jobs,
                scenes,
                pipeline,
                store_retry: WritePolicy::job_store(),
                busy: AtomicUsize::new(0),
            }),
            control,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the worker loops. Calling it again while running is a no-op.
    pub async fn start(&self) -> WorkerResult<()> {
        if self.state() == PoolState::Stopped {
            return Err(WorkerError::Stopped);
        }

        let mut handles = self.handles.lock().await;
        if !handles.is_empty() {
            return Ok(());
        }

        let concurrency = self.runner.config.concurrency.max(1);
        for index in 0..concurrency {
            let runner = Arc::clone(&self.runner);
            let control = self.control.subscribe();
            handles.push(tokio::spawn(worker_loop(index, runner, control)));
        }

        info!(concurrency, paused = self.is_paused(), "Worker pool started");
        Ok(())
    }

    /// Stop claiming new entries. Returns `false` if not running.
    pub fn pause(&self) -> bool {
        let paused = self.control.send_if_modified(|state| {
            if *state == PoolState::Running {
                *state = PoolState::Paused;
                true
            } else {
                false
            }
        });
        if paused {
            info!("Worker pool paused");
        }
        paused
    }

    /// Resume claiming. Returns `false` if not paused.
    pub fn resume(&self) -> bool {
        let resumed = self.control.send_if_modified(|state| {
            if *state == PoolState::Paused {
                *state = PoolState::Running;
                true
            } else {
                false
            }
        });
        if resumed {
            info!("Worker pool resumed");
        }
        resumed
    }

    pub fn state(&self) -> PoolState {
        *self.control.borrow()
    }

    pub fn is_paused(&self) -> bool {
        self.state() == PoolState::Paused
    }

    /// Jobs currently being processed.
    pub fn busy(&self) -> usize {
        self.runner.busy.load(Ordering::SeqCst)
    }

    /// Stop claiming, then wait up to `shutdown_timeout` for in-flight
    /// jobs. Loops still running after that are aborted; their entries stay
    /// `active` and are reset on the next restore.
    pub async fn stop(&self) {
        self.control.send_replace(PoolState::Stopped);

        let mut handles = std::mem::take(&mut *self.handles.lock().await);
        if handles.is_empty() {
            return;
        }

        info!(busy = self.busy(), "Stopping worker pool, waiting for in-flight jobs...");
        let timeout = self.runner.config.shutdown_timeout;
        let drained =
            tokio::time::timeout(timeout, futures::future::join_all(handles.iter_mut())).await;

        match drained {
            Ok(_) => info!("Worker pool stopped"),
            Err(_) => {
                warn!(?timeout, busy = self.busy(), "Shutdown timed out, aborting workers");
                for handle in &handles {
                    handle.abort();
                }
            }
        }
    }
}

async fn worker_loop(index: usize, runner: Arc<JobRunner>, mut control: watch::Receiver<PoolState>) {
    let notify = runner.queue.notifier();
    let mut dequeue_errors = ErrorStreak::new(3);
    debug!(worker = index, "Worker loop started");

    loop {
        let state = *control.borrow_and_update();
        match state {
            PoolState::Stopped => break,
            PoolState::Paused => {
                if control.changed().await.is_err() {
                    break;
                }
                continue;
            }
            PoolState::Running => {}
        }

        // Register for wake-ups before looking, so an enqueue racing with
        // an empty dequeue is not missed.
        let notified = notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        match runner.queue.dequeue().await {
            Ok(Some(entry)) => {
                dequeue_errors.cleared();
                runner.process(entry).await;
                continue;
            }
            Ok(None) => dequeue_errors.cleared(),
            Err(e) => {
                if dequeue_errors.failed() {
                    warn!(worker = index, error = %e, "Dequeue failed");
                }
            }
        }

        let now = Instant::now();
        let mut wake_at = now + runner.config.poll_interval;
        if let Some(ready_at) = runner.queue.next_ready_at().await {
            wake_at = wake_at.min(ready_at.max(now));
        }

        tokio::select! {
            _ = &mut notified => {}
            _ = tokio::time::sleep_until(wake_at) => {}
            changed = control.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    debug!(worker = index, "Worker loop exited");
}

impl JobRunner {
    async fn process(&self, entry: QueueEntry) {
        let logger = JobLogger::new(entry.job_id(), OPERATION).with_attempt(entry.attempts + 1);
        let span = logger.create_span();
        self.process_entry(entry, logger).instrument(span).await
    }

    async fn process_entry(&self, entry: QueueEntry, logger: JobLogger) {
        let busy = self.busy.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_workers_busy(busy);
        logger.log_start(&format!(
            "project {} for user {}",
            entry.job.project_id, entry.job.user_id
        ));
        let started = Instant::now();

        let result = match self.claim(entry.job_id()).await {
            Ok(Claim::Run) => self.run(&entry, &logger).await,
            Ok(Claim::Settled(status)) => {
                self.ack_settled(&entry, status, &logger).await;
                self.release();
                return;
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(output) => self.complete(&entry, output, started, &logger).await,
            Err(e) => self.fail_or_retry(&entry, e, &logger).await,
        }
        self.release();
    }

    fn release(&self) {
        let busy = self.busy.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        metrics::set_workers_busy(busy);
    }

    /// Move the job record to `processing`.
    async fn claim(&self, job_id: &JobId) -> WorkerResult<Claim> {
        let record = self
            .jobs
            .get(job_id)
            .await?
            .ok_or_else(|| WorkerError::JobNotFound(job_id.to_string()))?;

        if record.status.is_terminal() {
            return Ok(Claim::Settled(record.status));
        }

        self.write_job(record.start()).await?;
        Ok(Claim::Run)
    }

    async fn run(&self, entry: &QueueEntry, logger: &JobLogger) -> WorkerResult<PipelineOutput> {
        let job = &entry.job;
        let scenes = self
            .scenes
            .scenes(&job.project_id)
            .await?
            .ok_or_else(|| WorkerError::ProjectNotFound(job.project_id.clone()))?;
        let scenes = completed_in_order(scenes);
        logger.log_progress(&format!("{} completed scenes", scenes.len()));

        let mut workspace = TempWorkspace::acquire(&self.config.work_dir, job.job_id.as_str()).await?;
        let result = self.pipeline.run(job, &scenes, &workspace, logger).await;

        if let Err(e) = workspace.cleanup().await {
            logger.log_warning(&format!(
                "Failed to remove workspace {}: {}",
                workspace.path().display(),
                e
            ));
        }

        result
    }

    async fn complete(
        &self,
        entry: &QueueEntry,
        output: PipelineOutput,
        started: Instant,
        logger: &JobLogger,
    ) {
        let video_url = output.video_url.clone();
        let written = self
            .update_record(entry.job_id(), |job| {
                Some(job.complete(JobOutput::Video(ComposeMovieOutput { video_url })))
            })
            .await;

        if let Err(e) = written {
            // The movie exists but nobody can see it; run again.
            self.fail_or_retry(entry, e, logger).await;
            return;
        }

        match self.queue.ack(&entry.id, Outcome::Completed).await {
            Ok(_) => {
                let elapsed = started.elapsed();
                metrics::record_job_completed(elapsed.as_secs_f64());
                logger.log_completion(&format!(
                    "{} ({:.2}s, {} clips) in {:?}",
                    output.video_url, output.duration, output.clip_count, elapsed
                ));
            }
            Err(e) => logger.log_error(&format!("Failed to ack completed entry {}: {}", entry.id, e)),
        }
    }

    /// Record a failed run on the job, then hand it back to the queue.
    ///
    /// The job record is written first so a retried entry is never claimed
    /// while its record still says `processing` from this run. If a final
    /// `failed` cannot be written, the entry is deferred instead of settled
    /// so the record is settled by a later run.
    async fn fail_or_retry(&self, entry: &QueueEntry, error: WorkerError, logger: &JobLogger) {
        let permanent = error.is_permanent_failure();
        let message = error.user_message();
        let will_retry = !permanent && entry.attempts + 1 < entry.max_attempts;

        let written = if will_retry {
            self.update_record(entry.job_id(), |job| {
                (job.status == JobStatus::Processing).then(|| job.requeue())
            })
            .await
        } else {
            let message = message.clone();
            self.update_record(entry.job_id(), |job| {
                (!job.status.is_terminal()).then(|| job.fail(message))
            })
            .await
        };
        let outcome = match written {
            // Settling the entry now would strand the record in `processing`.
            Err(e) if !will_retry => {
                logger.log_warning(&format!("Failed to record job failure, deferring entry: {e}"));
                Outcome::Deferred(format!("job record not written: {e}"))
            }
            Err(e) => {
                logger.log_warning(&format!("Failed to update job record: {e}"));
                Outcome::Transient(message.clone())
            }
            Ok(()) if permanent => Outcome::Permanent(message.clone()),
            Ok(()) => Outcome::Transient(message.clone()),
        };

        match self.queue.ack(&entry.id, outcome).await {
            Ok(AckDisposition::Retrying { attempts, delay }) => {
                metrics::record_job_retried(attempts);
                logger.log_warning(&format!(
                    "Run {attempts} failed, retrying in {delay:?}: {message}"
                ));
            }
            Ok(AckDisposition::Failed { attempts }) => {
                metrics::record_job_failed(permanent);
                logger.log_error(&format!(
                    "Failed after {} run(s){}: {}",
                    attempts.max(1),
                    if permanent { " (permanent)" } else { "" },
                    message
                ));
            }
            Ok(AckDisposition::Deferred { delay }) => {
                logger.log_warning(&format!("Run {} will be repeated in {delay:?}", entry.attempts + 1));
            }
            Ok(AckDisposition::Completed) => {}
            Err(e) => logger.log_error(&format!("Failed to ack entry {}: {}", entry.id, e)),
        }
    }

    /// Settle an entry whose job record was already terminal.
    async fn ack_settled(&self, entry: &QueueEntry, status: JobStatus, logger: &JobLogger) {
        let outcome = match status {
            JobStatus::Completed => Outcome::Completed,
            other => Outcome::Permanent(format!("job already {other}")),
        };
        logger.log_warning(&format!("Job record is already {status}, settling entry"));
        if let Err(e) = self.queue.ack(&entry.id, outcome).await {
            logger.log_error(&format!("Failed to ack entry {}: {}", entry.id, e));
        }
    }

    /// Apply `change` to the stored record and write it back. `change`
    /// returns `None` to leave the record as it is.
    async fn update_record(
        &self,
        job_id: &JobId,
        change: impl FnOnce(CompositionJob) -> Option<CompositionJob>,
    ) -> WorkerResult<()> {
        let Some(record) = self.jobs.get(job_id).await? else {
            debug!(job_id = %job_id, "No job record to update");
            return Ok(());
        };
        match change(record) {
            Some(updated) => self.write_job(updated).await,
            None => Ok(()),
        }
    }

    async fn write_job(&self, job: CompositionJob) -> WorkerResult<()> {
        with_retries(&self.store_retry, || self.jobs.update(job.clone()))
            .await
            .inspect_err(|e| error!(job_id = %job.id, error = %e, "Job store write failed"))
    }
}
