//! Priority queue of composition jobs with retry bookkeeping.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use reel_models::JobId;

use crate::entry::{AckDisposition, EnqueueOptions, EntryState, Outcome, QueueCounts, QueueEntry};
use crate::error::{QueueError, QueueResult};
use crate::job::ComposeMovieJob;
use crate::store::{MemoryQueueStore, QueueStore, RedisQueueStore};

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Runs allowed per entry before it fails for good
    pub max_attempts: u32,
    /// First retry delay; doubles on each further failure
    pub backoff_base: Duration,
    /// Completed entries retained before eviction
    pub keep_completed: usize,
    /// Failed entries retained before eviction
    pub keep_failed: usize,
    /// Redis URL for persistence; in-memory when unset
    pub redis_url: Option<String>,
    /// Key prefix for persisted entries
    pub key_prefix: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(2000),
            keep_completed: 10,
            keep_failed: 5,
            redis_url: None,
            key_prefix: "reel:queue".to_string(),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_attempts: std::env::var("QUEUE_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_attempts),
            backoff_base: Duration::from_millis(
                std::env::var("QUEUE_BACKOFF_BASE_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(2000),
            ),
            keep_completed: std::env::var("QUEUE_KEEP_COMPLETED")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.keep_completed),
            keep_failed: std::env::var("QUEUE_KEEP_FAILED")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.keep_failed),
            redis_url: std::env::var("QUEUE_REDIS_URL")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            key_prefix: std::env::var("QUEUE_KEY_PREFIX").unwrap_or(defaults.key_prefix),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    pub fn with_retention(mut self, keep_completed: usize, keep_failed: usize) -> Self {
        self.keep_completed = keep_completed;
        self.keep_failed = keep_failed;
        self
    }
}

/// Entries removed by a `clean` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanReport {
    pub completed: usize,
    pub failed: usize,
}

impl CleanReport {
    pub fn total(&self) -> usize {
        self.completed + self.failed
    }
}

#[derive(Debug, Default)]
struct QueueState {
    entries: HashMap<String, QueueEntry>,
    by_job: HashMap<JobId, String>,
    next_seq: u64,
}

impl QueueState {
    fn insert(&mut self, entry: QueueEntry) {
        self.by_job.insert(entry.job_id().clone(), entry.id.clone());
        self.entries.insert(entry.id.clone(), entry);
    }

    fn remove(&mut self, entry_id: &str) -> Option<QueueEntry> {
        let entry = self.entries.remove(entry_id)?;
        self.by_job.remove(entry.job_id());
        Some(entry)
    }

    /// Highest priority first, then fewest attempts, then insertion order.
    fn next_ready(&self, now: Instant) -> Option<String> {
        self.entries
            .values()
            .filter(|e| e.is_ready(now))
            .min_by_key(|e| (std::cmp::Reverse(e.priority), e.attempts, e.seq))
            .map(|e| e.id.clone())
    }

    /// Terminal entries in `state` finished before `cutoff`, oldest first.
    fn expired(&self, state: EntryState, cutoff: DateTime<Utc>) -> Vec<(DateTime<Utc>, u64, String)> {
        let mut expired: Vec<_> = self
            .entries
            .values()
            .filter(|e| e.state == state)
            .filter_map(|e| {
                let finished = e.finished_at?;
                (finished <= cutoff).then(|| (finished, e.seq, e.id.clone()))
            })
            .collect();
        expired.sort();
        expired
    }
}

/// Durable, priority + delay ordered queue of composition jobs.
///
/// All transitions happen under one lock, so an entry handed out by
/// `dequeue` is already `active` and no other caller can receive it.
pub struct CompositionQueue {
    config: QueueConfig,
    state: Mutex<QueueState>,
    store: Arc<dyn QueueStore>,
    notify: Arc<Notify>,
}

impl CompositionQueue {
    /// Create a queue backed by the in-memory store.
    pub fn new(config: QueueConfig) -> Self {
        Self::with_store(config, Arc::new(MemoryQueueStore::new()))
    }

    pub fn with_store(config: QueueConfig, store: Arc<dyn QueueStore>) -> Self {
        Self {
            config,
            state: Mutex::new(QueueState {
                next_seq: 1,
                ..Default::default()
            }),
            store,
            notify: Arc::new(Notify::new()),
        }
    }

    /// Create a queue with the store selected by `config.redis_url`, then
    /// reload persisted entries.
    pub async fn connect(config: QueueConfig) -> QueueResult<Self> {
        let store: Arc<dyn QueueStore> = match &config.redis_url {
            Some(url) => {
                let store = RedisQueueStore::new(url, &config.key_prefix)?;
                store.ping().await.map_err(|e| {
                    QueueError::connection_failed(format!("redis at {url}: {e}"))
                })?;
                info!(key = %store.key(), "Queue persistence: redis");
                Arc::new(store)
            }
            None => {
                info!("Queue persistence: in-memory");
                Arc::new(MemoryQueueStore::new())
            }
        };

        let queue = Self::with_store(config, store);
        queue.restore().await?;
        Ok(queue)
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Wakes consumers when an entry becomes waiting.
    pub fn notifier(&self) -> Arc<Notify> {
        Arc::clone(&self.notify)
    }

    /// Reload persisted entries. Entries stored as `active` belonged to a
    /// process that is gone and go back to `waiting`.
    pub async fn restore(&self) -> QueueResult<usize> {
        let loaded = self.store.load_all().await?;
        let mut state = self.state.lock().await;

        let mut reset = 0;
        for mut entry in loaded {
            if entry.state == EntryState::Active {
                entry.state = EntryState::Waiting;
                self.store.save(&entry).await?;
                reset += 1;
            }
            entry.rebase_ready_at();
            state.next_seq = state.next_seq.max(entry.seq + 1);
            state.insert(entry);
        }

        let restored = state.entries.len();
        drop(state);

        if restored > 0 {
            info!(restored, reset, "Restored queue entries");
            self.notify.notify_waiters();
        }
        Ok(restored)
    }

    /// Add a job. Each job id is accepted once.
    pub async fn enqueue(
        &self,
        job: ComposeMovieJob,
        options: EnqueueOptions,
    ) -> QueueResult<QueueEntry> {
        let mut state = self.state.lock().await;

        if state.by_job.contains_key(&job.job_id) {
            warn!(job_id = %job.job_id, "Duplicate job rejected");
            return Err(QueueError::DuplicateJob(job.idempotency_key()));
        }

        let seq = state.next_seq;
        let entry = QueueEntry::new(
            seq,
            job,
            options,
            self.config.max_attempts,
            self.config.backoff_base,
        );
        self.store.save(&entry).await?;

        state.next_seq += 1;
        state.insert(entry.clone());
        drop(state);

        info!(
            entry_id = %entry.id,
            job_id = %entry.job_id(),
            priority = entry.priority,
            delay_ms = options.delay.as_millis() as u64,
            "Enqueued composition job"
        );
        self.notify.notify_waiters();
        Ok(entry)
    }

    /// Claim the next eligible entry, marking it `active`.
    pub async fn dequeue(&self) -> QueueResult<Option<QueueEntry>> {
        let mut state = self.state.lock().await;

        let Some(id) = state.next_ready(Instant::now()) else {
            return Ok(None);
        };
        let Some(entry) = state.entries.get_mut(&id) else {
            return Ok(None);
        };

        let previous = entry.clone();
        entry.state = EntryState::Active;
        entry.processed_at = Some(Utc::now());

        if let Err(e) = self.store.save(entry).await {
            *entry = previous;
            return Err(e);
        }

        debug!(entry_id = %entry.id, job_id = %entry.job_id(), attempts = entry.attempts, "Dequeued");
        Ok(Some(entry.clone()))
    }

    /// Report the outcome of an active entry.
    pub async fn ack(&self, entry_id: &str, outcome: Outcome) -> QueueResult<AckDisposition> {
        let mut state = self.state.lock().await;

        let entry = state
            .entries
            .get_mut(entry_id)
            .ok_or_else(|| QueueError::EntryNotFound(entry_id.to_string()))?;

        if entry.state != EntryState::Active {
            return Err(QueueError::NotActive {
                entry_id: entry_id.to_string(),
                state: entry.state.to_string(),
            });
        }

        let previous = entry.clone();
        let disposition = match outcome {
            Outcome::Completed => {
                entry.state = EntryState::Completed;
                entry.finished_at = Some(Utc::now());
                AckDisposition::Completed
            }
            Outcome::Transient(error) => {
                entry.attempts = (entry.attempts + 1).min(entry.max_attempts);
                entry.last_error = Some(error);
                if entry.attempts < entry.max_attempts {
                    let delay = entry.backoff_delay();
                    entry.state = EntryState::Waiting;
                    entry.schedule_after(delay);
                    AckDisposition::Retrying {
                        attempts: entry.attempts,
                        delay,
                    }
                } else {
                    entry.state = EntryState::Failed;
                    entry.finished_at = Some(Utc::now());
                    AckDisposition::Failed {
                        attempts: entry.attempts,
                    }
                }
            }
            Outcome::Permanent(error) => {
                entry.last_error = Some(error);
                entry.state = EntryState::Failed;
                entry.finished_at = Some(Utc::now());
                AckDisposition::Failed {
                    attempts: entry.attempts,
                }
            }
            Outcome::Deferred(error) => {
                let delay = entry.backoff_delay();
                entry.last_error = Some(error);
                entry.state = EntryState::Waiting;
                entry.schedule_after(delay);
                AckDisposition::Deferred { delay }
            }
        };

        if let Err(e) = self.store.save(entry).await {
            *entry = previous;
            return Err(e);
        }

        match disposition {
            AckDisposition::Retrying { attempts, delay } => {
                info!(
                    entry_id = %entry_id,
                    attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Entry re-queued with backoff"
                );
                drop(state);
                self.notify.notify_waiters();
            }
            AckDisposition::Deferred { delay } => {
                info!(
                    entry_id = %entry_id,
                    delay_ms = delay.as_millis() as u64,
                    "Entry deferred"
                );
                drop(state);
                self.notify.notify_waiters();
            }
            AckDisposition::Completed | AckDisposition::Failed { .. } => {
                debug!(entry_id = %entry_id, ?disposition, "Entry settled");
                self.evict_over_retention(&mut state).await;
            }
        }

        Ok(disposition)
    }

    /// Drop the oldest terminal entries beyond the retention limits.
    ///
    /// The entry being acked is already settled, so a store error here only
    /// leaves an extra entry behind for the next eviction or `clean`.
    async fn evict_over_retention(&self, state: &mut QueueState) {
        for (kind, keep) in [
            (EntryState::Completed, self.config.keep_completed),
            (EntryState::Failed, self.config.keep_failed),
        ] {
            let terminal = state.expired(kind, DateTime::<Utc>::MAX_UTC);
            let excess = terminal.len().saturating_sub(keep);
            for (_, _, id) in terminal.into_iter().take(excess) {
                if let Err(e) = self.store.remove(&id).await {
                    warn!(entry_id = %id, error = %e, "Failed to evict entry");
                    continue;
                }
                state.remove(&id);
                debug!(entry_id = %id, state = %kind, "Evicted by retention");
            }
        }
    }

    /// Entry counts by state.
    pub async fn counts(&self) -> QueueCounts {
        let state = self.state.lock().await;
        let mut counts = QueueCounts::default();
        for entry in state.entries.values() {
            counts.add(entry.state);
        }
        counts
    }

    pub async fn get(&self, entry_id: &str) -> Option<QueueEntry> {
        self.state.lock().await.entries.get(entry_id).cloned()
    }

    pub async fn find_by_job(&self, job_id: &JobId) -> Option<QueueEntry> {
        let state = self.state.lock().await;
        let id = state.by_job.get(job_id)?;
        state.entries.get(id).cloned()
    }

    /// Remove the entry for `job_id` unless it is active.
    ///
    /// Returns `false` when the queue holds no entry for the job.
    pub async fn remove_job(&self, job_id: &JobId) -> QueueResult<bool> {
        let mut state = self.state.lock().await;

        let Some(id) = state.by_job.get(job_id).cloned() else {
            return Ok(false);
        };
        if state.entries.get(&id).map(|e| e.state) == Some(EntryState::Active) {
            return Err(QueueError::EntryActive(id));
        }

        self.store.remove(&id).await?;
        state.remove(&id);
        info!(entry_id = %id, job_id = %job_id, "Removed queue entry");
        Ok(true)
    }

    /// Remove terminal entries finished more than the given ages ago,
    /// oldest first, at most `limit` in total.
    pub async fn clean(
        &self,
        max_age_completed: Duration,
        max_age_failed: Duration,
        limit: usize,
    ) -> QueueResult<CleanReport> {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        let mut candidates: Vec<_> = [
            (EntryState::Completed, max_age_completed),
            (EntryState::Failed, max_age_failed),
        ]
        .into_iter()
        .flat_map(|(kind, age)| {
            state
                .expired(kind, cutoff(now, age))
                .into_iter()
                .map(move |(finished, seq, id)| (finished, seq, id, kind))
        })
        .collect();
        candidates.sort_by_key(|(finished, seq, _, _)| (*finished, *seq));

        let mut report = CleanReport::default();
        for (_, _, id, kind) in candidates.into_iter().take(limit) {
            self.store.remove(&id).await?;
            state.remove(&id);
            match kind {
                EntryState::Completed => report.completed += 1,
                _ => report.failed += 1,
            }
        }

        Ok(report)
    }

    /// Remove entries in one terminal state finished more than `max_age` ago.
    pub async fn clean_state(
        &self,
        kind: EntryState,
        max_age: Duration,
        limit: usize,
    ) -> QueueResult<usize> {
        if !kind.is_terminal() {
            return Ok(0);
        }

        let mut state = self.state.lock().await;
        let expired = state.expired(kind, cutoff(Utc::now(), max_age));

        let mut removed = 0;
        for (_, _, id) in expired.into_iter().take(limit) {
            self.store.remove(&id).await?;
            state.remove(&id);
            removed += 1;
        }
        Ok(removed)
    }

    /// Earliest time a waiting entry becomes eligible.
    pub async fn next_ready_at(&self) -> Option<Instant> {
        let state = self.state.lock().await;
        state
            .entries
            .values()
            .filter(|e| e.state == EntryState::Waiting)
            .map(|e| e.ready_at)
            .min()
    }
}

/// Finish time at or before which an entry counts as older than `age`.
fn cutoff(now: DateTime<Utc>, age: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(age)
        .ok()
        .and_then(|age| now.checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
