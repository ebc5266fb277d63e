//! Scheduling records kept by the queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

use reel_models::JobId;

use crate::job::ComposeMovieJob;

/// Longest delay an entry can be scheduled with.
const MAX_DELAY: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// State of a queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    Waiting,
    Active,
    Completed,
    Failed,
}

impl EntryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryState::Waiting => "waiting",
            EntryState::Active => "active",
            EntryState::Completed => "completed",
            EntryState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EntryState::Completed | EntryState::Failed)
    }
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-call enqueue options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnqueueOptions {
    /// Higher is dispatched first
    pub priority: i32,
    /// Time before the entry becomes eligible
    pub delay: Duration,
}

impl EnqueueOptions {
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Result reported by the worker that held an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    /// Retryable failure; re-queued while attempts remain
    Transient(String),
    /// Failure that retrying cannot fix
    Permanent(String),
    /// The run's result could not be recorded; run again later without
    /// counting an attempt
    Deferred(String),
}

/// What `ack` did with the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckDisposition {
    Completed,
    /// Back to `waiting`, eligible again after `delay`
    Retrying { attempts: u32, delay: Duration },
    Failed { attempts: u32 },
    /// Back to `waiting` with `attempts` unchanged
    Deferred { delay: Duration },
}

/// In-flight scheduling record backing one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: String,
    pub job: ComposeMovieJob,
    pub priority: i32,
    /// Failed runs so far
    pub attempts: u32,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub state: EntryState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Insertion order, the FIFO tie-breaker
    pub seq: u64,
    /// Earliest dispatch time (wall clock, for persistence and display)
    pub eligible_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Earliest dispatch time on the runtime clock
    #[serde(skip, default = "Instant::now")]
    pub(crate) ready_at: Instant,
}

impl QueueEntry {
    pub(crate) fn new(
        seq: u64,
        job: ComposeMovieJob,
        options: EnqueueOptions,
        max_attempts: u32,
        backoff_base: Duration,
    ) -> Self {
        let now = Utc::now();
        let delay = options.delay.min(MAX_DELAY);
        Self {
            id: seq.to_string(),
            job,
            priority: options.priority,
            attempts: 0,
            max_attempts,
            backoff_base_ms: backoff_base.as_millis() as u64,
            state: EntryState::Waiting,
            last_error: None,
            seq,
            eligible_at: now + wall_delta(delay),
            created_at: now,
            processed_at: None,
            finished_at: None,
            ready_at: Instant::now() + delay,
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job.job_id
    }

    /// Whether the entry can be dispatched at `now`.
    pub fn is_ready(&self, now: Instant) -> bool {
        self.state == EntryState::Waiting && self.ready_at <= now
    }

    /// Backoff before the next run, given the failures counted so far.
    ///
    /// `base * 2^(attempts - 1)`: 2s, 4s, 8s with the default base.
    pub fn backoff_delay(&self) -> Duration {
        let exponent = self.attempts.saturating_sub(1).min(16);
        Duration::from_millis(self.backoff_base_ms.saturating_mul(1u64 << exponent))
    }

    pub fn attempts_left(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempts)
    }

    pub(crate) fn schedule_after(&mut self, delay: Duration) {
        let delay = delay.min(MAX_DELAY);
        self.ready_at = Instant::now() + delay;
        self.eligible_at = Utc::now() + wall_delta(delay);
    }

    /// Recompute the runtime deadline after loading from a store.
    pub(crate) fn rebase_ready_at(&mut self) {
        let remaining = (self.eligible_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        self.ready_at = Instant::now() + remaining;
    }
}

fn wall_delta(delay: Duration) -> chrono::Duration {
    chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::days(365))
}

/// Point-in-time entry counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub waiting: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
}

impl QueueCounts {
    pub(crate) fn add(&mut self, state: EntryState) {
        match state {
            EntryState::Waiting => self.waiting += 1,
            EntryState::Active => self.active += 1,
            EntryState::Completed => self.completed += 1,
            EntryState::Failed => self.failed += 1,
        }
        self.total += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_models::CompositionOptions;

    fn entry() -> QueueEntry {
        let job = ComposeMovieJob::new(JobId::new(), "u", "p", CompositionOptions::default());
        QueueEntry::new(1, job, EnqueueOptions::default(), 3, Duration::from_secs(2))
    }

    #[test]
    fn test_backoff_doubles_per_failure() {
        let mut e = entry();
        e.attempts = 1;
        assert_eq!(e.backoff_delay(), Duration::from_secs(2));
        e.attempts = 2;
        assert_eq!(e.backoff_delay(), Duration::from_secs(4));
        e.attempts = 3;
        assert_eq!(e.backoff_delay(), Duration::from_secs(8));
        assert_eq!(e.attempts_left(), 0);
    }

    #[test]
    fn test_state_serializes_snake_case() {
        let json = serde_json::to_value(entry()).unwrap();
        assert_eq!(json["state"], "waiting");
        assert_eq!(json["attempts"], 0);
        assert!(json.get("ready_at").is_none());
    }

    #[test]
    fn test_counts() {
        let mut counts = QueueCounts::default();
        counts.add(EntryState::Waiting);
        counts.add(EntryState::Failed);
        assert_eq!(counts.total, 2);
        assert_eq!(counts.failed, 1);
    }
}
