//! Short in-process retries for job store writes, and log throttling for
//! errors that repeat on every loop iteration.
//!
//! These only ride out brief hiccups. A write that still fails is reported
//! to the queue, which applies its own, much slower, backoff between runs.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How often and how patiently to retry a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WritePolicy {
    /// Total tries, the first one included
    pub attempts: u32,
    /// Pause after the first failure; doubles after each further one
    pub first_delay: Duration,
    pub max_delay: Duration,
    /// Shows up in logs
    pub label: &'static str,
}

impl WritePolicy {
    /// Four tries, 50 ms apart at first, never more than 2 s.
    pub const fn job_store() -> Self {
        Self {
            attempts: 4,
            first_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            label: "job_store_write",
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    pub fn with_first_delay(mut self, delay: Duration) -> Self {
        self.first_delay = delay;
        self
    }

    fn pause_after(&self, failures: u32) -> Duration {
        let doublings = failures.saturating_sub(1).min(16);
        self.first_delay
            .saturating_mul(1u32 << doublings)
            .min(self.max_delay)
    }
}

/// Run `write` until it succeeds or `policy.attempts` tries have failed,
/// returning the last error in that case.
pub async fn with_retries<T, E, F, Fut>(policy: &WritePolicy, mut write: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut failures = 0u32;
    loop {
        let error = match write().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        failures += 1;
        if failures >= policy.attempts {
            return Err(error);
        }

        let pause = policy.pause_after(failures);
        debug!(
            operation = policy.label,
            failures,
            ?pause,
            error = %error,
            "Write failed, retrying"
        );
        tokio::time::sleep(pause).await;
    }
}

/// Counts an uninterrupted run of failures and says whether each one is
/// still worth logging.
#[derive(Debug)]
pub struct ErrorStreak {
    length: u32,
    quiet_after: u32,
}

impl ErrorStreak {
    pub fn new(quiet_after: u32) -> Self {
        Self {
            length: 0,
            quiet_after,
        }
    }

    /// Record a failure. Returns `true` while the streak is short enough to
    /// log every failure.
    pub fn failed(&mut self) -> bool {
        self.length += 1;
        if self.length == self.quiet_after + 1 {
            warn!(
                failures = self.length,
                "Same operation keeps failing, muting further reports"
            );
        }
        self.length <= self.quiet_after
    }

    /// Record a success, ending the streak.
    pub fn cleared(&mut self) {
        if self.length > self.quiet_after {
            info!(failures = self.length, "Recovered after repeated failures");
        }
        self.length = 0;
    }

    pub fn len(&self) -> u32 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[test]
    fn test_pause_doubles_up_to_cap() {
        let policy = WritePolicy::job_store().with_first_delay(Duration::from_millis(300));

        assert_eq!(policy.pause_after(1), Duration::from_millis(300));
        assert_eq!(policy.pause_after(2), Duration::from_millis(600));
        assert_eq!(policy.pause_after(3), Duration::from_millis(1200));
        assert_eq!(policy.pause_after(4), Duration::from_secs(2));
        assert_eq!(policy.pause_after(40), Duration::from_secs(2));
    }

    #[test]
    fn test_streak_mutes_then_recovers() {
        let mut streak = ErrorStreak::new(2);

        assert!(streak.failed());
        assert!(streak.failed());
        assert!(!streak.failed());
        assert_eq!(streak.len(), 3);

        streak.cleared();
        assert!(streak.is_empty());
        assert!(streak.failed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_succeeds_after_transient_errors() {
        let policy = WritePolicy::job_store();
        let tries = AtomicU32::new(0);
        let started = Instant::now();

        let result = with_retries(&policy, || {
            let n = tries.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("store unavailable")
                } else {
                    Ok("written")
                }
            }
        })
        .await;

        assert_eq!(result, Ok("written"));
        assert_eq!(tries.load(Ordering::SeqCst), 3);
        // 50 ms + 100 ms of pauses
        assert_eq!(started.elapsed(), Duration::from_millis(150));
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_returns_last_error() {
        let policy = WritePolicy::job_store().with_attempts(2);
        let tries = AtomicU32::new(0);

        let result: Result<(), String> = with_retries(&policy, || {
            let n = tries.fetch_add(1, Ordering::SeqCst);
            async move { Err(format!("down #{n}")) }
        })
        .await;

        assert_eq!(result, Err("down #1".to_string()));
        assert_eq!(tries.load(Ordering::SeqCst), 2);
    }
}
