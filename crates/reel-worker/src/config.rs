//! Worker configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use reel_models::{Resolution, DEFAULT_IMAGE_CLIP_SECONDS};

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Jobs processed at the same time
    pub concurrency: usize,
    /// Root under which per-job workspaces are created
    pub work_dir: PathBuf,
    /// Where finished movies are stored
    pub output_dir: PathBuf,
    /// Longest an idle worker sleeps before checking the queue again
    pub poll_interval: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Limit for a single encoder invocation; unlimited when unset
    pub encoder_timeout: Option<Duration>,
    /// Resolution used when a request does not name one
    pub default_resolution: Resolution,
    /// Duration of a clip rendered from a still image, in seconds
    pub image_clip_seconds: f64,
    /// Prometheus listener; metrics are not exported when unset
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            work_dir: PathBuf::from("/tmp/reel"),
            output_dir: PathBuf::from("./output"),
            poll_interval: Duration::from_millis(1000),
            shutdown_timeout: Duration::from_secs(60),
            encoder_timeout: None,
            default_resolution: Resolution::HD,
            image_clip_seconds: DEFAULT_IMAGE_CLIP_SECONDS,
            metrics_addr: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            concurrency: std::env::var("WORKER_CONCURRENCY")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.concurrency),
            work_dir: std::env::var("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            output_dir: std::env::var("WORKER_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            poll_interval: std::env::var("WORKER_POLL_INTERVAL_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            shutdown_timeout: Duration::from_secs(
                std::env::var("WORKER_SHUTDOWN_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
            ),
            encoder_timeout: std::env::var("WORKER_ENCODER_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            default_resolution: std::env::var("WORKER_DEFAULT_RESOLUTION")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.default_resolution),
            image_clip_seconds: std::env::var("WORKER_IMAGE_CLIP_SECONDS")
                .ok()
                .and_then(|s| s.parse::<f64>().ok())
                .filter(|secs| secs.is_finite() && *secs > 0.0)
                .unwrap_or(defaults.image_clip_seconds),
            metrics_addr: std::env::var("WORKER_METRICS_ADDR")
                .ok()
                .and_then(|s| s.parse().ok()),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_dirs(mut self, work_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = work_dir.into();
        self.output_dir = output_dir.into();
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.default_resolution, Resolution::new(1280, 720));
        assert!(config.encoder_timeout.is_none());
        assert!((config.image_clip_seconds - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_concurrency_never_zero() {
        let config = WorkerConfig::default().with_concurrency(0);
        assert_eq!(config.concurrency, 1);
    }
}
