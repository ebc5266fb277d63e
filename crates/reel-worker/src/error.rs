//! Worker error types.

use thiserror::Error;

use reel_models::{JobStatus, OptionsError};

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("No completed scenes found for project {0}")]
    NoCompletedScenes(String),

    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Invalid options: {0}")]
    InvalidOptions(#[from] OptionsError),

    #[error("Invalid job state: job {job_id} is {status}")]
    InvalidState { job_id: String, status: JobStatus },

    #[error("Job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Job store error: {0}")]
    Store(String),

    #[error("Worker pool is stopped")]
    Stopped,

    #[error("Media error: {0}")]
    Media(#[from] reel_media::MediaError),

    #[error("Queue error: {0}")]
    Queue(#[from] reel_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    pub fn no_completed_scenes(project_id: impl Into<String>) -> Self {
        Self::NoCompletedScenes(project_id.into())
    }

    /// Check if this is a permanent failure that should NOT be retried.
    ///
    /// Missing input and malformed requests fail the job at once; encoder,
    /// I/O and store failures are worth another attempt.
    pub fn is_permanent_failure(&self) -> bool {
        matches!(
            self,
            WorkerError::NoCompletedScenes(_)
                | WorkerError::ProjectNotFound(_)
                | WorkerError::JobNotFound(_)
                | WorkerError::InvalidOptions(_)
        )
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        !self.is_permanent_failure()
    }

    /// Message recorded on the job when it fails.
    pub fn user_message(&self) -> String {
        match self {
            WorkerError::Media(e) => e.summary(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_media::MediaError;

    #[test]
    fn test_classification() {
        assert!(WorkerError::no_completed_scenes("p1").is_permanent_failure());
        assert!(WorkerError::ProjectNotFound("p1".into()).is_permanent_failure());
        assert!(WorkerError::JobNotFound("j1".into()).is_permanent_failure());

        assert!(WorkerError::Media(MediaError::Timeout(30)).is_retryable());
        assert!(WorkerError::store("write rejected").is_retryable());
        assert!(WorkerError::Io(std::io::Error::other("disk full")).is_retryable());
    }

    #[test]
    fn test_user_message_uses_encoder_tail() {
        let err = WorkerError::Media(MediaError::ffmpeg_failed(
            "FFmpeg exited with status 1",
            Some("frame=1\nInvalid data found when processing input\n".to_string()),
            Some(1),
        ));
        assert_eq!(
            err.user_message(),
            "FFmpeg exited with status 1: Invalid data found when processing input"
        );
    }
}
