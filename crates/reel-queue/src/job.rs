//! Job descriptors carried by queue entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use reel_models::{CompositionJob, CompositionOptions, JobId};

/// Request to compose a project's completed scenes into one movie.
///
/// The `queued` job record must already exist in the job store under
/// `job_id` when this is enqueued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposeMovieJob {
    /// Job store id
    pub job_id: JobId,
    pub user_id: String,
    pub project_id: String,
    #[serde(default)]
    pub options: CompositionOptions,
    pub created_at: DateTime<Utc>,
}

impl ComposeMovieJob {
    pub fn new(
        job_id: JobId,
        user_id: impl Into<String>,
        project_id: impl Into<String>,
        options: CompositionOptions,
    ) -> Self {
        Self {
            job_id,
            user_id: user_id.into(),
            project_id: project_id.into(),
            options,
            created_at: Utc::now(),
        }
    }

    /// Build the descriptor for a movie composition record.
    ///
    /// Returns `None` for records of any other job type.
    pub fn from_record(job: &CompositionJob) -> Option<Self> {
        let input = job.payload.as_compose_movie()?;
        Some(Self {
            job_id: job.id.clone(),
            user_id: job.user_id.clone(),
            project_id: input.project_id.clone(),
            options: input.options.clone(),
            created_at: job.created_at,
        })
    }

    /// Generate idempotency key for deduplication.
    pub fn idempotency_key(&self) -> String {
        format!("compose:{}", self.job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_models::{JobPayload, Quality};

    #[test]
    fn test_from_record() {
        let options = CompositionOptions::default().with_quality(Quality::High);
        let record = CompositionJob::new_compose_movie("user-1", "project-9", options.clone());

        let job = ComposeMovieJob::from_record(&record).unwrap();
        assert_eq!(job.job_id, record.id);
        assert_eq!(job.project_id, "project-9");
        assert_eq!(job.options, options);
        assert_eq!(job.idempotency_key(), format!("compose:{}", record.id));
    }

    #[test]
    fn test_from_record_rejects_other_types() {
        let mut record =
            CompositionJob::new_compose_movie("user-1", "project-9", CompositionOptions::default());
        record.payload = JobPayload::Merge {
            video_urls: vec!["a.mp4".to_string()],
        };
        assert!(ComposeMovieJob::from_record(&record).is_none());
    }
}
