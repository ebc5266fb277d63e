//! Job records kept in the job store.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::options::CompositionOptions;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job status in the store.
///
/// `queued -> processing -> {completed | failed}`, with a transient
/// failure looping `processing -> queued` until attempts run out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Processing)
                | (JobStatus::Queued, JobStatus::Failed)
                | (JobStatus::Processing, JobStatus::Queued)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type of job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Text-to-image scene generation
    Image,
    /// Movie composition from a project's scenes
    Video,
    /// Extend an existing scene clip
    Extension,
    /// Merge several clips into one
    Merge,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Image => "image",
            JobType::Video => "video",
            JobType::Extension => "extension",
            JobType::Merge => "merge",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input of a movie composition job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComposeMovieInput {
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene_count: Option<u32>,
    #[serde(default)]
    pub options: CompositionOptions,
}

/// Output of a completed movie composition job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComposeMovieOutput {
    pub video_url: String,
}

/// Job input, keyed by job type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", content = "input", rename_all = "snake_case")]
pub enum JobPayload {
    Image {
        prompt: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resolution: Option<String>,
    },
    Video(ComposeMovieInput),
    Extension {
        video_url: String,
        prompt: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration: Option<f64>,
    },
    Merge {
        video_urls: Vec<String>,
    },
}

impl JobPayload {
    pub fn job_type(&self) -> JobType {
        match self {
            JobPayload::Image { .. } => JobType::Image,
            JobPayload::Video(_) => JobType::Video,
            JobPayload::Extension { .. } => JobType::Extension,
            JobPayload::Merge { .. } => JobType::Merge,
        }
    }

    pub fn as_compose_movie(&self) -> Option<&ComposeMovieInput> {
        match self {
            JobPayload::Video(input) => Some(input),
            _ => None,
        }
    }
}

/// Job output, keyed by job type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", content = "output", rename_all = "snake_case")]
pub enum JobOutput {
    Image { image_url: String },
    Video(ComposeMovieOutput),
    Extension { video_url: String },
    Merge { video_url: String },
}

impl JobOutput {
    /// The resolvable media reference carried by the output.
    pub fn url(&self) -> &str {
        match self {
            JobOutput::Image { image_url } => image_url,
            JobOutput::Video(out) => &out.video_url,
            JobOutput::Extension { video_url } | JobOutput::Merge { video_url } => video_url,
        }
    }
}

/// Durable record of one generation request and its outcome.
///
/// `output` is set iff the job is completed, `error` iff it failed,
/// `completed_at` iff the status is terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CompositionJob {
    pub id: JobId,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(flatten)]
    pub payload: JobPayload,
    #[serde(default)]
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<JobOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl CompositionJob {
    /// Create a queued movie composition job.
    pub fn new_compose_movie(
        user_id: impl Into<String>,
        project_id: impl Into<String>,
        options: CompositionOptions,
    ) -> Self {
        let project_id = project_id.into();
        let now = Utc::now();

        Self {
            id: JobId::new(),
            user_id: user_id.into(),
            project_id: Some(project_id.clone()),
            payload: JobPayload::Video(ComposeMovieInput {
                project_id,
                scene_count: None,
                options,
            }),
            status: JobStatus::Queued,
            output: None,
            error: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn job_type(&self) -> JobType {
        self.payload.job_type()
    }

    /// Move into `processing`. The first start time is kept across retries.
    pub fn start(mut self) -> Self {
        let now = Utc::now();
        self.status = JobStatus::Processing;
        self.started_at.get_or_insert(now);
        self.updated_at = now;
        self
    }

    /// Return to `queued` after a transient failure.
    pub fn requeue(mut self) -> Self {
        self.status = JobStatus::Queued;
        self.updated_at = Utc::now();
        self
    }

    /// Mark job as completed.
    pub fn complete(mut self, output: JobOutput) -> Self {
        let now = Utc::now();
        self.status = JobStatus::Completed;
        self.output = Some(output);
        self.error = None;
        self.completed_at = Some(now);
        self.updated_at = now;
        self
    }

    /// Mark job as failed.
    pub fn fail(mut self, error: impl Into<String>) -> Self {
        let now = Utc::now();
        self.status = JobStatus::Failed;
        self.output = None;
        self.error = Some(error.into());
        self.completed_at = Some(now);
        self.updated_at = now;
        self
    }

    /// Wall time between first start and completion, in milliseconds.
    pub fn processing_time_ms(&self) -> Option<i64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}
