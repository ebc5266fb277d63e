//! Collaborators the worker reads from and writes to.
//!
//! `JobStore` holds the durable job records users poll; `SceneCatalog`
//! resolves a project to its scenes. Both are traits so the worker can run
//! against any backing service; the in-memory implementations back the
//! binary and the tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

use reel_models::{CompositionJob, JobId, JobType, Scene};

use crate::error::{WorkerError, WorkerResult};

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new record. Fails if the id is taken.
    async fn create(&self, job: CompositionJob) -> WorkerResult<()>;

    async fn get(&self, job_id: &JobId) -> WorkerResult<Option<CompositionJob>>;

    /// Replace a record. The status change must be allowed by
    /// `JobStatus::can_transition_to`; terminal records are immutable.
    async fn update(&self, job: CompositionJob) -> WorkerResult<()>;

    /// A user's jobs, newest first.
    async fn list_for_user(
        &self,
        user_id: &str,
        job_type: Option<JobType>,
        limit: usize,
    ) -> WorkerResult<Vec<CompositionJob>>;

    /// Returns `false` when there was nothing to delete.
    async fn delete(&self, job_id: &JobId) -> WorkerResult<bool>;
}

#[async_trait]
pub trait SceneCatalog: Send + Sync {
    /// All scenes of a project in any status, or `None` for an unknown
    /// project.
    async fn scenes(&self, project_id: &str) -> WorkerResult<Option<Vec<Scene>>>;
}

/// Job store kept in process memory.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, CompositionJob>>,
    failing_writes: AtomicU32,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next `count` writes with a store error.
    pub fn fail_next_writes(&self, count: u32) {
        self.failing_writes.fetch_add(count, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    fn injected_failure(&self) -> WorkerResult<()> {
        let taken = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match taken {
            Ok(_) => Err(WorkerError::store("write rejected")),
            Err(_) => Ok(()),
        }
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, job: CompositionJob) -> WorkerResult<()> {
        self.injected_failure()?;
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(WorkerError::store(format!("job {} already exists", job.id)));
        }
        debug!(job_id = %job.id, user_id = %job.user_id, "Created job record");
        jobs.insert(job.id.clone(), job);
        Ok(())
    }

    async fn get(&self, job_id: &JobId) -> WorkerResult<Option<CompositionJob>> {
        Ok(self.jobs.read().await.get(job_id).cloned())
    }

    async fn update(&self, job: CompositionJob) -> WorkerResult<()> {
        self.injected_failure()?;
        let mut jobs = self.jobs.write().await;
        let current = jobs
            .get(&job.id)
            .ok_or_else(|| WorkerError::JobNotFound(job.id.to_string()))?;

        let allowed = if current.status == job.status {
            !current.status.is_terminal()
        } else {
            current.status.can_transition_to(job.status)
        };
        if !allowed {
            return Err(WorkerError::InvalidTransition {
                job_id: job.id.to_string(),
                from: current.status,
                to: job.status,
            });
        }

        jobs.insert(job.id.clone(), job);
        Ok(())
    }

    async fn list_for_user(
        &self,
        user_id: &str,
        job_type: Option<JobType>,
        limit: usize,
    ) -> WorkerResult<Vec<CompositionJob>> {
        let jobs = self.jobs.read().await;
        let mut owned: Vec<CompositionJob> = jobs
            .values()
            .filter(|j| j.user_id == user_id)
            .filter(|j| job_type.map_or(true, |t| j.job_type() == t))
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        owned.truncate(limit);
        Ok(owned)
    }

    async fn delete(&self, job_id: &JobId) -> WorkerResult<bool> {
        self.injected_failure()?;
        Ok(self.jobs.write().await.remove(job_id).is_some())
    }
}

/// Scene catalog kept in process memory.
#[derive(Debug, Default)]
pub struct InMemorySceneCatalog {
    projects: RwLock<HashMap<String, Vec<Scene>>>,
}

impl InMemorySceneCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace a project's scenes.
    pub async fn insert_project(&self, project_id: impl Into<String>, scenes: Vec<Scene>) {
        self.projects.write().await.insert(project_id.into(), scenes);
    }
}

#[async_trait]
impl SceneCatalog for InMemorySceneCatalog {
    async fn scenes(&self, project_id: &str) -> WorkerResult<Option<Vec<Scene>>> {
        Ok(self.projects.read().await.get(project_id).cloned())
    }
}
