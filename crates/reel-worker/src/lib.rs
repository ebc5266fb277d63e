//! Movie composition worker.
//!
//! This crate provides:
//! - The four-stage composition pipeline (materialize, compose, mix, finalize)
//! - A fixed-size worker pool draining the composition queue
//! - Retry classification and job store bookkeeping
//! - Queue administration (status, pause/resume, cleanup)
//! - `QueueService`, the handle a process constructs once at startup

pub mod admin;
pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod retry;
pub mod service;
pub mod store;

pub use admin::QueueAdmin;
pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use executor::{PoolState, WorkerPool};
pub use logging::JobLogger;
pub use pipeline::{Pipeline, PipelineOutput};
pub use service::{ComposeRequest, JobStatusView, ProcessingStats, QueueService};
pub use store::{InMemoryJobStore, InMemorySceneCatalog, JobStore, SceneCatalog};
