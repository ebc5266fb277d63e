//! Priority job queue for movie composition.
//!
//! This crate provides:
//! - Priority + delay ordered dispatch, FIFO within a priority
//! - Retry bookkeeping with exponential backoff
//! - Retention of settled entries and age-based cleanup
//! - Entry persistence in memory or Redis

pub mod entry;
pub mod error;
pub mod job;
pub mod queue;
pub mod store;

pub use entry::{AckDisposition, EnqueueOptions, EntryState, Outcome, QueueCounts, QueueEntry};
pub use error::{QueueError, QueueResult};
pub use job::ComposeMovieJob;
pub use queue::{CleanReport, CompositionQueue, QueueConfig};
pub use store::{MemoryQueueStore, QueueStore, RedisQueueStore};
