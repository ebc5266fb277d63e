//! Shared data models for movie composition.
//!
//! This crate provides Serde-serializable types for:
//! - Composition jobs and their typed payloads
//! - Scenes read from the project catalog
//! - Composition options (resolution, quality, format, music, transitions)
//! - Encoder profiles keyed by quality tier and output format
//! - The export options catalog shown to clients

pub mod encoding;
pub mod export;
pub mod job;
pub mod options;
pub mod scene;

// Re-export common types
pub use encoding::{EncodingProfile, FormatProfile, QualityProfile};
pub use export::{ExportOption, ExportOptions};
pub use job::{
    ComposeMovieInput, ComposeMovieOutput, CompositionJob, JobId, JobOutput, JobPayload,
    JobStatus, JobType,
};
pub use options::{
    BackgroundMusic, CompositionOptions, OptionsError, OutputFormat, Quality, Resolution,
    TransitionType, Transitions, DEFAULT_FPS, DEFAULT_IMAGE_CLIP_SECONDS,
    DEFAULT_TRANSITION_SECONDS,
};
pub use scene::{completed_in_order, Scene, SceneSource, SceneStatus};
