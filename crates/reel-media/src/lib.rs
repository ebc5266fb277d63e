//! FFmpeg CLI wrapper for movie composition.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building with multiple inputs
//! - Progress parsing from `-progress pipe:2`
//! - Filter graphs for scaling, crossfades and music fades
//! - The `MediaEncoder` capability and its FFmpeg implementation
//! - Per-job scratch workspaces

pub mod command;
pub mod encoder;
pub mod error;
pub mod filters;
pub mod fs_utils;
pub mod probe;
pub mod progress;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
pub mod workspace;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use encoder::{ClipSpec, ComposePlan, FfmpegEncoder, MaterializedClip, MediaEncoder};
pub use error::{MediaError, MediaResult};
pub use fs_utils::move_file;
pub use probe::{probe_duration, probe_media, MediaInfo};
pub use progress::FfmpegProgress;
#[cfg(any(test, feature = "test-util"))]
pub use testing::{EncoderCall, EncoderOp, ScriptedEncoder};
pub use workspace::TempWorkspace;
