//! Encoder capability used by the composition pipeline.
//!
//! `MediaEncoder` is the only seam that touches the OS-level encoder.
//! `FfmpegEncoder` shells out to FFmpeg; tests use the scripted double in
//! [`crate::testing`].

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use reel_models::{BackgroundMusic, EncodingProfile, Resolution, Transitions};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::filters;
use crate::probe::probe_duration;

/// Frame size and rate every intermediate clip is produced at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipSpec {
    pub resolution: Resolution,
    pub fps: u32,
}

/// A local clip produced by the Materialize stage.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterializedClip {
    /// Scene order the clip came from
    pub order: u32,
    pub path: PathBuf,
    /// Duration in seconds
    pub duration: f64,
}

/// Settings for the Compose stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComposePlan {
    pub spec: ClipSpec,
    pub transitions: Transitions,
    pub profile: EncodingProfile,
}

/// Operations the pipeline needs from an encoder.
///
/// Every method writes exactly one file at `output` and returns the
/// duration of what it wrote, in seconds.
#[async_trait]
pub trait MediaEncoder: Send + Sync {
    /// Fetch a remote or local video and transcode it to a silent clip.
    async fn fetch_clip(&self, source: &str, output: &Path, spec: &ClipSpec) -> MediaResult<f64>;

    /// Render a still image as a clip of `seconds`.
    async fn image_to_clip(
        &self,
        image: &str,
        output: &Path,
        spec: &ClipSpec,
        seconds: f64,
    ) -> MediaResult<f64>;

    /// Fetch a music track.
    async fn fetch_audio(&self, source: &str, output: &Path) -> MediaResult<f64>;

    /// Join clips in the given order with the planned transitions.
    async fn compose(
        &self,
        clips: &[MaterializedClip],
        output: &Path,
        plan: &ComposePlan,
    ) -> MediaResult<f64>;

    /// Mux music onto a video. The result lasts as long as the shorter input.
    #[allow(clippy::too_many_arguments)]
    async fn mix_audio(
        &self,
        video: &Path,
        video_duration: f64,
        music: &Path,
        music_duration: f64,
        settings: &BackgroundMusic,
        output: &Path,
        profile: &EncodingProfile,
    ) -> MediaResult<f64>;
}

/// Production encoder driving the `ffmpeg` and `ffprobe` binaries.
#[derive(Debug, Clone, Default)]
pub struct FfmpegEncoder {
    runner: FfmpegRunner,
}

impl FfmpegEncoder {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            runner: FfmpegRunner::new().with_timeout(timeout),
        }
    }

    async fn run_and_probe(&self, cmd: FfmpegCommand) -> MediaResult<f64> {
        self.runner.run(&cmd).await?;
        let output = cmd.output_path();
        if !output.exists() {
            return Err(MediaError::ffmpeg_failed(
                format!("FFmpeg reported success but wrote no {}", output.display()),
                None,
                None,
            ));
        }
        probe_duration(output).await
    }
}

/// Fast intermediate encode; the final quality is applied in Compose.
const INTERMEDIATE_ARGS: [&str; 8] = [
    "-c:v", "libx264", "-preset", "veryfast", "-crf", "18", "-pix_fmt", "yuv420p",
];

#[async_trait]
impl MediaEncoder for FfmpegEncoder {
    async fn fetch_clip(&self, source: &str, output: &Path, spec: &ClipSpec) -> MediaResult<f64> {
        debug!(source = %source, "Materializing video clip");

        let cmd = FfmpegCommand::new(source, output)
            .video_filter(filters::fit_and_pad(spec.resolution))
            .frame_rate(spec.fps)
            .no_audio()
            .output_args(INTERMEDIATE_ARGS);

        self.run_and_probe(cmd).await
    }

    async fn image_to_clip(
        &self,
        image: &str,
        output: &Path,
        spec: &ClipSpec,
        seconds: f64,
    ) -> MediaResult<f64> {
        if seconds.is_nan() || seconds <= 0.0 {
            return Err(MediaError::invalid_input(format!(
                "image clip duration must be positive, got {seconds}"
            )));
        }
        debug!(image = %image, seconds, "Rendering still image clip");

        let cmd = FfmpegCommand::to_output(output)
            .input_with_args(["-loop", "1"], image)
            .video_filter(filters::fit_and_pad(spec.resolution))
            .frame_rate(spec.fps)
            .duration(seconds)
            .output_args(["-tune", "stillimage"])
            .output_args(INTERMEDIATE_ARGS);

        self.runner.run(&cmd).await?;
        Ok(seconds)
    }

    async fn fetch_audio(&self, source: &str, output: &Path) -> MediaResult<f64> {
        debug!(source = %source, "Fetching music track");

        let cmd = FfmpegCommand::new(source, output)
            .output_args(["-vn", "-c:a", "pcm_s16le"]);

        self.run_and_probe(cmd).await
    }

    async fn compose(
        &self,
        clips: &[MaterializedClip],
        output: &Path,
        plan: &ComposePlan,
    ) -> MediaResult<f64> {
        let durations: Vec<f64> = clips.iter().map(|c| c.duration).collect();
        let graph = filters::compose_graph(
            &durations,
            plan.transitions,
            plan.spec.resolution,
            plan.spec.fps,
        )
        .ok_or_else(|| MediaError::invalid_input("no clips to compose"))?;

        debug!(
            clips = clips.len(),
            transition = %plan.transitions.kind,
            expected_duration = graph.duration,
            "Composing clips"
        );

        let cmd = clips
            .iter()
            .fold(FfmpegCommand::to_output(output), |cmd, clip| {
                cmd.input(clip.path.to_string_lossy())
            })
            .filter_complex(graph.filter)
            .map(graph.output_label)
            .no_audio()
            .output_args(plan.profile.video_args())
            .output_args(plan.profile.muxer_args());

        self.run_and_probe(cmd).await
    }

    async fn mix_audio(
        &self,
        video: &Path,
        video_duration: f64,
        music: &Path,
        music_duration: f64,
        settings: &BackgroundMusic,
        output: &Path,
        profile: &EncodingProfile,
    ) -> MediaResult<f64> {
        let graph = filters::music_graph(settings, video_duration, music_duration);

        debug!(
            video_duration,
            music_duration,
            final_duration = graph.duration,
            "Mixing background music"
        );

        let cmd = FfmpegCommand::to_output(output)
            .input(video.to_string_lossy())
            .input(music.to_string_lossy())
            .filter_complex(graph.filter)
            .map("0:v")
            .map(graph.output_label)
            .output_args(["-c:v", "copy"])
            .output_args(profile.audio_args())
            .duration(graph.duration)
            .output_arg("-shortest")
            .output_args(profile.muxer_args());

        self.run_and_probe(cmd).await
    }
}
