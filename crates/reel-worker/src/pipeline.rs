//! Movie composition pipeline.
//!
//! One run turns a project's completed scenes into a single movie file:
//!
//! 1. **Materialize**: every scene becomes a local clip at the target size
//!    and frame rate (videos are transcoded, stills rendered for a fixed
//!    duration). Scenes without any media reference are skipped.
//! 2. **Compose**: the clips are joined in scene order, with crossfades
//!    unless a hard cut was requested.
//! 3. **MixAudio**: optional background music is trimmed to the movie and
//!    muxed in.
//! 4. **Finalize**: the result is moved out of the workspace into the
//!    output directory.
//!
//! All intermediate files live in the job's `TempWorkspace`; the caller
//! owns its cleanup.

use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::Instant;

use reel_media::{move_file, ClipSpec, ComposePlan, MaterializedClip, MediaEncoder, TempWorkspace};
use reel_models::{EncodingProfile, Resolution, Scene, SceneSource};
use reel_queue::ComposeMovieJob;

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutput {
    /// Stored location of the movie
    pub video_url: String,
    /// Duration of the movie in seconds
    pub duration: f64,
    /// Clips that made it into the movie
    pub clip_count: usize,
}

pub struct Pipeline {
    encoder: Arc<dyn MediaEncoder>,
    output_dir: PathBuf,
    default_resolution: Resolution,
    image_clip_seconds: f64,
}

impl Pipeline {
    pub fn new(encoder: Arc<dyn MediaEncoder>, config: &WorkerConfig) -> Self {
        Self {
            encoder,
            output_dir: config.output_dir.clone(),
            default_resolution: config.default_resolution,
            image_clip_seconds: config.image_clip_seconds,
        }
    }

    /// Run all stages for `job` over `scenes`, which must already be the
    /// project's completed scenes in ascending order.
    pub async fn run(
        &self,
        job: &ComposeMovieJob,
        scenes: &[Scene],
        workspace: &TempWorkspace,
        logger: &JobLogger,
    ) -> WorkerResult<PipelineOutput> {
        job.options.validate()?;
        if scenes.is_empty() {
            return Err(WorkerError::no_completed_scenes(&job.project_id));
        }

        let options = &job.options;
        let spec = ClipSpec {
            resolution: options.resolution_or(self.default_resolution),
            fps: options.fps(),
        };
        let profile = EncodingProfile::resolve(options.quality(), options.format());
        let ext = options.format().extension();

        let clips = self.materialize(job, scenes, &spec, workspace, logger).await?;
        if clips.is_empty() {
            return Err(WorkerError::no_completed_scenes(&job.project_id));
        }

        let plan = ComposePlan {
            spec,
            transitions: options.transitions(),
            profile,
        };
        let composed_path = workspace.file(&format!("composed.{ext}"));
        let started = Instant::now();
        let mut duration = self.encoder.compose(&clips, &composed_path, &plan).await?;
        self.stage_done(logger, "compose", started);
        logger.log_progress(&format!(
            "Composed {} clips into {:.2}s ({})",
            clips.len(),
            duration,
            plan.transitions.kind.as_str()
        ));

        let mut final_path = composed_path;
        if let Some(music) = &options.background_music {
            let started = Instant::now();
            let music_path = workspace.file("music.wav");
            let music_duration = self.encoder.fetch_audio(&music.url, &music_path).await?;

            let mixed_path = workspace.file(&format!("mixed.{ext}"));
            duration = self
                .encoder
                .mix_audio(
                    &final_path,
                    duration,
                    &music_path,
                    music_duration,
                    music,
                    &mixed_path,
                    &profile,
                )
                .await?;
            final_path = mixed_path;
            self.stage_done(logger, "mix_audio", started);
        }

        let started = Instant::now();
        let destination = self.output_dir.join(format!("{}.{ext}", job.job_id));
        move_file(&final_path, &destination).await?;
        self.stage_done(logger, "finalize", started);

        Ok(PipelineOutput {
            video_url: destination.to_string_lossy().into_owned(),
            duration,
            clip_count: clips.len(),
        })
    }

    async fn materialize(
        &self,
        job: &ComposeMovieJob,
        scenes: &[Scene],
        spec: &ClipSpec,
        workspace: &TempWorkspace,
        logger: &JobLogger,
    ) -> WorkerResult<Vec<MaterializedClip>> {
        let started = Instant::now();
        let mut clips = Vec::with_capacity(scenes.len());

        // Files are named by position; `order` need not be unique.
        for (index, scene) in scenes.iter().enumerate() {
            let path = workspace.file(&format!("scene_{index:04}.mp4"));
            let duration = match scene.source() {
                Some(SceneSource::Video(url)) => self.encoder.fetch_clip(url, &path, spec).await?,
                Some(SceneSource::Image(url)) => {
                    self.encoder
                        .image_to_clip(url, &path, spec, self.image_clip_seconds)
                        .await?
                }
                None => {
                    logger.log_warning(&format!(
                        "Scene {} of project {} has no media, skipping",
                        scene.order, job.project_id
                    ));
                    metrics::record_scene_skipped();
                    continue;
                }
            };

            clips.push(MaterializedClip {
                order: scene.order,
                path,
                duration,
            });
        }

        self.stage_done(logger, "materialize", started);
        Ok(clips)
    }

    fn stage_done(&self, logger: &JobLogger, stage: &str, started: Instant) {
        let elapsed = started.elapsed();
        logger.log_stage(stage, elapsed);
        metrics::record_stage_duration(stage, elapsed.as_secs_f64());
    }
}
