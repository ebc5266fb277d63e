//! Deterministic encoder for tests.
//!
//! `ScriptedEncoder` writes placeholder files instead of running FFmpeg,
//! reports configured durations, records every call and can be told to fail
//! the next N calls of an operation.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

use reel_models::{BackgroundMusic, EncodingProfile, TransitionType};

use crate::encoder::{ClipSpec, ComposePlan, MaterializedClip, MediaEncoder};
use crate::error::{MediaError, MediaResult};
use crate::filters;

/// Encoder operation, used to script failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncoderOp {
    FetchClip,
    ImageToClip,
    FetchAudio,
    Compose,
    MixAudio,
}

/// One recorded encoder invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum EncoderCall {
    FetchClip {
        source: String,
    },
    ImageToClip {
        image: String,
        seconds: f64,
        fps: u32,
    },
    FetchAudio {
        source: String,
    },
    Compose {
        orders: Vec<u32>,
        inputs: Vec<PathBuf>,
        transition: TransitionType,
        duration: f64,
    },
    MixAudio {
        video_duration: f64,
        music_duration: f64,
        duration: f64,
    },
}

impl EncoderCall {
    pub fn op(&self) -> EncoderOp {
        match self {
            EncoderCall::FetchClip { .. } => EncoderOp::FetchClip,
            EncoderCall::ImageToClip { .. } => EncoderOp::ImageToClip,
            EncoderCall::FetchAudio { .. } => EncoderOp::FetchAudio,
            EncoderCall::Compose { .. } => EncoderOp::Compose,
            EncoderCall::MixAudio { .. } => EncoderOp::MixAudio,
        }
    }
}

#[derive(Debug, Default)]
struct Script {
    calls: Vec<EncoderCall>,
    started: Vec<(EncoderOp, Instant)>,
    pending_failures: HashMap<EncoderOp, u32>,
    broken_sources: HashSet<String>,
}

/// In-process encoder double.
#[derive(Debug)]
pub struct ScriptedEncoder {
    clip_duration: f64,
    music_duration: f64,
    latency: Duration,
    script: Mutex<Script>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl Default for ScriptedEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedEncoder {
    /// Video clips last 4s and music 30s unless configured otherwise.
    pub fn new() -> Self {
        Self {
            clip_duration: 4.0,
            music_duration: 30.0,
            latency: Duration::ZERO,
            script: Mutex::new(Script::default()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_clip_duration(mut self, seconds: f64) -> Self {
        self.clip_duration = seconds;
        self
    }

    pub fn with_music_duration(mut self, seconds: f64) -> Self {
        self.music_duration = seconds;
        self
    }

    /// Make every call take `latency` (on the tokio clock).
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail the next `times` calls of `op`.
    pub fn fail_next(&self, op: EncoderOp, times: u32) {
        *self.script().pending_failures.entry(op).or_insert(0) += times;
    }

    /// Fail every fetch of `source`.
    pub fn break_source(&self, source: impl Into<String>) {
        self.script().broken_sources.insert(source.into());
    }

    /// All calls so far, failed ones included.
    pub fn calls(&self) -> Vec<EncoderCall> {
        self.script().calls.clone()
    }

    /// Start times of every call of `op`, on the tokio clock.
    pub fn started_at(&self, op: EncoderOp) -> Vec<Instant> {
        self.script()
            .started
            .iter()
            .filter(|(o, _)| *o == op)
            .map(|(_, at)| *at)
            .collect()
    }

    pub fn count(&self, op: EncoderOp) -> usize {
        self.script().calls.iter().filter(|c| c.op() == op).count()
    }

    /// Highest number of calls that were running at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn invoke(
        &self,
        call: EncoderCall,
        source: Option<&str>,
        output: &Path,
        duration: f64,
    ) -> MediaResult<f64> {
        let op = call.op();
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
        self.script().started.push((op, Instant::now()));

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let failure = {
            let mut script = self.script();
            script.calls.push(call);

            let broken = source.is_some_and(|s| script.broken_sources.contains(s));
            let scripted = match script.pending_failures.get_mut(&op) {
                Some(left) if *left > 0 => {
                    *left -= 1;
                    true
                }
                _ => false,
            };
            broken || scripted
        };

        let result = if failure {
            Err(MediaError::ffmpeg_failed(
                format!("scripted {op:?} failure"),
                Some("Conversion failed!".to_string()),
                Some(1),
            ))
        } else {
            tokio::fs::write(output, format!("{op:?}"))
                .await
                .map(|_| duration)
                .map_err(MediaError::from)
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

#[async_trait]
impl MediaEncoder for ScriptedEncoder {
    async fn fetch_clip(&self, source: &str, output: &Path, _spec: &ClipSpec) -> MediaResult<f64> {
        let call = EncoderCall::FetchClip {
            source: source.to_string(),
        };
        self.invoke(call, Some(source), output, self.clip_duration)
            .await
    }

    async fn image_to_clip(
        &self,
        image: &str,
        output: &Path,
        spec: &ClipSpec,
        seconds: f64,
    ) -> MediaResult<f64> {
        let call = EncoderCall::ImageToClip {
            image: image.to_string(),
            seconds,
            fps: spec.fps,
        };
        self.invoke(call, Some(image), output, seconds).await
    }

    async fn fetch_audio(&self, source: &str, output: &Path) -> MediaResult<f64> {
        let call = EncoderCall::FetchAudio {
            source: source.to_string(),
        };
        self.invoke(call, Some(source), output, self.music_duration)
            .await
    }

    async fn compose(
        &self,
        clips: &[MaterializedClip],
        output: &Path,
        plan: &ComposePlan,
    ) -> MediaResult<f64> {
        if clips.is_empty() {
            return Err(MediaError::invalid_input("no clips to compose"));
        }
        let durations: Vec<f64> = clips.iter().map(|c| c.duration).collect();
        let duration = filters::composed_duration(plan.transitions, &durations);

        let call = EncoderCall::Compose {
            orders: clips.iter().map(|c| c.order).collect(),
            inputs: clips.iter().map(|c| c.path.clone()).collect(),
            transition: plan.transitions.kind,
            duration,
        };
        self.invoke(call, None, output, duration).await
    }

    async fn mix_audio(
        &self,
        _video: &Path,
        video_duration: f64,
        _music: &Path,
        music_duration: f64,
        _settings: &BackgroundMusic,
        output: &Path,
        _profile: &EncodingProfile,
    ) -> MediaResult<f64> {
        let duration = video_duration.min(music_duration);
        let call = EncoderCall::MixAudio {
            video_duration,
            music_duration,
            duration,
        };
        self.invoke(call, None, output, duration).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_models::{Resolution, Transitions};
    use tempfile::TempDir;

    fn spec() -> ClipSpec {
        ClipSpec {
            resolution: Resolution::HD,
            fps: 24,
        }
    }

    #[tokio::test]
    async fn test_writes_placeholder_and_reports_duration() {
        let dir = TempDir::new().unwrap();
        let encoder = ScriptedEncoder::new().with_clip_duration(2.5);
        let out = dir.path().join("clip.mp4");

        let duration = encoder.fetch_clip("a.mp4", &out, &spec()).await.unwrap();

        assert!((duration - 2.5).abs() < 1e-9);
        assert!(out.exists());
        assert_eq!(encoder.count(EncoderOp::FetchClip), 1);
    }

    #[tokio::test]
    async fn test_fail_next_is_consumed() {
        let dir = TempDir::new().unwrap();
        let encoder = ScriptedEncoder::new();
        encoder.fail_next(EncoderOp::Compose, 1);

        let clips = vec![MaterializedClip {
            order: 0,
            path: dir.path().join("c0.mp4"),
            duration: 3.0,
        }];
        let plan = ComposePlan {
            spec: spec(),
            transitions: Transitions::default(),
            profile: EncodingProfile::default(),
        };
        let out = dir.path().join("movie.mp4");

        assert!(encoder.compose(&clips, &out, &plan).await.is_err());
        assert!(!out.exists());
        assert!(encoder.compose(&clips, &out, &plan).await.is_ok());
        assert_eq!(encoder.count(EncoderOp::Compose), 2);
    }

    #[tokio::test]
    async fn test_broken_source_always_fails() {
        let dir = TempDir::new().unwrap();
        let encoder = ScriptedEncoder::new();
        encoder.break_source("bad.png");

        for _ in 0..2 {
            let result = encoder
                .image_to_clip("bad.png", &dir.path().join("x.mp4"), &spec(), 3.0)
                .await;
            assert!(result.is_err());
        }
    }
}
