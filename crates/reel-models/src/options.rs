//! Composition options and their defaults.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Frame rate used for image-derived clips when none is given.
pub const DEFAULT_FPS: u32 = 24;
/// Length of a clip synthesized from a still image.
pub const DEFAULT_IMAGE_CLIP_SECONDS: f64 = 3.0;
/// Crossfade length between consecutive clips.
pub const DEFAULT_TRANSITION_SECONDS: f64 = 0.5;

const MAX_FPS: u32 = 120;
const MAX_TRANSITION_SECONDS: f64 = 10.0;
const MAX_MUSIC_VOLUME: f64 = 4.0;

/// Errors produced while parsing or validating options.
#[derive(Debug, Error, PartialEq)]
pub enum OptionsError {
    #[error("Invalid resolution: {0}")]
    InvalidResolution(String),

    #[error("Unknown quality: {0}")]
    UnknownQuality(String),

    #[error("Unknown format: {0}")]
    UnknownFormat(String),

    #[error("Unknown transition: {0}")]
    UnknownTransition(String),

    #[error("Invalid option {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl OptionsError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Target frame size, written as `WIDTHxHEIGHT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const HD: Resolution = Resolution::new(1280, 720);
    pub const FULL_HD: Resolution = Resolution::new(1920, 1080);
    pub const QHD: Resolution = Resolution::new(2560, 1440);
    pub const UHD: Resolution = Resolution::new(3840, 2160);

    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::HD
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = OptionsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || OptionsError::InvalidResolution(s.to_string());
        let (w, h) = s.trim().split_once(['x', 'X']).ok_or_else(invalid)?;
        let width: u32 = w.trim().parse().map_err(|_| invalid())?;
        let height: u32 = h.trim().parse().map_err(|_| invalid())?;

        // Encoders using yuv420p require even dimensions.
        if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
            return Err(invalid());
        }
        if width > 7680 || height > 4320 {
            return Err(invalid());
        }

        Ok(Self { width, height })
    }
}

impl TryFrom<String> for Resolution {
    type Error = OptionsError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Resolution> for String {
    fn from(value: Resolution) -> Self {
        value.to_string()
    }
}

impl JsonSchema for Resolution {
    fn schema_name() -> String {
        "Resolution".to_string()
    }

    fn json_schema(gen: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
        String::json_schema(gen)
    }
}

/// Quality tier, mapped to an encoder compression setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    Low,
    #[default]
    Medium,
    High,
    Ultra,
}

impl Quality {
    pub const ALL: &'static [Quality] = &[Quality::Low, Quality::Medium, Quality::High, Quality::Ultra];

    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Low => "low",
            Quality::Medium => "medium",
            Quality::High => "high",
            Quality::Ultra => "ultra",
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Quality {
    type Err = OptionsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Quality::Low),
            "medium" => Ok(Quality::Medium),
            "high" => Ok(Quality::High),
            "ultra" => Ok(Quality::Ultra),
            _ => Err(OptionsError::UnknownQuality(s.to_string())),
        }
    }
}

/// Output container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Mp4,
    Mov,
    Webm,
}

impl OutputFormat {
    pub const ALL: &'static [OutputFormat] = &[OutputFormat::Mp4, OutputFormat::Mov, OutputFormat::Webm];

    /// File extension, without the leading dot.
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Mp4 => "mp4",
            OutputFormat::Mov => "mov",
            OutputFormat::Webm => "webm",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = OptionsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mp4" => Ok(OutputFormat::Mp4),
            "mov" => Ok(OutputFormat::Mov),
            "webm" => Ok(OutputFormat::Webm),
            _ => Err(OptionsError::UnknownFormat(s.to_string())),
        }
    }
}

/// Visual effect between consecutive clips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransitionType {
    /// Hard cut
    None,
    #[default]
    Fade,
    Slide,
    Dissolve,
}

impl TransitionType {
    pub const ALL: &'static [TransitionType] = &[
        TransitionType::None,
        TransitionType::Fade,
        TransitionType::Slide,
        TransitionType::Dissolve,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionType::None => "none",
            TransitionType::Fade => "fade",
            TransitionType::Slide => "slide",
            TransitionType::Dissolve => "dissolve",
        }
    }

    /// Name of the matching FFmpeg `xfade` transition, `None` for a hard cut.
    pub fn xfade_name(&self) -> Option<&'static str> {
        match self {
            TransitionType::None => None,
            TransitionType::Fade => Some("fade"),
            TransitionType::Slide => Some("slideleft"),
            TransitionType::Dissolve => Some("dissolve"),
        }
    }
}

impl fmt::Display for TransitionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransitionType {
    type Err = OptionsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(TransitionType::None),
            "fade" => Ok(TransitionType::Fade),
            "slide" => Ok(TransitionType::Slide),
            "dissolve" => Ok(TransitionType::Dissolve),
            _ => Err(OptionsError::UnknownTransition(s.to_string())),
        }
    }
}

/// Transition applied between every pair of consecutive clips.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Transitions {
    #[serde(rename = "type", default)]
    pub kind: TransitionType,
    /// Crossfade length in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

impl Default for Transitions {
    fn default() -> Self {
        Self {
            kind: TransitionType::Fade,
            duration: Some(DEFAULT_TRANSITION_SECONDS),
        }
    }
}

impl Transitions {
    pub fn hard_cut() -> Self {
        Self {
            kind: TransitionType::None,
            duration: None,
        }
    }

    pub fn duration_secs(&self) -> f64 {
        self.duration.unwrap_or(DEFAULT_TRANSITION_SECONDS)
    }

    pub fn is_hard_cut(&self) -> bool {
        self.kind == TransitionType::None
    }
}

/// Optional music track muxed over the composed video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackgroundMusic {
    pub url: String,
    /// Linear gain, 1.0 keeps the source level
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
    /// Fade-in length in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fade_in: Option<f64>,
    /// Fade-out length in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fade_out: Option<f64>,
}

impl BackgroundMusic {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            volume: None,
            fade_in: None,
            fade_out: None,
        }
    }

    pub fn with_volume(mut self, volume: f64) -> Self {
        self.volume = Some(volume);
        self
    }

    pub fn with_fades(mut self, fade_in: f64, fade_out: f64) -> Self {
        self.fade_in = Some(fade_in);
        self.fade_out = Some(fade_out);
        self
    }

    pub fn volume(&self) -> f64 {
        self.volume.unwrap_or(1.0)
    }
}

/// Options recognized by a composition request.
///
/// Every field is optional on the wire; accessors apply the documented
/// defaults. `resolution` falls back to the worker-configured default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CompositionOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<Quality>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<OutputFormat>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_music: Option<BackgroundMusic>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transitions: Option<Transitions>,

    /// Queue priority, higher is dispatched first
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,

    /// Milliseconds to wait before the job becomes eligible
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<u64>,
}

impl CompositionOptions {
    pub fn fps(&self) -> u32 {
        self.fps.unwrap_or(DEFAULT_FPS)
    }

    pub fn quality(&self) -> Quality {
        self.quality.unwrap_or_default()
    }

    pub fn format(&self) -> OutputFormat {
        self.format.unwrap_or_default()
    }

    pub fn transitions(&self) -> Transitions {
        self.transitions.unwrap_or_default()
    }

    pub fn resolution_or(&self, fallback: Resolution) -> Resolution {
        self.resolution.unwrap_or(fallback)
    }

    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = Some(resolution);
        self
    }

    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = Some(quality);
        self
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_transitions(mut self, transitions: Transitions) -> Self {
        self.transitions = Some(transitions);
        self
    }

    pub fn with_background_music(mut self, music: BackgroundMusic) -> Self {
        self.background_music = Some(music);
        self
    }

    /// Check the numeric ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), OptionsError> {
        if let Some(fps) = self.fps {
            if fps == 0 || fps > MAX_FPS {
                return Err(OptionsError::invalid("fps", format!("must be 1..={MAX_FPS}, got {fps}")));
            }
        }

        if let Some(transitions) = &self.transitions {
            let d = transitions.duration_secs();
            if !d.is_finite() || d < 0.0 || d > MAX_TRANSITION_SECONDS {
                return Err(OptionsError::invalid(
                    "transitions.duration",
                    format!("must be 0..={MAX_TRANSITION_SECONDS} seconds, got {d}"),
                ));
            }
        }

        if let Some(music) = &self.background_music {
            if music.url.trim().is_empty() {
                return Err(OptionsError::invalid("backgroundMusic.url", "must not be empty"));
            }
            let volume = music.volume();
            if !volume.is_finite() || !(0.0..=MAX_MUSIC_VOLUME).contains(&volume) {
                return Err(OptionsError::invalid(
                    "backgroundMusic.volume",
                    format!("must be 0..={MAX_MUSIC_VOLUME}, got {volume}"),
                ));
            }
            for (field, fade) in [
                ("backgroundMusic.fadeIn", music.fade_in),
                ("backgroundMusic.fadeOut", music.fade_out),
            ] {
                if let Some(fade) = fade {
                    if !fade.is_finite() || fade < 0.0 {
                        return Err(OptionsError::invalid(field, format!("must be >= 0, got {fade}")));
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_parse() {
        assert_eq!("1920x1080".parse::<Resolution>().unwrap(), Resolution::FULL_HD);
        assert_eq!(" 1280X720 ".parse::<Resolution>().unwrap(), Resolution::HD);
        assert!("1920".parse::<Resolution>().is_err());
        assert!("0x1080".parse::<Resolution>().is_err());
        assert!("1921x1080".parse::<Resolution>().is_err());
        assert!("axb".parse::<Resolution>().is_err());
    }

    #[test]
    fn test_defaults_when_options_empty() {
        let options: CompositionOptions = serde_json::from_str("{}").unwrap();

        assert_eq!(options.fps(), 24);
        assert_eq!(options.quality(), Quality::Medium);
        assert_eq!(options.format(), OutputFormat::Mp4);
        assert_eq!(options.transitions().kind, TransitionType::Fade);
        assert!((options.transitions().duration_secs() - 0.5).abs() < f64::EPSILON);
        assert_eq!(options.resolution_or(Resolution::QHD), Resolution::QHD);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_camel_case_wire_format() {
        let json = r#"{
            "resolution": "1920x1080",
            "quality": "ultra",
            "format": "webm",
            "backgroundMusic": {"url": "https://cdn.example.com/a.mp3", "volume": 0.5, "fadeIn": 1, "fadeOut": 2},
            "transitions": {"type": "dissolve", "duration": 1.0}
        }"#;
        let options: CompositionOptions = serde_json::from_str(json).unwrap();

        assert_eq!(options.resolution, Some(Resolution::FULL_HD));
        assert_eq!(options.quality(), Quality::Ultra);
        assert_eq!(options.format(), OutputFormat::Webm);
        assert_eq!(options.transitions().kind, TransitionType::Dissolve);
        let music = options.background_music.unwrap();
        assert_eq!(music.fade_in, Some(1.0));
        assert_eq!(music.fade_out, Some(2.0));
    }

    #[test]
    fn test_unknown_quality_rejected_at_parse() {
        let result: Result<CompositionOptions, _> = serde_json::from_str(r#"{"quality": "insane"}"#);
        assert!(result.is_err());

        let result: Result<CompositionOptions, _> = serde_json::from_str(r#"{"format": "avi"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_ranges() {
        let options = CompositionOptions {
            fps: Some(0),
            ..Default::default()
        };
        assert!(matches!(options.validate(), Err(OptionsError::Invalid { field: "fps", .. })));

        let options = CompositionOptions::default().with_transitions(Transitions {
            kind: TransitionType::Fade,
            duration: Some(-1.0),
        });
        assert!(options.validate().is_err());

        let options = CompositionOptions::default().with_background_music(BackgroundMusic::new(" "));
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_xfade_names() {
        assert_eq!(TransitionType::None.xfade_name(), None);
        assert_eq!(TransitionType::Fade.xfade_name(), Some("fade"));
        assert_eq!(TransitionType::Slide.xfade_name(), Some("slideleft"));
        assert_eq!(TransitionType::Dissolve.xfade_name(), Some("dissolve"));
    }
}
