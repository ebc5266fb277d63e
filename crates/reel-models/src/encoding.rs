//! Encoder profiles for the final composition.
//!
//! Quality tiers and output formats resolve to parameter structs through
//! static tables, so an unknown key is rejected when the options are parsed
//! instead of when FFmpeg runs.

use serde::Serialize;

use crate::options::{OutputFormat, Quality};

/// Default audio bitrate for muxed music
pub const DEFAULT_AUDIO_BITRATE: &str = "128k";
/// Pixel format compatible with every target player
pub const DEFAULT_PIXEL_FORMAT: &str = "yuv420p";

/// Compression parameters for one quality tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QualityProfile {
    pub quality: Quality,
    /// Constant Rate Factor for H.264 (lower is finer)
    pub crf: u8,
    /// Constant Rate Factor for VP9 (lower is finer)
    pub vp9_crf: u8,
    pub preset: &'static str,
}

/// Codec and muxer parameters for one output container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FormatProfile {
    pub format: OutputFormat,
    pub video_codec: &'static str,
    pub audio_codec: &'static str,
    /// Extra muxer flags appended after the codec arguments
    pub muxer_args: &'static [&'static str],
}

const QUALITY_TABLE: &[QualityProfile] = &[
    QualityProfile { quality: Quality::Low, crf: 28, vp9_crf: 40, preset: "medium" },
    QualityProfile { quality: Quality::Medium, crf: 23, vp9_crf: 33, preset: "medium" },
    QualityProfile { quality: Quality::High, crf: 18, vp9_crf: 28, preset: "medium" },
    QualityProfile { quality: Quality::Ultra, crf: 15, vp9_crf: 24, preset: "slow" },
];

const FORMAT_TABLE: &[FormatProfile] = &[
    FormatProfile {
        format: OutputFormat::Mp4,
        video_codec: "libx264",
        audio_codec: "aac",
        muxer_args: &["-movflags", "+faststart"],
    },
    FormatProfile {
        format: OutputFormat::Mov,
        video_codec: "libx264",
        audio_codec: "aac",
        muxer_args: &["-movflags", "+faststart"],
    },
    FormatProfile {
        format: OutputFormat::Webm,
        video_codec: "libvpx-vp9",
        audio_codec: "libopus",
        muxer_args: &[],
    },
];

impl QualityProfile {
    pub fn lookup(quality: Quality) -> &'static QualityProfile {
        QUALITY_TABLE
            .iter()
            .find(|p| p.quality == quality)
            .unwrap_or(&QUALITY_TABLE[1])
    }
}

impl FormatProfile {
    pub fn lookup(format: OutputFormat) -> &'static FormatProfile {
        FORMAT_TABLE
            .iter()
            .find(|p| p.format == format)
            .unwrap_or(&FORMAT_TABLE[0])
    }

    pub fn is_vp9(&self) -> bool {
        self.video_codec == "libvpx-vp9"
    }
}

/// Resolved encoder settings for one composition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EncodingProfile {
    pub quality: QualityProfile,
    pub format: FormatProfile,
}

impl EncodingProfile {
    pub fn resolve(quality: Quality, format: OutputFormat) -> Self {
        Self {
            quality: *QualityProfile::lookup(quality),
            format: *FormatProfile::lookup(format),
        }
    }

    /// Video encoder arguments (codec, rate control, pixel format).
    pub fn video_args(&self) -> Vec<String> {
        let mut args = vec!["-c:v".to_string(), self.format.video_codec.to_string()];

        if self.format.is_vp9() {
            // VP9 constant quality mode needs an explicit zero bitrate.
            args.extend([
                "-crf".to_string(),
                self.quality.vp9_crf.to_string(),
                "-b:v".to_string(),
                "0".to_string(),
            ]);
        } else {
            args.extend([
                "-preset".to_string(),
                self.quality.preset.to_string(),
                "-crf".to_string(),
                self.quality.crf.to_string(),
            ]);
        }

        args.extend(["-pix_fmt".to_string(), DEFAULT_PIXEL_FORMAT.to_string()]);
        args
    }

    /// Audio encoder arguments for muxed music.
    pub fn audio_args(&self) -> Vec<String> {
        vec![
            "-c:a".to_string(),
            self.format.audio_codec.to_string(),
            "-b:a".to_string(),
            DEFAULT_AUDIO_BITRATE.to_string(),
        ]
    }

    /// Container flags appended last.
    pub fn muxer_args(&self) -> Vec<String> {
        self.format.muxer_args.iter().map(|s| s.to_string()).collect()
    }
}

impl Default for EncodingProfile {
    fn default() -> Self {
        Self::resolve(Quality::default(), OutputFormat::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_tiers_are_ordered_coarse_to_fine() {
        let crfs: Vec<u8> = Quality::ALL.iter().map(|q| QualityProfile::lookup(*q).crf).collect();
        assert_eq!(crfs, vec![28, 23, 18, 15]);
        assert!(crfs.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn test_every_key_has_a_table_row() {
        for q in Quality::ALL {
            assert_eq!(QualityProfile::lookup(*q).quality, *q);
        }
        for f in OutputFormat::ALL {
            assert_eq!(FormatProfile::lookup(*f).format, *f);
        }
    }

    #[test]
    fn test_mp4_video_args() {
        let profile = EncodingProfile::resolve(Quality::High, OutputFormat::Mp4);
        let args = profile.video_args();
        assert_eq!(args[..2], ["-c:v".to_string(), "libx264".to_string()]);
        assert!(args.windows(2).any(|w| w[0] == "-crf" && w[1] == "18"));
        assert_eq!(profile.muxer_args(), vec!["-movflags", "+faststart"]);
    }

    #[test]
    fn test_webm_uses_vp9_constant_quality() {
        let profile = EncodingProfile::resolve(Quality::Low, OutputFormat::Webm);
        let args = profile.video_args();
        assert!(args.contains(&"libvpx-vp9".to_string()));
        assert!(args.windows(2).any(|w| w[0] == "-b:v" && w[1] == "0"));
        assert_eq!(profile.audio_args()[1], "libopus");
        assert!(profile.muxer_args().is_empty());
    }
}
