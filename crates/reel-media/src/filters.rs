//! FFmpeg filter graphs for composition.
//!
//! Every clip is normalized to the target frame size, frame rate and
//! timebase before it enters the transition chain; `xfade` rejects inputs
//! that disagree on any of them.

use reel_models::{BackgroundMusic, Resolution, Transitions};

/// Label of the composed video stream.
pub const VIDEO_OUT: &str = "[vout]";
/// Label of the processed music stream.
pub const AUDIO_OUT: &str = "[aout]";

/// Scale to fit inside the frame and letterbox the remainder.
pub fn fit_and_pad(resolution: Resolution) -> String {
    let Resolution { width, height } = resolution;
    format!(
        "scale={width}:{height}:force_original_aspect_ratio=decrease,\
         pad={width}:{height}:(ow-iw)/2:(oh-ih)/2,setsar=1"
    )
}

/// Per-clip normalization chain.
pub fn normalize_clip(resolution: Resolution, fps: u32) -> String {
    format!(
        "{},fps={fps},format=yuv420p,settb=AVTB,setpts=PTS-STARTPTS",
        fit_and_pad(resolution)
    )
}

/// Crossfade length actually applied between clips.
///
/// Clamped to half the shortest clip so every `xfade` offset stays inside
/// the clip it starts in.
pub fn effective_transition(transitions: Transitions, clip_durations: &[f64]) -> f64 {
    if transitions.is_hard_cut() || clip_durations.len() < 2 {
        return 0.0;
    }
    let shortest = clip_durations.iter().copied().fold(f64::INFINITY, f64::min);
    transitions.duration_secs().max(0.0).min(shortest / 2.0)
}

/// Length of the composed video: each transition overlaps two clips.
pub fn composed_duration(transitions: Transitions, clip_durations: &[f64]) -> f64 {
    let total: f64 = clip_durations.iter().sum();
    let overlap = effective_transition(transitions, clip_durations);
    let joins = clip_durations.len().saturating_sub(1) as f64;
    (total - overlap * joins).max(0.0)
}

/// A `-filter_complex` graph and the duration of what it produces.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterGraph {
    pub filter: String,
    pub output_label: &'static str,
    pub duration: f64,
}

/// Build the composition graph over inputs `0..n`.
///
/// A hard cut concatenates the normalized clips; any other transition
/// chains `xfade` pairwise, each offset being the running output length
/// minus the transition.
pub fn compose_graph(
    clip_durations: &[f64],
    transitions: Transitions,
    resolution: Resolution,
    fps: u32,
) -> Option<FilterGraph> {
    let n = clip_durations.len();
    if n == 0 {
        return None;
    }

    let normalize = normalize_clip(resolution, fps);
    let mut parts: Vec<String> = (0..n)
        .map(|i| format!("[{i}:v]{normalize}[v{i}]"))
        .collect();

    let duration = composed_duration(transitions, clip_durations);

    if n == 1 {
        parts.push(format!("[v0]null{VIDEO_OUT}"));
    } else if let Some(name) = transitions.kind.xfade_name() {
        let overlap = effective_transition(transitions, clip_durations);
        let mut current = "[v0]".to_string();
        let mut accumulated = clip_durations[0];

        for (i, clip_duration) in clip_durations.iter().enumerate().skip(1) {
            let offset = (accumulated - overlap).max(0.0);
            let out = if i == n - 1 {
                VIDEO_OUT.to_string()
            } else {
                format!("[x{i}]")
            };
            parts.push(format!(
                "{current}[v{i}]xfade=transition={name}:duration={overlap:.3}:offset={offset:.3}{out}"
            ));
            accumulated += clip_duration - overlap;
            current = out;
        }
    } else {
        let inputs: String = (0..n).map(|i| format!("[v{i}]")).collect();
        parts.push(format!("{inputs}concat=n={n}:v=1:a=0{VIDEO_OUT}"));
    }

    Some(FilterGraph {
        filter: parts.join(";"),
        output_label: VIDEO_OUT,
        duration,
    })
}

/// Build the music graph for input `1`, trimmed to the shorter of the
/// video and the track.
pub fn music_graph(
    music: &BackgroundMusic,
    video_duration: f64,
    music_duration: f64,
) -> FilterGraph {
    let duration = video_duration.min(music_duration).max(0.0);

    let mut chain = vec![
        format!("atrim=start=0:end={duration:.3}"),
        "asetpts=PTS-STARTPTS".to_string(),
    ];

    let volume = music.volume();
    if (volume - 1.0).abs() > f64::EPSILON {
        chain.push(format!("volume={volume:.3}"));
    }

    let fade_in = music.fade_in.unwrap_or(0.0).min(duration);
    if fade_in > 0.0 {
        chain.push(format!("afade=t=in:st=0:d={fade_in:.3}"));
    }

    let fade_out = music.fade_out.unwrap_or(0.0).min(duration);
    if fade_out > 0.0 {
        let start = (duration - fade_out).max(0.0);
        chain.push(format!("afade=t=out:st={start:.3}:d={fade_out:.3}"));
    }

    FilterGraph {
        filter: format!("[1:a]{}{AUDIO_OUT}", chain.join(",")),
        output_label: AUDIO_OUT,
        duration,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_models::TransitionType;

    #[test]
    fn test_fit_and_pad() {
        assert_eq!(
            fit_and_pad(Resolution::FULL_HD),
            "scale=1920:1080:force_original_aspect_ratio=decrease,pad=1920:1080:(ow-iw)/2:(oh-ih)/2,setsar=1"
        );
    }

    #[test]
    fn test_xfade_chain_offsets() {
        let graph = compose_graph(
            &[3.0, 4.0, 3.0],
            Transitions::default(),
            Resolution::HD,
            24,
        )
        .unwrap();

        assert!(graph
            .filter
            .contains("[v0][v1]xfade=transition=fade:duration=0.500:offset=2.500[x1]"));
        assert!(graph
            .filter
            .contains("[x1][v2]xfade=transition=fade:duration=0.500:offset=6.000[vout]"));
        assert!((graph.duration - 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_slide_maps_to_xfade_name() {
        let transitions = Transitions {
            kind: TransitionType::Slide,
            duration: Some(1.0),
        };
        let graph = compose_graph(&[3.0, 3.0], transitions, Resolution::HD, 24).unwrap();
        assert!(graph.filter.contains("xfade=transition=slideleft:duration=1.000:offset=2.000[vout]"));
    }

    #[test]
    fn test_hard_cut_concatenates() {
        let graph = compose_graph(&[3.0, 4.0], Transitions::hard_cut(), Resolution::HD, 30).unwrap();

        assert!(graph.filter.ends_with("[v0][v1]concat=n=2:v=1:a=0[vout]"));
        assert!(!graph.filter.contains("xfade"));
        assert!((graph.duration - 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_single_clip_has_no_transition() {
        let graph = compose_graph(&[5.0], Transitions::default(), Resolution::HD, 24).unwrap();
        assert!(graph.filter.ends_with("[v0]null[vout]"));
        assert!((graph.duration - 5.0).abs() < 1e-9);
        assert!(compose_graph(&[], Transitions::default(), Resolution::HD, 24).is_none());
    }

    #[test]
    fn test_transition_clamped_to_short_clips() {
        let transitions = Transitions {
            kind: TransitionType::Dissolve,
            duration: Some(5.0),
        };
        assert!((effective_transition(transitions, &[2.0, 6.0]) - 1.0).abs() < 1e-9);
        assert!((composed_duration(transitions, &[2.0, 6.0]) - 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_music_trimmed_to_shorter_track() {
        let music = BackgroundMusic::new("https://cdn.example.com/song.mp3")
            .with_volume(0.5)
            .with_fades(1.0, 2.0);

        let graph = music_graph(&music, 9.0, 6.0);
        assert!((graph.duration - 6.0).abs() < 1e-9);
        assert_eq!(
            graph.filter,
            "[1:a]atrim=start=0:end=6.000,asetpts=PTS-STARTPTS,volume=0.500,\
             afade=t=in:st=0:d=1.000,afade=t=out:st=4.000:d=2.000[aout]"
        );
    }

    #[test]
    fn test_music_without_fades() {
        let graph = music_graph(&BackgroundMusic::new("song.mp3"), 5.0, 30.0);
        assert!((graph.duration - 5.0).abs() < 1e-9);
        assert!(!graph.filter.contains("afade"));
        assert!(!graph.filter.contains("volume"));
    }
}
