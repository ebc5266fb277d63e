//! Catalog of export choices offered to clients.

use schemars::JsonSchema;
use serde::Serialize;

use crate::options::{OutputFormat, Quality, Resolution, TransitionType};

/// A selectable value with its display label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, JsonSchema)]
pub struct ExportOption {
    pub value: String,
    pub label: String,
}

impl ExportOption {
    fn new(value: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: label.into(),
        }
    }
}

/// Supported export settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, JsonSchema)]
pub struct ExportOptions {
    pub resolutions: Vec<ExportOption>,
    pub qualities: Vec<ExportOption>,
    pub formats: Vec<ExportOption>,
    pub transitions: Vec<ExportOption>,
}

impl ExportOptions {
    pub fn catalog() -> Self {
        let resolutions = [
            (Resolution::HD, "HD (720p)"),
            (Resolution::FULL_HD, "Full HD (1080p)"),
            (Resolution::QHD, "2K (1440p)"),
            (Resolution::UHD, "4K (2160p)"),
        ]
        .into_iter()
        .map(|(r, label)| ExportOption::new(r.to_string(), label))
        .collect();

        let qualities = Quality::ALL
            .iter()
            .map(|q| {
                let label = match q {
                    Quality::Low => "Low (Smaller file size)",
                    Quality::Medium => "Medium (Balanced)",
                    Quality::High => "High (Better quality)",
                    Quality::Ultra => "Ultra (Best quality)",
                };
                ExportOption::new(q.as_str(), label)
            })
            .collect();

        let formats = OutputFormat::ALL
            .iter()
            .map(|f| {
                let label = match f {
                    OutputFormat::Mp4 => "MP4 (Recommended)",
                    OutputFormat::Mov => "MOV (Apple devices)",
                    OutputFormat::Webm => "WebM (Web optimized)",
                };
                ExportOption::new(f.extension(), label)
            })
            .collect();

        let transitions = TransitionType::ALL
            .iter()
            .map(|t| {
                let label = match t {
                    TransitionType::None => "No transitions",
                    TransitionType::Fade => "Fade",
                    TransitionType::Slide => "Slide",
                    TransitionType::Dissolve => "Dissolve",
                };
                ExportOption::new(t.as_str(), label)
            })
            .collect();

        Self {
            resolutions,
            qualities,
            formats,
            transitions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_values_parse_back() {
        let catalog = ExportOptions::catalog();

        assert_eq!(catalog.resolutions.len(), 4);
        for r in &catalog.resolutions {
            assert!(r.value.parse::<Resolution>().is_ok(), "{}", r.value);
        }
        for q in &catalog.qualities {
            assert!(q.value.parse::<Quality>().is_ok());
        }
        for f in &catalog.formats {
            assert!(f.value.parse::<OutputFormat>().is_ok());
        }
        assert_eq!(catalog.transitions[0].value, "none");
    }
}
