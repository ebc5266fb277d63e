//! Scenes as read from the project catalog.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Generation status of a scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum SceneStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

/// One ordered unit of source material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Scene {
    pub order: u32,
    #[serde(default)]
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default)]
    pub status: SceneStatus,
}

/// Where a scene's pixels come from. Video wins when both are present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneSource<'a> {
    Video(&'a str),
    Image(&'a str),
}

impl Scene {
    pub fn video(order: u32, url: impl Into<String>) -> Self {
        Self {
            order,
            prompt: String::new(),
            video_url: Some(url.into()),
            image_url: None,
            status: SceneStatus::Completed,
        }
    }

    pub fn image(order: u32, url: impl Into<String>) -> Self {
        Self {
            order,
            prompt: String::new(),
            video_url: None,
            image_url: Some(url.into()),
            status: SceneStatus::Completed,
        }
    }

    pub fn with_status(mut self, status: SceneStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn is_completed(&self) -> bool {
        self.status == SceneStatus::Completed
    }

    /// Returns `None` for a scene with neither reference.
    pub fn source(&self) -> Option<SceneSource<'_>> {
        fn non_empty(url: &Option<String>) -> Option<&str> {
            url.as_deref().filter(|u| !u.trim().is_empty())
        }

        non_empty(&self.video_url)
            .map(SceneSource::Video)
            .or_else(|| non_empty(&self.image_url).map(SceneSource::Image))
    }
}

/// Keep completed scenes only, sorted by `order` ascending.
pub fn completed_in_order(scenes: impl IntoIterator<Item = Scene>) -> Vec<Scene> {
    let mut completed: Vec<Scene> = scenes.into_iter().filter(Scene::is_completed).collect();
    completed.sort_by_key(|s| s.order);
    completed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_prefers_video() {
        let mut scene = Scene::image(0, "https://cdn.example.com/a.png");
        assert_eq!(scene.source(), Some(SceneSource::Image("https://cdn.example.com/a.png")));

        scene.video_url = Some("https://cdn.example.com/a.mp4".to_string());
        assert_eq!(scene.source(), Some(SceneSource::Video("https://cdn.example.com/a.mp4")));
    }

    #[test]
    fn test_source_none_for_empty_refs() {
        let scene = Scene {
            order: 1,
            prompt: "a castle".to_string(),
            video_url: Some("".to_string()),
            image_url: None,
            status: SceneStatus::Completed,
        };
        assert_eq!(scene.source(), None);
    }

    #[test]
    fn test_completed_in_order() {
        let scenes = vec![
            Scene::video(3, "c"),
            Scene::video(1, "a").with_status(SceneStatus::Failed),
            Scene::image(0, "z"),
            Scene::video(2, "b"),
        ];

        let orders: Vec<u32> = completed_in_order(scenes).iter().map(|s| s.order).collect();
        assert_eq!(orders, vec![0, 2, 3]);
    }
}
