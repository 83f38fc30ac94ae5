//! Media resources supplied by the resource provider

use std::path::Path;

use serde::{Deserialize, Serialize};

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "flv", "wmv", "webm"];
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "flac", "aac", "ogg", "m4a"];
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Video,
    Audio,
    Image,
}

impl ResourceKind {
    /// Classify a file by its extension, case-insensitively
    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        let ext = path
            .as_ref()
            .extension()
            .and_then(|ext| ext.to_str())?
            .to_ascii_lowercase();
        if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Some(Self::Video)
        } else if AUDIO_EXTENSIONS.contains(&ext.as_str()) {
            Some(Self::Audio)
        } else if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Some(Self::Image)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Image => "image",
        }
    }
}

impl std::str::FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "video" => Ok(Self::Video),
            "audio" => Ok(Self::Audio),
            "image" => Ok(Self::Image),
            other => Err(format!("unknown resource kind: {other}")),
        }
    }
}

/// A stored media file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: i64,
    pub path: String,
    pub kind: ResourceKind,
    /// Job that produced this resource, if generated
    pub job_id: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_extension() {
        assert_eq!(ResourceKind::from_path("a/b/clip.MP4"), Some(ResourceKind::Video));
        assert_eq!(ResourceKind::from_path("voice.m4a"), Some(ResourceKind::Audio));
        assert_eq!(ResourceKind::from_path("cover.webp"), Some(ResourceKind::Image));
        assert_eq!(ResourceKind::from_path("notes.txt"), None);
        assert_eq!(ResourceKind::from_path("no_extension"), None);
    }
}
