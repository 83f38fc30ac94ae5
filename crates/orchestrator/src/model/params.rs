//! Pipeline parameters carried by jobs and their units

use serde::{Deserialize, Serialize};

/// Output frame size preset for composed videos
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelPreset {
    /// Portrait 720x1280
    #[default]
    #[serde(rename = "P9_16")]
    P9_16,

    /// Landscape 1280x720
    #[serde(rename = "P16_9")]
    P16_9,
}

impl PixelPreset {
    /// (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Self::P9_16 => (720, 1280),
            Self::P16_9 => (1280, 720),
        }
    }
}

/// Parameters a job is submitted with, enriched by decomposition
///
/// Ids reference user uploads; the `*_path` and `style_content` fields are
/// filled in by planners so handlers never look them up again. Field names
/// also accept the camelCase spellings used by API clients.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineParams {
    #[serde(alias = "videoId", skip_serializing_if = "Option::is_none")]
    pub video_id: Option<i64>,

    #[serde(alias = "audioId", skip_serializing_if = "Option::is_none")]
    pub audio_id: Option<i64>,

    #[serde(alias = "styleId", skip_serializing_if = "Option::is_none")]
    pub style_id: Option<i64>,

    #[serde(alias = "videoPath", skip_serializing_if = "Option::is_none")]
    pub video_path: Option<String>,

    #[serde(alias = "audioPath", skip_serializing_if = "Option::is_none")]
    pub audio_path: Option<String>,

    #[serde(alias = "styleContent", skip_serializing_if = "Option::is_none")]
    pub style_content: Option<String>,

    /// Script to speak, when no upstream step produces one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Share link to parse
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,

    /// Emotion prompt for voice synthesis
    #[serde(alias = "emotionText", skip_serializing_if = "Option::is_none")]
    pub emotion_text: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tone: Option<String>,

    #[serde(alias = "extraInstructions", skip_serializing_if = "Option::is_none")]
    pub extra_instructions: Option<String>,

    pub pixel: PixelPreset,
}

impl PipelineParams {
    pub fn from_value(value: &serde_json::Value) -> Result<Self, serde_json::Error> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value.clone())
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_camel_case_aliases() {
        let params = PipelineParams::from_value(&serde_json::json!({
            "videoId": 3,
            "audio_id": 4,
            "extraInstructions": "keep it short",
            "pixel": "P16_9"
        }))
        .unwrap();

        assert_eq!(params.video_id, Some(3));
        assert_eq!(params.audio_id, Some(4));
        assert_eq!(params.extra_instructions.as_deref(), Some("keep it short"));
        assert_eq!(params.pixel.dimensions(), (1280, 720));
    }

    #[test]
    fn test_null_and_empty_use_defaults() {
        let params = PipelineParams::from_value(&serde_json::Value::Null).unwrap();
        assert_eq!(params, PipelineParams::default());
        assert_eq!(params.pixel, PixelPreset::P9_16);

        let value = PipelineParams::default().to_value();
        assert_eq!(value, serde_json::json!({"pixel": "P9_16"}));
    }
}
