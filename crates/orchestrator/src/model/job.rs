//! Job records and pipeline kinds

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::TaskStatus;

/// Pipeline type a job was submitted as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Lip-sync an uploaded video to an uploaded voice track
    LipSyncVideoVoice,

    /// Synthesize speech in the uploaded voice, then lip-sync
    LipSyncVideoVoiceTone,

    /// Generate copy in a style, synthesize it, then lip-sync
    LipSyncVideoVoiceStyle,

    /// Parse a share link, rewrite its copy, synthesize, then lip-sync
    OneClickClone,
}

impl JobKind {
    pub const ALL: [JobKind; 4] = [
        Self::LipSyncVideoVoice,
        Self::LipSyncVideoVoiceTone,
        Self::LipSyncVideoVoiceStyle,
        Self::OneClickClone,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LipSyncVideoVoice => "lip_sync_video_voice",
            Self::LipSyncVideoVoiceTone => "lip_sync_video_voice_tone",
            Self::LipSyncVideoVoiceStyle => "lip_sync_video_voice_style",
            Self::OneClickClone => "one_click_clone",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| format!("unknown job kind: {s}"))
    }
}

/// A user-submitted pipeline request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub kind: JobKind,
    /// Opaque pipeline parameters as submitted
    pub params: serde_json::Value,
    pub owner: Option<String>,
    pub status: TaskStatus,
    /// Percentage of units in Success, 0..=100
    pub progress: i32,
    /// Resource produced by the final unit
    pub result_resource_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted: bool,
}

/// Input for creating a job
#[derive(Debug, Clone)]
pub struct NewJob {
    pub kind: JobKind,
    pub params: serde_json::Value,
    pub owner: Option<String>,
}

impl NewJob {
    pub fn new(kind: JobKind, params: serde_json::Value) -> Self {
        Self {
            kind,
            params,
            owner: None,
        }
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_kind_parse() {
        assert_eq!(
            "ONE_CLICK_CLONE".parse::<JobKind>().unwrap(),
            JobKind::OneClickClone
        );
        assert_eq!(
            " lip_sync_video_voice ".parse::<JobKind>().unwrap(),
            JobKind::LipSyncVideoVoice
        );
        assert!("lip_sync_full".parse::<JobKind>().is_err());
    }

    #[test]
    fn test_job_kind_serde_matches_display() {
        for kind in JobKind::ALL {
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json, serde_json::Value::String(kind.to_string()));
        }
    }
}
