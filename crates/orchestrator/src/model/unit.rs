//! Units of work: the dependency-ordered steps of a job

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::TaskStatus;

/// Closed set of step kinds a job decomposes into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    LinkParse,
    CopyGeneration,
    CopyRewrite,
    VoiceSynthesis,
    LipSync,
    VideoSynthesis,
}

impl UnitKind {
    pub const ALL: [UnitKind; 6] = [
        Self::LinkParse,
        Self::CopyGeneration,
        Self::CopyRewrite,
        Self::VoiceSynthesis,
        Self::LipSync,
        Self::VideoSynthesis,
    ];

    /// Compute platform this kind executes on
    pub fn platform(&self) -> Platform {
        match self {
            Self::LinkParse | Self::CopyGeneration | Self::CopyRewrite => Platform::LocalAiServer,
            Self::VoiceSynthesis | Self::LipSync | Self::VideoSynthesis => {
                Platform::RemoteWorkflow
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LinkParse => "link_parse",
            Self::CopyGeneration => "copy_generation",
            Self::CopyRewrite => "copy_rewrite",
            Self::VoiceSynthesis => "voice_synthesis",
            Self::LipSync => "lip_sync",
            Self::VideoSynthesis => "video_synthesis",
        }
    }
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnitKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| format!("unknown unit kind: {s}"))
    }
}

/// External system a unit is executed on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    /// Queue-based local AI server, observed through a shared capacity listing
    LocalAiServer,

    /// Remote GPU workflow engine, observed by polling individual runs
    RemoteWorkflow,

    /// Not executed anywhere (pre-completed steps)
    None,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LocalAiServer => "local_ai_server",
            Self::RemoteWorkflow => "remote_workflow",
            Self::None => "none",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local_ai_server" => Ok(Self::LocalAiServer),
            "remote_workflow" => Ok(Self::RemoteWorkflow),
            "none" => Ok(Self::None),
            other => Err(format!("unknown platform: {other}")),
        }
    }
}

/// One step of a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub id: i64,
    pub job_id: i64,
    pub kind: UnitKind,
    /// Position within the job, starting at 0
    pub seq: i32,
    pub params: serde_json::Value,
    pub status: TaskStatus,
    /// Generated script, file path, or URL produced by the step
    pub result: Option<String>,
    pub platform: Platform,
    /// Id issued by the platform once submitted
    pub correlation_id: Option<String>,
    /// Sibling units that must succeed first, in declaration order
    pub predecessors: Vec<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted: bool,
}

impl Unit {
    pub fn is_submitted(&self) -> bool {
        self.correlation_id.is_some()
    }
}

/// Input for creating a unit as part of a job plan
#[derive(Debug, Clone)]
pub struct NewUnit {
    pub kind: UnitKind,
    pub params: serde_json::Value,
    pub status: TaskStatus,
    pub platform: Platform,
    /// Predecessors as indexes into the same plan
    pub depends_on: Vec<usize>,
}
