//! Contracts for the external collaborators the engine calls
//!
//! ```text
//!                    ┌──────────────────────┐
//!   dispatch tick ──►│ QueuePlatform        │  capacity listing, submit, check
//!                    └──────────────────────┘
//!                    ┌──────────────────────┐
//!   handlers ───────►│ WorkflowEngine       │  upload, create run, check, outputs
//!                    └──────────────────────┘
//!                    ┌──────────────────────┐
//!   planners ───────►│ ResourceProvider     │  media by id, generated artifacts
//!                    │ StyleLookup          │
//!                    └──────────────────────┘
//! ```
//!
//! HTTP implementations live in the `flashcast-providers` crate; the
//! in-memory ones here back tests and local runs.

mod memory;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::{Resource, ResourceKind, TaskStatus};

pub use memory::InMemoryResources;

/// Error type for collaborator calls
#[derive(Debug, Clone, thiserror::Error)]
pub enum PlatformError {
    /// Platform could not be reached
    #[error("platform unavailable: {0}")]
    Unavailable(String),

    /// Platform refused the request
    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Local filesystem failure
    #[error("io error: {0}")]
    Io(String),
}

impl PlatformError {
    /// Whether retrying the same call later can succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Status of a unit as reported by a platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: TaskStatus,
    pub result: Option<String>,
}

/// One entry of the queue platform's in-flight listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InFlight {
    /// Unit id the work was submitted under
    pub id: i64,
    pub status: TaskStatus,
    pub result: Option<String>,
}

/// Queue platform capacity snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Capacity {
    pub remaining_slots: usize,
    pub in_flight: Vec<InFlight>,
}

impl Capacity {
    pub fn in_flight_ids(&self) -> HashSet<i64> {
        self.in_flight.iter().map(|entry| entry.id).collect()
    }
}

/// Work handed to the queue platform
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueTask {
    pub unit_id: i64,
    /// Named processing strategy on the server
    pub strategy: String,
    pub params: serde_json::Value,
}

/// Queue-based compute platform (local AI server)
#[async_trait]
pub trait QueuePlatform: Send + Sync + 'static {
    async fn query_capacity(&self) -> Result<Capacity, PlatformError>;

    /// Returns the platform's id for the submitted work
    async fn submit(&self, task: QueueTask) -> Result<String, PlatformError>;

    async fn check_status(&self, correlation_id: &str) -> Result<StatusReport, PlatformError>;
}

/// Input field override for a workflow run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowNode {
    pub node_id: String,
    pub field_name: String,
    pub field_value: String,
}

impl WorkflowNode {
    pub fn new(
        node_id: impl Into<String>,
        field_name: impl Into<String>,
        field_value: impl Into<String>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            field_name: field_name.into(),
            field_value: field_value.into(),
        }
    }
}

/// State of a workflow run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Queued,
    Running,
    Success,
    Failed,
}

impl RunState {
    pub fn to_status(self) -> TaskStatus {
        match self {
            Self::Queued | Self::Running => TaskStatus::Running,
            Self::Success => TaskStatus::Success,
            Self::Failed => TaskStatus::Failed,
        }
    }
}

/// Remote GPU workflow engine
#[async_trait]
pub trait WorkflowEngine: Send + Sync + 'static {
    /// Upload a local file, returning the engine's file reference
    async fn upload(&self, path: &Path, kind: ResourceKind) -> Result<String, PlatformError>;

    async fn create_run(
        &self,
        workflow_id: &str,
        nodes: Vec<WorkflowNode>,
    ) -> Result<String, PlatformError>;

    async fn check_run(&self, run_id: &str) -> Result<RunState, PlatformError>;

    /// Output file URLs of a finished run
    async fn fetch_outputs(&self, run_id: &str) -> Result<Vec<String>, PlatformError>;
}

/// Media files by opaque id
#[async_trait]
pub trait ResourceProvider: Send + Sync + 'static {
    async fn get(&self, id: i64) -> Result<Resource, PlatformError>;

    async fn find_by_job(&self, job_id: i64) -> Result<Vec<Resource>, PlatformError>;

    /// Register a file; its kind is derived from the extension
    async fn add(&self, path: &str, job_id: Option<i64>) -> Result<i64, PlatformError>;
}

/// Read-only style template lookup
#[async_trait]
pub trait StyleLookup: Send + Sync + 'static {
    async fn style_content(&self, id: i64) -> Result<Option<String>, PlatformError>;
}

/// Downloads remote outputs to local storage
#[async_trait]
pub trait ArtifactFetcher: Send + Sync + 'static {
    async fn fetch(&self, unit_id: i64, url: &str) -> Result<PathBuf, PlatformError>;
}

pub(crate) fn kind_for_path(path: &str) -> Result<ResourceKind, PlatformError> {
    ResourceKind::from_path(path)
        .ok_or_else(|| PlatformError::Rejected(format!("unsupported file type: {path}")))
}
