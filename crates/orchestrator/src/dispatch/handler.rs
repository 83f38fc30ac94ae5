//! Handler contract for executing one kind of unit

use async_trait::async_trait;

use crate::model::{Job, PipelineParams, TaskStatus, Unit, UnitKind};
use crate::persistence::StoreError;
use crate::platform::PlatformError;

/// Errors raised while submitting or polling a unit
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("no handler registered for unit kind {0}")]
    NotRegistered(UnitKind),

    /// A parameter or upstream result the handler needs is absent
    #[error("missing input: {0}")]
    MissingInput(String),

    #[error("invalid unit parameters: {0}")]
    InvalidParams(String),

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl HandlerError {
    /// Whether the failure may clear up on a later poll
    ///
    /// Unreachable platforms and database errors are retried; a rejected
    /// request, missing output or local file error fails the unit.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Platform(e) => e.is_transient(),
            Self::Store(StoreError::Database(_)) => true,
            _ => false,
        }
    }
}

/// How completion of a submitted unit is observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Poll in place until terminal; runs only inside the work pool
    Blocking,

    /// Record the correlation id and leave completion to reconciliation
    FireAndForget,
}

/// Everything a handler reads besides the unit itself
#[derive(Debug, Clone)]
pub struct UnitInput {
    pub job: Job,
    /// Result of the nearest predecessor that produced one
    pub upstream: Option<String>,
}

impl UnitInput {
    /// Collect input for `unit` from its already-loaded siblings
    pub fn gather(job: Job, unit: &Unit, siblings: &[Unit]) -> Self {
        let upstream = unit
            .predecessors
            .iter()
            .rev()
            .filter_map(|id| siblings.iter().find(|s| s.id == *id))
            .find_map(|s| s.result.clone());
        Self { job, upstream }
    }

    pub fn content(&self) -> Option<&str> {
        self.upstream.as_deref().filter(|s| !s.is_empty())
    }
}

/// Result of handing a unit to its platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub correlation_id: String,
}

/// A platform observation of a submitted unit
#[derive(Debug, Clone, PartialEq)]
pub struct PollReport {
    pub status: TaskStatus,
    pub result: Option<String>,
    /// Resource registered for a produced artifact
    pub resource_id: Option<i64>,
}

impl PollReport {
    pub fn running() -> Self {
        Self {
            status: TaskStatus::Running,
            result: None,
            resource_id: None,
        }
    }

    pub fn finished(status: TaskStatus, result: Option<String>) -> Self {
        Self {
            status,
            result,
            resource_id: None,
        }
    }
}

/// Executes one unit kind against its compute platform
#[async_trait]
pub trait UnitHandler: Send + Sync + 'static {
    fn kind(&self) -> UnitKind;

    fn mode(&self) -> ExecutionMode;

    /// Hand the unit to its platform
    async fn submit(&self, unit: &Unit, input: &UnitInput) -> Result<Submission, HandlerError>;

    /// Observe a previously submitted unit
    async fn poll(&self, unit: &Unit, correlation_id: &str) -> Result<PollReport, HandlerError>;
}

/// Decode the pipeline parameters stored on a unit
pub fn unit_params(unit: &Unit) -> Result<PipelineParams, HandlerError> {
    PipelineParams::from_value(&unit.params)
        .map_err(|e| HandlerError::InvalidParams(format!("unit {}: {e}", unit.id)))
}

pub(crate) fn required<T>(value: Option<T>, what: &str) -> Result<T, HandlerError> {
    value.ok_or_else(|| HandlerError::MissingInput(what.to_string()))
}
