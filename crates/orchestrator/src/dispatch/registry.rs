//! Execution dispatch table: unit kind to handler

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::handler::*;
use crate::model::{TaskStatus, Unit, UnitKind};
use crate::persistence::EntityStore;

/// What `execute` achieved for a unit
#[derive(Debug, Clone, PartialEq)]
pub enum Execution {
    /// A blocking handler observed a terminal status
    Completed(PollReport),

    /// A fire-and-forget handler submitted the unit; it stays Running
    Submitted(Submission),
}

impl Execution {
    pub fn status(&self) -> TaskStatus {
        match self {
            Self::Completed(report) => report.status,
            Self::Submitted(_) => TaskStatus::Running,
        }
    }
}

/// Registry of unit handlers, built once at startup
pub struct HandlerRegistry {
    handlers: HashMap<UnitKind, Arc<dyn UnitHandler>>,
    poll_interval: Duration,
}

impl HandlerRegistry {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            handlers: HashMap::new(),
            poll_interval,
        }
    }

    /// Register a handler under its own kind, replacing any previous one
    pub fn register(&mut self, handler: Arc<dyn UnitHandler>) {
        let kind = handler.kind();
        if self.handlers.insert(kind, handler).is_some() {
            warn!(%kind, "Replaced unit handler");
        }
    }

    pub fn with(mut self, handler: Arc<dyn UnitHandler>) -> Self {
        self.register(handler);
        self
    }

    pub fn contains(&self, kind: UnitKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn get(&self, kind: UnitKind) -> Result<&Arc<dyn UnitHandler>, HandlerError> {
        self.handlers
            .get(&kind)
            .ok_or(HandlerError::NotRegistered(kind))
    }

    pub async fn submit(&self, unit: &Unit, input: &UnitInput) -> Result<Submission, HandlerError> {
        self.get(unit.kind)?.submit(unit, input).await
    }

    /// Poll a submitted unit through its handler
    pub async fn poll(&self, unit: &Unit) -> Result<PollReport, HandlerError> {
        let correlation_id = unit.correlation_id.as_deref().ok_or_else(|| {
            HandlerError::MissingInput(format!("unit {} has no correlation id", unit.id))
        })?;
        self.get(unit.kind)?.poll(unit, correlation_id).await
    }

    /// Submit a claimed (Running) unit and, for blocking kinds, wait for it
    ///
    /// The correlation id is recorded before any polling so the
    /// reconciliation tick can observe the unit too. The blocking loop has no
    /// deadline of its own; it ends when the platform reports a terminal
    /// status or a poll fails permanently. Transient poll errors are retried.
    pub async fn execute(
        &self,
        store: &dyn EntityStore,
        unit: &Unit,
        input: &UnitInput,
    ) -> Result<Execution, HandlerError> {
        let handler = self.get(unit.kind)?;
        let submission = handler.submit(unit, input).await?;
        store
            .record_submission(unit.id, &submission.correlation_id)
            .await?;
        info!(
            unit_id = unit.id,
            kind = %unit.kind,
            correlation_id = %submission.correlation_id,
            "Submitted unit"
        );

        if handler.mode() == ExecutionMode::FireAndForget {
            return Ok(Execution::Submitted(submission));
        }

        loop {
            tokio::time::sleep(self.poll_interval).await;
            let report = match handler.poll(unit, &submission.correlation_id).await {
                Ok(report) => report,
                Err(e) if e.is_transient() => {
                    warn!(unit_id = unit.id, error = %e, "Poll failed, retrying");
                    continue;
                }
                Err(e) => return Err(e),
            };
            if report.status.is_terminal() {
                debug!(unit_id = unit.id, status = %report.status, "Blocking poll finished");
                return Ok(Execution::Completed(report));
            }
        }
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("kinds", &self.handlers.keys().collect::<Vec<_>>())
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}
