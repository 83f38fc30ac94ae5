//! Per-job execution loop run by the work pool

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, instrument};

use super::{abort_job, apply_report, fail_unit, is_final_unit, EngineError};
use crate::dispatch::{Execution, HandlerRegistry, UnitInput};
use crate::graph::{DependencyResolver, Eligibility};
use crate::model::{TaskStatus, Unit};
use crate::persistence::EntityStore;
use crate::worker::JobExecutor;

/// How a job loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The job was already terminal or deleted
    Skipped,
    /// Every unit is terminal
    Finished,
    /// Remaining units wait on work owned by someone else
    Waiting,
    /// A fire-and-forget unit was submitted; reconciliation takes over
    Submitted(i64),
    /// A unit failed or was canceled
    Aborted(i64),
}

/// Drives a job by executing its ready units one after another
///
/// Blocking units are polled to completion in place, so chains of queue
/// steps run back to back. The loop stops at the first fire-and-forget
/// submission.
///
/// When a unit fails the job fails with it. Sibling units still Running on a
/// platform are marked Canceled; their remote work is not stopped.
pub struct JobRunner {
    store: Arc<dyn EntityStore>,
    handlers: Arc<HandlerRegistry>,
    resolver: DependencyResolver,
}

impl JobRunner {
    pub fn new(store: Arc<dyn EntityStore>, handlers: Arc<HandlerRegistry>) -> Self {
        Self {
            resolver: DependencyResolver::new(store.clone()),
            store,
            handlers,
        }
    }

    #[instrument(skip(self))]
    pub async fn run(&self, job_id: i64) -> Result<RunOutcome, EngineError> {
        loop {
            let job = self.store.get_job(job_id).await?;
            if job.deleted || job.status.is_terminal() {
                return Ok(RunOutcome::Skipped);
            }

            let units = self.store.units_for_job(job_id).await?;
            let Some(unit) = self.next_ready(&units).await? else {
                let outcome = if units.iter().all(|u| u.status.is_terminal()) {
                    RunOutcome::Finished
                } else {
                    RunOutcome::Waiting
                };
                debug!(job_id, ?outcome, "No ready unit");
                return Ok(outcome);
            };

            if !self
                .store
                .transition_unit(unit.id, TaskStatus::Pending, TaskStatus::Running)
                .await?
            {
                // Admitted by the dispatch tick in the meantime
                return Ok(RunOutcome::Waiting);
            }
            if self.store.mark_job_running(job_id).await? {
                info!(job_id, "Job started");
            }

            let is_final = is_final_unit(&unit, &units);
            let input = UnitInput::gather(job, &unit, &units);
            match self.handlers.execute(self.store.as_ref(), &unit, &input).await {
                Ok(Execution::Completed(report)) => {
                    let status = report.status;
                    apply_report(self.store.as_ref(), &unit, is_final, report).await?;
                    match status {
                        TaskStatus::Success => continue,
                        TaskStatus::Failed => abort_job(self.store.as_ref(), job_id).await?,
                        _ => {}
                    }
                    return Ok(RunOutcome::Aborted(unit.id));
                }
                Ok(Execution::Submitted(_)) => return Ok(RunOutcome::Submitted(unit.id)),
                Err(e) => {
                    fail_unit(self.store.as_ref(), &unit, &e).await?;
                    return Ok(RunOutcome::Aborted(unit.id));
                }
            }
        }
    }

    /// First Pending unit in sequence order whose predecessors all succeeded
    async fn next_ready(&self, units: &[Unit]) -> Result<Option<Unit>, EngineError> {
        for unit in units.iter().filter(|u| u.status == TaskStatus::Pending) {
            if self.resolver.check(unit).await? == Eligibility::Ready {
                return Ok(Some(unit.clone()));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl JobExecutor for JobRunner {
    async fn run_job(&self, job_id: i64) {
        match self.run(job_id).await {
            Ok(outcome) => debug!(job_id, ?outcome, "Job loop ended"),
            Err(e) => error!(job_id, error = %e, "Job loop failed"),
        }
    }
}
