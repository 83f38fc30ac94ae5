//! Orchestration engine: job loops, the two ticks, and the public facade
//!
//! ```text
//!              create_job ──► planner ──► store ──► work pool ──► JobRunner
//!                                          ▲  ▲                     │
//!   dispatch tick (capacity, reclaim,      │  │                     ▼
//!   admission) ────────────────────────────┘  │               HandlerRegistry
//!   reconcile tick (poll, progress) ──────────┘
//! ```
//!
//! Both ticks and the pool write through the store's conditional updates,
//! so they can race freely: whoever loses a transition sees `false`.

mod dispatch;
mod orchestrator;
mod progress;
mod reconcile;
mod runner;
mod scheduler;

pub use dispatch::{select_stale, DispatchReport, Dispatcher};
pub use orchestrator::{JobSnapshot, Orchestrator};
pub use progress::{aggregate, ProgressAggregator, Rollup};
pub use reconcile::{ReconcileReport, Reconciler};
pub use runner::{JobRunner, RunOutcome};
pub use scheduler::Scheduler;

use tracing::{debug, warn};

use crate::dispatch::{HandlerError, PollReport};
use crate::model::{TaskStatus, Unit};
use crate::persistence::{EntityStore, StoreError};
use crate::planner::PlanError;
use crate::platform::PlatformError;
use crate::worker::WorkPoolError;

/// Errors surfaced by engine operations
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error(transparent)]
    Handler(#[from] HandlerError),

    #[error(transparent)]
    Pool(#[from] WorkPoolError),
}

/// Store a terminal report for a Running unit
///
/// When the unit is the last step of its job and produced a resource, that
/// resource becomes the job's result. Returns false if another writer
/// finished the unit first.
pub(crate) async fn apply_report(
    store: &dyn EntityStore,
    unit: &Unit,
    is_final: bool,
    report: PollReport,
) -> Result<bool, StoreError> {
    let status = report.status;
    if !store.complete_unit(unit.id, status, report.result).await? {
        debug!(unit_id = unit.id, %status, "Unit already settled");
        return Ok(false);
    }

    if status == TaskStatus::Success && is_final {
        if let Some(resource_id) = report.resource_id {
            store.set_job_result(unit.job_id, resource_id).await?;
        }
    }
    Ok(true)
}

/// Fail a unit and its job after a handler error
pub(crate) async fn fail_unit(
    store: &dyn EntityStore,
    unit: &Unit,
    error: &HandlerError,
) -> Result<(), StoreError> {
    warn!(
        unit_id = unit.id,
        job_id = unit.job_id,
        kind = %unit.kind,
        error = %error,
        "Unit failed"
    );
    store
        .complete_unit(unit.id, TaskStatus::Failed, Some(error.to_string()))
        .await?;
    abort_job(store, unit.job_id).await
}

/// Fail a job and cancel its other Running units
///
/// Work already handed to a platform keeps going there, but its unit is
/// terminal afterwards so no later report settles it. Pending units are left
/// to failure propagation and admission.
pub(crate) async fn abort_job(store: &dyn EntityStore, job_id: i64) -> Result<(), StoreError> {
    store.finish_job(job_id, TaskStatus::Failed, None).await?;
    for unit in store.units_for_job(job_id).await? {
        if unit.status != TaskStatus::Running {
            continue;
        }
        if store
            .complete_unit(unit.id, TaskStatus::Canceled, Some("job failed".into()))
            .await?
        {
            debug!(unit_id = unit.id, job_id, "Canceled in-flight unit of failed job");
        }
    }
    Ok(())
}

/// Whether `unit` is the last step of its job
pub(crate) fn is_final_unit(unit: &Unit, siblings: &[Unit]) -> bool {
    siblings.iter().all(|s| s.seq <= unit.seq)
}
