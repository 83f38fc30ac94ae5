//! EntityStore trait definition

use async_trait::async_trait;

use crate::model::{Job, NewJob, NewUnit, Platform, TaskStatus, Unit};

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Job not found
    #[error("job not found: {0}")]
    JobNotFound(i64),

    /// Unit not found
    #[error("unit not found: {0}")]
    UnitNotFound(i64),

    /// Unit plan references a step outside the plan
    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Durable records for jobs and their units of work
///
/// Every status write is a conditional single-record update: it names the
/// status it expects to replace and reports whether it took effect. Two ticks
/// and the work pool may race on the same record; the losing writer observes
/// `false` and moves on. Terminal records are never modified.
#[async_trait]
pub trait EntityStore: Send + Sync + 'static {
    // =========================================================================
    // Jobs
    // =========================================================================

    /// Insert a job together with its unit plan, atomically
    ///
    /// `NewUnit::depends_on` indexes are resolved to the ids assigned here.
    /// Units are returned in plan order.
    async fn insert_job(&self, job: NewJob, units: Vec<NewUnit>)
        -> Result<(Job, Vec<Unit>), StoreError>;

    async fn get_job(&self, id: i64) -> Result<Job, StoreError>;

    /// Jobs by id; missing ids are skipped
    async fn get_jobs(&self, ids: &[i64]) -> Result<Vec<Job>, StoreError>;

    /// Live jobs in any of `statuses`, ascending id
    async fn list_jobs(&self, statuses: &[TaskStatus]) -> Result<Vec<Job>, StoreError>;

    /// Pending -> Running
    async fn mark_job_running(&self, id: i64) -> Result<bool, StoreError>;

    /// Set a non-terminal status and progress on a non-terminal job
    async fn update_job_progress(
        &self,
        id: i64,
        status: TaskStatus,
        progress: i32,
    ) -> Result<bool, StoreError>;

    /// Move a non-terminal job to a terminal status
    async fn finish_job(
        &self,
        id: i64,
        status: TaskStatus,
        progress: Option<i32>,
    ) -> Result<bool, StoreError>;

    async fn set_job_result(&self, id: i64, resource_id: i64) -> Result<(), StoreError>;

    /// Hide a job and its units from every scan
    async fn soft_delete_job(&self, id: i64) -> Result<(), StoreError>;

    // =========================================================================
    // Units
    // =========================================================================

    async fn get_unit(&self, id: i64) -> Result<Unit, StoreError>;

    /// Units by id, in the order requested; missing ids are skipped
    async fn get_units(&self, ids: &[i64]) -> Result<Vec<Unit>, StoreError>;

    /// Units of one job, ascending sequence index
    async fn units_for_job(&self, job_id: i64) -> Result<Vec<Unit>, StoreError>;

    /// Units of several jobs, grouped by job then sequence index
    async fn units_for_jobs(&self, job_ids: &[i64]) -> Result<Vec<Unit>, StoreError>;

    /// Live Pending units with id below `before` (or any id), descending id
    async fn pending_units_before(
        &self,
        before: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Unit>, StoreError>;

    /// Live Running units on a platform
    async fn running_units(&self, platform: Platform) -> Result<Vec<Unit>, StoreError>;

    /// Conditional status change with no result attached
    async fn transition_unit(
        &self,
        id: i64,
        from: TaskStatus,
        to: TaskStatus,
    ) -> Result<bool, StoreError>;

    /// Attach the platform correlation id to a Running unit
    async fn record_submission(&self, id: i64, correlation_id: &str) -> Result<bool, StoreError>;

    /// Running -> terminal, attaching the result in the same write
    async fn complete_unit(
        &self,
        id: i64,
        status: TaskStatus,
        result: Option<String>,
    ) -> Result<bool, StoreError>;

    /// Running -> Pending for each id, clearing the correlation id
    ///
    /// Returns the ids that were actually reset.
    async fn reclaim_units(&self, ids: &[i64]) -> Result<Vec<i64>, StoreError>;
}

/// Resolve a step's plan-relative dependencies against ids assigned so far
pub(crate) fn predecessor_ids(
    index: usize,
    unit: &NewUnit,
    assigned: &[i64],
) -> Result<Vec<i64>, StoreError> {
    unit.depends_on
        .iter()
        .map(|&dep| {
            if dep >= index {
                return Err(StoreError::InvalidPlan(format!(
                    "step {index} depends on step {dep}, which is not earlier in the plan"
                )));
            }
            assigned.get(dep).copied().ok_or_else(|| {
                StoreError::InvalidPlan(format!("step {dep} has no assigned id"))
            })
        })
        .collect()
}
