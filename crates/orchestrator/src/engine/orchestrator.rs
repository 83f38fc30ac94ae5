//! Public entry point tying planners, store, pool and ticks together

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, instrument};

use super::{
    DispatchReport, Dispatcher, EngineError, JobRunner, ReconcileReport, Reconciler, RunOutcome,
    Scheduler,
};
use crate::config::EngineConfig;
use crate::dispatch::HandlerRegistry;
use crate::model::{Job, NewJob, NewUnit, Resource, TaskStatus, Unit};
use crate::persistence::EntityStore;
use crate::planner::{PlannerRegistry, StagedStep};
use crate::platform::QueuePlatform;
use crate::worker::PriorityWorkPool;

/// A job with its units, for status queries
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub job: Job,
    pub units: Vec<Unit>,
}

/// Job orchestration engine
///
/// # Example
///
/// ```ignore
/// let orchestrator = Arc::new(Orchestrator::new(store, planners, handlers, queue, config));
/// let scheduler = orchestrator.start()?;
/// let job = orchestrator.create_job(NewJob::new(JobKind::LipSyncVideoVoice, params)).await?;
/// // ... later
/// orchestrator.shutdown(scheduler, Duration::from_secs(30)).await?;
/// ```
pub struct Orchestrator {
    store: Arc<dyn EntityStore>,
    planners: Arc<PlannerRegistry>,
    pool: Arc<PriorityWorkPool>,
    runner: Arc<JobRunner>,
    dispatcher: Dispatcher,
    reconciler: Reconciler,
    config: EngineConfig,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn EntityStore>,
        planners: Arc<PlannerRegistry>,
        handlers: Arc<HandlerRegistry>,
        queue: Arc<dyn QueuePlatform>,
        config: EngineConfig,
    ) -> Self {
        Self {
            pool: Arc::new(PriorityWorkPool::new(config.worker_count)),
            runner: Arc::new(JobRunner::new(store.clone(), handlers.clone())),
            dispatcher: Dispatcher::new(store.clone(), handlers.clone(), queue, config.clone()),
            reconciler: Reconciler::new(store.clone(), handlers),
            store,
            planners,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    pub fn pool(&self) -> &Arc<PriorityWorkPool> {
        &self.pool
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // =========================================================================
    // Jobs
    // =========================================================================

    /// Plan a job, persist it with its units, and queue its execution loop
    ///
    /// Nothing is stored when planning fails.
    #[instrument(skip(self, job), fields(kind = %job.kind))]
    pub async fn create_job(&self, job: NewJob) -> Result<Job, EngineError> {
        let units = self.planners.plan(job.kind, &job.params).await?;
        self.persist(job, units).await
    }

    /// Create a job from explicit steps, treating the first `start_step` as done
    #[instrument(skip(self, job, steps), fields(kind = %job.kind))]
    pub async fn create_staged_job(
        &self,
        job: NewJob,
        steps: Vec<StagedStep>,
        start_step: usize,
    ) -> Result<Job, EngineError> {
        let units = self.planners.plan_staged(steps, start_step)?;
        self.persist(job, units).await
    }

    async fn persist(
        &self,
        job: NewJob,
        units: Vec<NewUnit>,
    ) -> Result<Job, EngineError> {
        let (job, units) = self.store.insert_job(job, units).await?;
        info!(job_id = job.id, units = units.len(), "Job created");
        self.pool.enqueue(job.id);
        Ok(job)
    }

    /// Queue the execution loop of every live non-terminal job
    pub async fn resume_jobs(&self) -> Result<usize, EngineError> {
        let jobs = self
            .store
            .list_jobs(&[TaskStatus::Pending, TaskStatus::Running])
            .await?;
        let queued = jobs.iter().filter(|job| self.pool.enqueue(job.id)).count();
        if queued > 0 {
            info!(queued, "Resumed unfinished jobs");
        }
        Ok(queued)
    }

    pub async fn job(&self, job_id: i64) -> Result<JobSnapshot, EngineError> {
        let job = self.store.get_job(job_id).await?;
        let units = self.store.units_for_job(job_id).await?;
        Ok(JobSnapshot { job, units })
    }

    /// Resources produced by a job
    pub async fn artifacts(&self, job_id: i64) -> Result<Vec<Resource>, EngineError> {
        Ok(self
            .planners
            .context()
            .resources
            .find_by_job(job_id)
            .await?)
    }

    pub async fn delete_job(&self, job_id: i64) -> Result<(), EngineError> {
        self.store.soft_delete_job(job_id).await?;
        info!(job_id, "Job deleted");
        Ok(())
    }

    // =========================================================================
    // Execution
    // =========================================================================

    /// Run a job loop in place, outside the pool
    pub async fn run_job(&self, job_id: i64) -> Result<RunOutcome, EngineError> {
        self.runner.run(job_id).await
    }

    pub async fn dispatch_tick(&self) -> Result<DispatchReport, EngineError> {
        self.dispatcher.tick().await
    }

    pub async fn reconcile_tick(&self) -> Result<ReconcileReport, EngineError> {
        self.reconciler.tick().await
    }

    /// Start the work pool and both ticks
    pub fn start(self: &Arc<Self>) -> Result<Scheduler, EngineError> {
        self.pool.start(self.runner.clone())?;
        Ok(Scheduler::spawn(self.clone()))
    }

    /// Stop the ticks, then drain the pool
    pub async fn shutdown(&self, scheduler: Scheduler, timeout: Duration) -> Result<(), EngineError> {
        scheduler.stop().await;
        self.pool.shutdown(timeout).await?;
        Ok(())
    }
}
