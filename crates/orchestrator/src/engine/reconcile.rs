//! Reconciliation tick: poll submitted units and roll up job progress

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use super::{
    aggregate, apply_report, fail_unit, is_final_unit, EngineError, ProgressAggregator, Rollup,
};
use crate::dispatch::HandlerRegistry;
use crate::graph::{evaluate, Eligibility};
use crate::model::{Job, Platform, TaskStatus, Unit};
use crate::persistence::EntityStore;

/// What one reconciliation tick did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    pub jobs: usize,
    /// Units whose platform status was queried
    pub polled: usize,
    /// Units moved to a terminal status
    pub completed: usize,
    /// Jobs that turned terminal, with their final status
    pub finished: Vec<(i64, TaskStatus)>,
    /// Jobs skipped after an error
    pub errors: usize,
}

pub struct Reconciler {
    store: Arc<dyn EntityStore>,
    handlers: Arc<HandlerRegistry>,
    aggregator: ProgressAggregator,
}

impl Reconciler {
    pub fn new(store: Arc<dyn EntityStore>, handlers: Arc<HandlerRegistry>) -> Self {
        Self {
            aggregator: ProgressAggregator::new(store.clone()),
            store,
            handlers,
        }
    }

    /// Reconcile every live non-terminal job
    ///
    /// A failure in one job is logged and does not stop the others.
    #[instrument(skip(self))]
    pub async fn tick(&self) -> Result<ReconcileReport, EngineError> {
        let jobs = self
            .store
            .list_jobs(&[TaskStatus::Pending, TaskStatus::Running])
            .await?;
        let ids: Vec<i64> = jobs.iter().map(|j| j.id).collect();

        let mut units_by_job: HashMap<i64, Vec<Unit>> = HashMap::new();
        for unit in self.store.units_for_jobs(&ids).await? {
            units_by_job.entry(unit.job_id).or_default().push(unit);
        }

        let mut report = ReconcileReport {
            jobs: jobs.len(),
            ..Default::default()
        };
        for job in &jobs {
            let units = units_by_job.remove(&job.id).unwrap_or_default();
            match self.reconcile_job(job, &units, &mut report).await {
                Ok(Some(rollup)) if rollup.status.is_terminal() => {
                    report.finished.push((job.id, rollup.status));
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(job_id = job.id, error = %e, "Failed to reconcile job");
                    report.errors += 1;
                }
            }
        }

        if report.completed > 0 || !report.finished.is_empty() {
            info!(
                jobs = report.jobs,
                completed = report.completed,
                finished = report.finished.len(),
                "Reconcile tick"
            );
        }
        Ok(report)
    }

    async fn reconcile_job(
        &self,
        job: &Job,
        units: &[Unit],
        report: &mut ReconcileReport,
    ) -> Result<Option<Rollup>, EngineError> {
        let mut changed = false;
        let mut aborted = false;

        for unit in units.iter().filter(|u| {
            u.status == TaskStatus::Running && u.platform != Platform::None && u.is_submitted()
        }) {
            report.polled += 1;
            let polled = match self.handlers.poll(unit).await {
                Ok(polled) => polled,
                Err(e) if e.is_transient() => {
                    warn!(unit_id = unit.id, error = %e, "Poll failed, retrying next tick");
                    continue;
                }
                Err(e) => {
                    // The result cannot be retrieved; fail the unit and its job
                    fail_unit(self.store.as_ref(), unit, &e).await?;
                    report.completed += 1;
                    changed = true;
                    aborted = true;
                    break;
                }
            };
            if !polled.status.is_terminal() {
                continue;
            }
            let status = polled.status;
            if apply_report(self.store.as_ref(), unit, is_final_unit(unit, units), polled).await? {
                info!(unit_id = unit.id, job_id = job.id, %status, "Unit completed");
                report.completed += 1;
                changed = true;
            }
        }

        // Failure propagation also happens here so it does not wait for
        // free queue capacity.
        let mut units = if changed {
            self.store.units_for_job(job.id).await?
        } else {
            units.to_vec()
        };
        loop {
            let mut propagated = false;
            for index in 0..units.len() {
                if units[index].status != TaskStatus::Pending {
                    continue;
                }
                let predecessors: Vec<Unit> = units
                    .iter()
                    .filter(|u| units[index].predecessors.contains(&u.id))
                    .cloned()
                    .collect();
                if let Eligibility::Blocked { status, .. } = evaluate(&units[index], &predecessors)
                {
                    if self
                        .store
                        .transition_unit(units[index].id, TaskStatus::Pending, status)
                        .await?
                    {
                        units[index].status = status;
                        propagated = true;
                    }
                }
            }
            if !propagated {
                break;
            }
        }

        if aborted {
            let statuses: Vec<TaskStatus> = units.iter().map(|u| u.status).collect();
            return Ok(Some(Rollup {
                status: TaskStatus::Failed,
                progress: aggregate(&statuses).progress,
            }));
        }
        Ok(self.aggregator.apply(job, &units).await?)
    }
}
