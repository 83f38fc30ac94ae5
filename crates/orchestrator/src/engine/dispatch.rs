//! Dispatch tick: capacity query, reclaim, and throttled admission

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use super::{fail_unit, EngineError};
use crate::config::EngineConfig;
use crate::dispatch::{HandlerRegistry, UnitInput};
use crate::graph::{DependencyResolver, Eligibility};
use crate::model::{Job, JobKind, Platform, TaskStatus, Unit};
use crate::persistence::{EntityStore, StoreError};
use crate::platform::{Capacity, QueuePlatform};

/// What one dispatch tick did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    /// Remaining slots reported by the queue platform
    pub budget: usize,
    /// Running units reset to Pending
    pub reclaimed: Vec<i64>,
    /// Terminal statuses taken from the in-flight listing
    pub settled: Vec<i64>,
    /// Units submitted this tick
    pub admitted: Vec<i64>,
    /// Units failed or canceled through a predecessor
    pub propagated: Vec<i64>,
    /// Units canceled because their job already finished
    pub canceled: Vec<i64>,
    /// Units whose submission failed
    pub rejected: Vec<i64>,
}

enum Admission {
    Submitted,
    Rejected,
    Propagated,
    Canceled,
    Skipped,
}

/// Running queue units the platform no longer reports
///
/// A unit is stale when its id is missing from the in-flight listing, it has
/// not been touched for `grace`, and its job kind is not excluded.
pub fn select_stale(
    running: &[Unit],
    listed: &HashSet<i64>,
    job_kinds: &HashMap<i64, JobKind>,
    excluded: &[JobKind],
    now: DateTime<Utc>,
    grace: Duration,
) -> Vec<i64> {
    let grace = chrono::Duration::from_std(grace).unwrap_or(chrono::Duration::zero());
    running
        .iter()
        .filter(|u| !listed.contains(&u.id))
        .filter(|u| now.signed_duration_since(u.updated_at) >= grace)
        .filter(|u| {
            job_kinds
                .get(&u.job_id)
                .is_some_and(|kind| !excluded.contains(kind))
        })
        .map(|u| u.id)
        .collect()
}

/// Admission and dispatch throttler for the queue platform
pub struct Dispatcher {
    store: Arc<dyn EntityStore>,
    handlers: Arc<HandlerRegistry>,
    queue: Arc<dyn QueuePlatform>,
    resolver: DependencyResolver,
    config: EngineConfig,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn EntityStore>,
        handlers: Arc<HandlerRegistry>,
        queue: Arc<dyn QueuePlatform>,
        config: EngineConfig,
    ) -> Self {
        Self {
            resolver: DependencyResolver::new(store.clone()),
            store,
            handlers,
            queue,
            config,
        }
    }

    /// Run one dispatch pass
    ///
    /// Fails only when capacity cannot be determined, in which case nothing
    /// is reclaimed or admitted.
    #[instrument(skip(self))]
    pub async fn tick(&self) -> Result<DispatchReport, EngineError> {
        let capacity = self.queue.query_capacity().await?;
        let mut report = DispatchReport {
            budget: capacity.remaining_slots,
            ..Default::default()
        };

        report.reclaimed = self.reclaim_stale(&capacity).await?;
        report.settled = self.settle_listed(&capacity).await;
        self.admit(capacity.remaining_slots, &mut report).await?;

        if !report.admitted.is_empty() || !report.reclaimed.is_empty() {
            info!(
                budget = report.budget,
                admitted = report.admitted.len(),
                reclaimed = report.reclaimed.len(),
                "Dispatch tick"
            );
        }
        Ok(report)
    }

    async fn reclaim_stale(&self, capacity: &Capacity) -> Result<Vec<i64>, EngineError> {
        let running = self.store.running_units(Platform::LocalAiServer).await?;
        if running.is_empty() {
            return Ok(Vec::new());
        }

        let mut job_ids: Vec<i64> = running.iter().map(|u| u.job_id).collect();
        job_ids.sort_unstable();
        job_ids.dedup();
        let job_kinds: HashMap<i64, JobKind> = self
            .store
            .get_jobs(&job_ids)
            .await?
            .into_iter()
            .map(|job| (job.id, job.kind))
            .collect();

        let stale = select_stale(
            &running,
            &capacity.in_flight_ids(),
            &job_kinds,
            &self.config.reclaim_excluded_kinds,
            Utc::now(),
            self.config.reclaim_grace,
        );
        if stale.is_empty() {
            return Ok(stale);
        }

        let reclaimed = self.store.reclaim_units(&stale).await?;
        for unit_id in &reclaimed {
            warn!(unit_id, "Reclaimed unit missing from the queue platform");
        }
        Ok(reclaimed)
    }

    /// Apply terminal statuses the in-flight listing already carries
    async fn settle_listed(&self, capacity: &Capacity) -> Vec<i64> {
        let mut settled = Vec::new();
        for entry in capacity.in_flight.iter().filter(|e| e.status.is_terminal()) {
            let unit = match self.store.get_unit(entry.id).await {
                Ok(unit) => unit,
                Err(StoreError::UnitNotFound(_)) => continue,
                Err(e) => {
                    warn!(unit_id = entry.id, error = %e, "Failed to load listed unit");
                    continue;
                }
            };
            if unit.status != TaskStatus::Running || unit.platform != Platform::LocalAiServer {
                continue;
            }
            match self
                .store
                .complete_unit(unit.id, entry.status, entry.result.clone())
                .await
            {
                Ok(true) => settled.push(unit.id),
                Ok(false) => {}
                Err(e) => warn!(unit_id = unit.id, error = %e, "Failed to settle unit"),
            }
        }
        settled
    }

    /// Submit ready units, newest first, until the budget is spent
    async fn admit(&self, budget: usize, report: &mut DispatchReport) -> Result<(), EngineError> {
        let mut cursor = None;
        let mut jobs: HashMap<i64, Job> = HashMap::new();

        'scan: while report.admitted.len() < budget {
            let page = self
                .store
                .pending_units_before(cursor, self.config.scan_page_size)
                .await?;
            if page.is_empty() {
                break;
            }

            for unit in page {
                if report.admitted.len() >= budget {
                    break 'scan;
                }
                cursor = Some(unit.id);

                match self.admit_one(&unit, &mut jobs).await {
                    Ok(Admission::Submitted) => report.admitted.push(unit.id),
                    Ok(Admission::Rejected) => report.rejected.push(unit.id),
                    Ok(Admission::Propagated) => report.propagated.push(unit.id),
                    Ok(Admission::Canceled) => report.canceled.push(unit.id),
                    Ok(Admission::Skipped) => {}
                    Err(e) => {
                        warn!(unit_id = unit.id, job_id = unit.job_id, error = %e, "Admission failed")
                    }
                }
            }
        }
        Ok(())
    }

    async fn admit_one(
        &self,
        unit: &Unit,
        jobs: &mut HashMap<i64, Job>,
    ) -> Result<Admission, EngineError> {
        let job = match jobs.get(&unit.job_id) {
            Some(job) => job.clone(),
            None => {
                let job = self.store.get_job(unit.job_id).await?;
                jobs.insert(job.id, job.clone());
                job
            }
        };

        if job.deleted || job.status.is_terminal() {
            if self
                .store
                .transition_unit(unit.id, TaskStatus::Pending, TaskStatus::Canceled)
                .await?
            {
                debug!(unit_id = unit.id, job_id = job.id, "Canceled unit of finished job");
                return Ok(Admission::Canceled);
            }
            return Ok(Admission::Skipped);
        }

        match self.resolver.check(unit).await? {
            Eligibility::Ready => {}
            Eligibility::Waiting => return Ok(Admission::Skipped),
            Eligibility::Blocked { .. } => return Ok(Admission::Propagated),
        }

        if !self
            .store
            .transition_unit(unit.id, TaskStatus::Pending, TaskStatus::Running)
            .await?
        {
            return Ok(Admission::Skipped);
        }
        self.store.mark_job_running(job.id).await?;

        let siblings = self.store.units_for_job(job.id).await?;
        let job_id = job.id;
        let input = UnitInput::gather(job, unit, &siblings);
        match self.handlers.submit(unit, &input).await {
            Ok(submission) => {
                self.store
                    .record_submission(unit.id, &submission.correlation_id)
                    .await?;
                info!(
                    unit_id = unit.id,
                    job_id,
                    kind = %unit.kind,
                    correlation_id = %submission.correlation_id,
                    "Admitted unit"
                );
                Ok(Admission::Submitted)
            }
            Err(e) => {
                fail_unit(self.store.as_ref(), unit, &e).await?;
                if let Some(job) = jobs.get_mut(&job_id) {
                    job.status = TaskStatus::Failed;
                }
                Ok(Admission::Rejected)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::UnitKind;

    fn running_unit(id: i64, job_id: i64, touched: DateTime<Utc>) -> Unit {
        Unit {
            id,
            job_id,
            kind: UnitKind::CopyRewrite,
            seq: 0,
            params: serde_json::json!({}),
            status: TaskStatus::Running,
            result: None,
            platform: Platform::LocalAiServer,
            correlation_id: Some(id.to_string()),
            predecessors: vec![],
            created_at: touched,
            updated_at: touched,
            deleted: false,
        }
    }

    #[test]
    fn test_select_stale_respects_listing_grace_and_exclusions() {
        let now = Utc::now();
        let old = now - chrono::Duration::seconds(30);
        let running = vec![
            running_unit(1, 10, old),
            running_unit(2, 10, old),
            running_unit(3, 10, now),
            running_unit(4, 20, old),
        ];
        let listed: HashSet<i64> = [2].into_iter().collect();
        let kinds: HashMap<i64, JobKind> = [
            (10, JobKind::OneClickClone),
            (20, JobKind::LipSyncVideoVoiceStyle),
        ]
        .into_iter()
        .collect();

        let stale = select_stale(
            &running,
            &listed,
            &kinds,
            &[JobKind::LipSyncVideoVoiceStyle],
            now,
            Duration::from_secs(5),
        );
        assert_eq!(stale, vec![1]);
    }

    #[test]
    fn test_select_stale_skips_units_of_unknown_jobs() {
        let now = Utc::now();
        let running = vec![running_unit(1, 99, now)];
        let stale = select_stale(
            &running,
            &HashSet::new(),
            &HashMap::new(),
            &[],
            now,
            Duration::ZERO,
        );
        assert!(stale.is_empty());
    }
}
