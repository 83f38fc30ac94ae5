//! In-memory implementation of EntityStore for testing and local runs

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use super::store::*;
use crate::model::{Job, NewJob, NewUnit, Platform, TaskStatus, Unit};

/// In-memory implementation of EntityStore
///
/// Provides the same conditional-update semantics as the PostgreSQL
/// implementation. Jobs and units share one id sequence.
///
/// # Example
///
/// ```
/// use flashcast_orchestrator::InMemoryEntityStore;
///
/// let store = InMemoryEntityStore::new();
/// assert_eq!(store.job_count(), 0);
/// ```
pub struct InMemoryEntityStore {
    jobs: RwLock<HashMap<i64, Job>>,
    units: RwLock<HashMap<i64, Unit>>,
    sequence: AtomicI64,
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            units: RwLock::new(HashMap::new()),
            sequence: AtomicI64::new(0),
        }
    }

    pub fn job_count(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn unit_count(&self) -> usize {
        self.units.read().len()
    }

    fn next_id(&self) -> i64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl Default for InMemoryEntityStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn insert_job(
        &self,
        job: NewJob,
        units: Vec<NewUnit>,
    ) -> Result<(Job, Vec<Unit>), StoreError> {
        let now = Utc::now();
        let job_id = self.next_id();
        let unit_ids: Vec<i64> = units.iter().map(|_| self.next_id()).collect();
        let predecessors = units
            .iter()
            .enumerate()
            .map(|(index, unit)| predecessor_ids(index, unit, &unit_ids))
            .collect::<Result<Vec<_>, _>>()?;

        let job = Job {
            id: job_id,
            kind: job.kind,
            params: job.params,
            owner: job.owner,
            status: TaskStatus::Pending,
            progress: 0,
            result_resource_id: None,
            created_at: now,
            updated_at: now,
            deleted: false,
        };

        let created: Vec<Unit> = units
            .into_iter()
            .zip(unit_ids)
            .zip(predecessors)
            .enumerate()
            .map(|(seq, ((unit, id), predecessors))| Unit {
                id,
                job_id,
                kind: unit.kind,
                seq: seq as i32,
                params: unit.params,
                status: unit.status,
                result: None,
                platform: unit.platform,
                correlation_id: None,
                predecessors,
                created_at: now,
                updated_at: now,
                deleted: false,
            })
            .collect();

        let mut jobs = self.jobs.write();
        let mut stored = self.units.write();
        jobs.insert(job_id, job.clone());
        for unit in &created {
            stored.insert(unit.id, unit.clone());
        }

        Ok((job, created))
    }

    async fn get_job(&self, id: i64) -> Result<Job, StoreError> {
        self.jobs
            .read()
            .get(&id)
            .cloned()
            .ok_or(StoreError::JobNotFound(id))
    }

    async fn get_jobs(&self, ids: &[i64]) -> Result<Vec<Job>, StoreError> {
        let jobs = self.jobs.read();
        Ok(ids.iter().filter_map(|id| jobs.get(id).cloned()).collect())
    }

    async fn list_jobs(&self, statuses: &[TaskStatus]) -> Result<Vec<Job>, StoreError> {
        let mut found: Vec<Job> = self
            .jobs
            .read()
            .values()
            .filter(|job| !job.deleted && statuses.contains(&job.status))
            .cloned()
            .collect();
        found.sort_by_key(|job| job.id);
        Ok(found)
    }

    async fn mark_job_running(&self, id: i64) -> Result<bool, StoreError> {
        let mut jobs = self.jobs.write();
        let job = jobs.get_mut(&id).ok_or(StoreError::JobNotFound(id))?;
        if job.status != TaskStatus::Pending {
            return Ok(false);
        }
        job.status = TaskStatus::Running;
        job.updated_at = Utc::now();
        Ok(true)
    }

    async fn update_job_progress(
        &self,
        id: i64,
        status: TaskStatus,
        progress: i32,
    ) -> Result<bool, StoreError> {
        let mut jobs = self.jobs.write();
        let job = jobs.get_mut(&id).ok_or(StoreError::JobNotFound(id))?;
        if job.status.is_terminal() || status.is_terminal() {
            return Ok(false);
        }
        job.status = status;
        job.progress = progress;
        job.updated_at = Utc::now();
        Ok(true)
    }

    async fn finish_job(
        &self,
        id: i64,
        status: TaskStatus,
        progress: Option<i32>,
    ) -> Result<bool, StoreError> {
        let mut jobs = self.jobs.write();
        let job = jobs.get_mut(&id).ok_or(StoreError::JobNotFound(id))?;
        if job.status.is_terminal() || !status.is_terminal() {
            return Ok(false);
        }
        job.status = status;
        if let Some(progress) = progress {
            job.progress = progress;
        }
        job.updated_at = Utc::now();
        Ok(true)
    }

    async fn set_job_result(&self, id: i64, resource_id: i64) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write();
        let job = jobs.get_mut(&id).ok_or(StoreError::JobNotFound(id))?;
        job.result_resource_id = Some(resource_id);
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn soft_delete_job(&self, id: i64) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write();
        let job = jobs.get_mut(&id).ok_or(StoreError::JobNotFound(id))?;
        job.deleted = true;
        for unit in self.units.write().values_mut() {
            if unit.job_id == id {
                unit.deleted = true;
            }
        }
        Ok(())
    }

    async fn get_unit(&self, id: i64) -> Result<Unit, StoreError> {
        self.units
            .read()
            .get(&id)
            .cloned()
            .ok_or(StoreError::UnitNotFound(id))
    }

    async fn get_units(&self, ids: &[i64]) -> Result<Vec<Unit>, StoreError> {
        let units = self.units.read();
        Ok(ids.iter().filter_map(|id| units.get(id).cloned()).collect())
    }

    async fn units_for_job(&self, job_id: i64) -> Result<Vec<Unit>, StoreError> {
        self.units_for_jobs(&[job_id]).await
    }

    async fn units_for_jobs(&self, job_ids: &[i64]) -> Result<Vec<Unit>, StoreError> {
        let mut found: Vec<Unit> = self
            .units
            .read()
            .values()
            .filter(|unit| !unit.deleted && job_ids.contains(&unit.job_id))
            .cloned()
            .collect();
        found.sort_by_key(|unit| (unit.job_id, unit.seq));
        Ok(found)
    }

    async fn pending_units_before(
        &self,
        before: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Unit>, StoreError> {
        let mut found: Vec<Unit> = self
            .units
            .read()
            .values()
            .filter(|unit| {
                !unit.deleted
                    && unit.status == TaskStatus::Pending
                    && before.map_or(true, |cursor| unit.id < cursor)
            })
            .cloned()
            .collect();
        found.sort_by(|a, b| b.id.cmp(&a.id));
        found.truncate(limit);
        Ok(found)
    }

    async fn running_units(&self, platform: Platform) -> Result<Vec<Unit>, StoreError> {
        let mut found: Vec<Unit> = self
            .units
            .read()
            .values()
            .filter(|unit| {
                !unit.deleted && unit.status == TaskStatus::Running && unit.platform == platform
            })
            .cloned()
            .collect();
        found.sort_by_key(|unit| unit.id);
        Ok(found)
    }

    async fn transition_unit(
        &self,
        id: i64,
        from: TaskStatus,
        to: TaskStatus,
    ) -> Result<bool, StoreError> {
        let mut units = self.units.write();
        let unit = units.get_mut(&id).ok_or(StoreError::UnitNotFound(id))?;
        if unit.status != from || !from.can_transition_to(to) {
            return Ok(false);
        }
        unit.status = to;
        unit.updated_at = Utc::now();
        Ok(true)
    }

    async fn record_submission(&self, id: i64, correlation_id: &str) -> Result<bool, StoreError> {
        let mut units = self.units.write();
        let unit = units.get_mut(&id).ok_or(StoreError::UnitNotFound(id))?;
        if unit.status != TaskStatus::Running {
            return Ok(false);
        }
        unit.correlation_id = Some(correlation_id.to_string());
        unit.updated_at = Utc::now();
        Ok(true)
    }

    async fn complete_unit(
        &self,
        id: i64,
        status: TaskStatus,
        result: Option<String>,
    ) -> Result<bool, StoreError> {
        let mut units = self.units.write();
        let unit = units.get_mut(&id).ok_or(StoreError::UnitNotFound(id))?;
        if unit.status != TaskStatus::Running || !status.is_terminal() {
            return Ok(false);
        }
        unit.status = status;
        unit.result = result;
        unit.updated_at = Utc::now();
        Ok(true)
    }

    async fn reclaim_units(&self, ids: &[i64]) -> Result<Vec<i64>, StoreError> {
        let mut units = self.units.write();
        let now = Utc::now();
        let mut reclaimed = Vec::new();
        for id in ids {
            if let Some(unit) = units.get_mut(id) {
                if unit.status == TaskStatus::Running {
                    unit.status = TaskStatus::Pending;
                    unit.correlation_id = None;
                    unit.updated_at = now;
                    reclaimed.push(*id);
                }
            }
        }
        Ok(reclaimed)
    }
}
