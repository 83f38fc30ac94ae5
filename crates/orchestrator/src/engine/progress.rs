//! Job-level status and progress derived from unit statuses

use std::sync::Arc;

use tracing::info;

use crate::model::{Job, TaskStatus, Unit};
use crate::persistence::{EntityStore, StoreError};

/// Job status and progress implied by its units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rollup {
    pub status: TaskStatus,
    pub progress: i32,
}

/// Fold unit statuses into a job status
///
/// While any unit is Pending or Running the job is non-terminal with
/// progress `floor(100 * success / total)`. Otherwise Failed wins over
/// Canceled, which wins over Success. A job with no units is a Success.
pub fn aggregate(statuses: &[TaskStatus]) -> Rollup {
    let total = statuses.len();
    if total == 0 {
        return Rollup {
            status: TaskStatus::Success,
            progress: 100,
        };
    }

    let count = |wanted: TaskStatus| statuses.iter().filter(|s| **s == wanted).count();
    let success = count(TaskStatus::Success);
    let progress = (success * 100 / total) as i32;

    let status = if statuses.iter().any(|s| !s.is_terminal()) {
        if statuses.iter().all(|s| *s == TaskStatus::Pending) {
            TaskStatus::Pending
        } else {
            TaskStatus::Running
        }
    } else if count(TaskStatus::Failed) > 0 {
        TaskStatus::Failed
    } else if count(TaskStatus::Canceled) > 0 {
        TaskStatus::Canceled
    } else {
        TaskStatus::Success
    };

    Rollup { status, progress }
}

/// Writes rolled-up status and progress back to jobs
pub struct ProgressAggregator {
    store: Arc<dyn EntityStore>,
}

impl ProgressAggregator {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    /// Recompute and store a non-terminal job's rollup
    ///
    /// A job already Running stays Running until it turns terminal, even if
    /// a reclaim put all of its units back to Pending.
    pub async fn apply(&self, job: &Job, units: &[Unit]) -> Result<Option<Rollup>, StoreError> {
        if job.status.is_terminal() {
            return Ok(None);
        }

        let statuses: Vec<TaskStatus> = units.iter().map(|u| u.status).collect();
        let mut rollup = aggregate(&statuses);

        if rollup.status.is_terminal() {
            if self
                .store
                .finish_job(job.id, rollup.status, Some(rollup.progress))
                .await?
            {
                info!(
                    job_id = job.id,
                    status = %rollup.status,
                    progress = rollup.progress,
                    "Job finished"
                );
            }
            return Ok(Some(rollup));
        }

        if job.status == TaskStatus::Running {
            rollup.status = TaskStatus::Running;
        }
        if rollup.status != job.status || rollup.progress != job.progress {
            self.store
                .update_job_progress(job.id, rollup.status, rollup.progress)
                .await?;
        }
        Ok(Some(rollup))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TaskStatus::*;

    #[test]
    fn test_progress_while_running() {
        assert_eq!(
            aggregate(&[Success, Running, Pending]),
            Rollup {
                status: Running,
                progress: 33
            }
        );
        assert_eq!(aggregate(&[Pending, Pending]).status, Pending);
        assert_eq!(aggregate(&[Success, Success, Success, Pending]).progress, 75);
    }

    #[test]
    fn test_terminal_precedence() {
        assert_eq!(aggregate(&[Success, Failed, Canceled]).status, Failed);
        assert_eq!(aggregate(&[Success, Canceled]).status, Canceled);
        assert_eq!(aggregate(&[Failed]), Rollup { status: Failed, progress: 0 });
        assert_eq!(
            aggregate(&[Success, Success]),
            Rollup {
                status: Success,
                progress: 100
            }
        );
    }

    #[test]
    fn test_failed_unit_with_pending_sibling_is_not_terminal() {
        assert_eq!(aggregate(&[Failed, Pending]).status, Running);
    }

    #[test]
    fn test_progress_is_100_only_on_success() {
        let cases: Vec<Vec<TaskStatus>> = vec![
            vec![Success, Success, Running],
            vec![Success, Failed],
            vec![Success, Canceled],
            vec![Success; 5],
            vec![],
        ];
        for statuses in cases {
            let rollup = aggregate(&statuses);
            assert_eq!(rollup.progress == 100, rollup.status == Success, "{statuses:?}");
        }
    }
}
