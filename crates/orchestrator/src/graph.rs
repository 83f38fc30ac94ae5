//! Dependency graph: plan validation and unit eligibility
//!
//! Plans are checked for cycles once, when a job is decomposed. At dispatch
//! time eligibility is re-derived from the predecessors' stored statuses.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tracing::{debug, info};

use crate::model::{TaskStatus, Unit};
use crate::persistence::{EntityStore, StoreError};

/// Why a plan could not be accepted
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("step {step} depends on unknown step {dependency}")]
    UnknownStep { step: usize, dependency: usize },

    #[error("step {0} depends on itself")]
    SelfDependency(usize),

    #[error("dependency cycle through steps {0:?}")]
    Cycle(Vec<usize>),
}

/// Order plan steps so every step follows its dependencies
///
/// `depends_on[i]` lists the steps step `i` waits for. Ties keep the
/// original step order.
pub fn topological_order(depends_on: &[Vec<usize>]) -> Result<Vec<usize>, GraphError> {
    let count = depends_on.len();
    let mut indegree = vec![0usize; count];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];

    for (step, deps) in depends_on.iter().enumerate() {
        for &dep in deps {
            if dep >= count {
                return Err(GraphError::UnknownStep {
                    step,
                    dependency: dep,
                });
            }
            if dep == step {
                return Err(GraphError::SelfDependency(step));
            }
            indegree[step] += 1;
            dependents[dep].push(step);
        }
    }

    let mut ready: VecDeque<usize> = (0..count).filter(|&i| indegree[i] == 0).collect();
    let mut order = Vec::with_capacity(count);
    while let Some(step) = ready.pop_front() {
        order.push(step);
        for &next in &dependents[step] {
            indegree[next] -= 1;
            if indegree[next] == 0 {
                ready.push_back(next);
            }
        }
    }

    if order.len() != count {
        let stuck = (0..count).filter(|&i| indegree[i] > 0).collect();
        return Err(GraphError::Cycle(stuck));
    }
    Ok(order)
}

/// Outcome of evaluating a unit's predecessors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    /// All predecessors succeeded
    Ready,

    /// Some predecessor is still Pending or Running
    Waiting,

    /// A predecessor ended without success; the unit inherits this status
    Blocked { predecessor: i64, status: TaskStatus },
}

/// Evaluate eligibility from already-loaded predecessor records
///
/// A predecessor that cannot be found blocks the unit as Failed.
pub fn evaluate(unit: &Unit, predecessors: &[Unit]) -> Eligibility {
    let by_id: HashMap<i64, &Unit> = predecessors.iter().map(|p| (p.id, p)).collect();
    let mut waiting = false;

    for id in &unit.predecessors {
        match by_id.get(id).map(|p| p.status) {
            None => {
                return Eligibility::Blocked {
                    predecessor: *id,
                    status: TaskStatus::Failed,
                }
            }
            Some(TaskStatus::Success) => {}
            Some(status @ (TaskStatus::Failed | TaskStatus::Canceled)) => {
                return Eligibility::Blocked {
                    predecessor: *id,
                    status,
                }
            }
            Some(TaskStatus::Pending | TaskStatus::Running) => waiting = true,
        }
    }

    if waiting {
        Eligibility::Waiting
    } else {
        Eligibility::Ready
    }
}

/// Store-backed resolver that also applies failure propagation
pub struct DependencyResolver {
    store: Arc<dyn EntityStore>,
}

impl DependencyResolver {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    /// Evaluate a unit and propagate a blocked predecessor's outcome
    ///
    /// A Pending unit whose predecessor Failed (or was Canceled) is moved to
    /// the same terminal status here, without ever being submitted.
    pub async fn check(&self, unit: &Unit) -> Result<Eligibility, StoreError> {
        if unit.predecessors.is_empty() {
            return Ok(Eligibility::Ready);
        }

        let predecessors = self.store.get_units(&unit.predecessors).await?;
        let eligibility = evaluate(unit, &predecessors);

        if let Eligibility::Blocked {
            predecessor,
            status,
        } = eligibility
        {
            let propagated = self
                .store
                .transition_unit(unit.id, TaskStatus::Pending, status)
                .await?;
            if propagated {
                info!(
                    unit_id = unit.id,
                    job_id = unit.job_id,
                    predecessor,
                    %status,
                    "Propagated predecessor outcome"
                );
            }
        } else {
            debug!(unit_id = unit.id, ?eligibility, "Evaluated unit");
        }

        Ok(eligibility)
    }

    pub async fn is_eligible(&self, unit: &Unit) -> Result<bool, StoreError> {
        Ok(self.check(unit).await? == Eligibility::Ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{JobKind, NewJob, NewUnit, UnitKind};
    use crate::persistence::InMemoryEntityStore;

    fn unit(id: i64, status: TaskStatus, predecessors: Vec<i64>) -> Unit {
        let now = chrono::Utc::now();
        Unit {
            id,
            job_id: 1,
            kind: UnitKind::LipSync,
            seq: 0,
            params: serde_json::json!({}),
            status,
            result: None,
            platform: UnitKind::LipSync.platform(),
            correlation_id: None,
            predecessors,
            created_at: now,
            updated_at: now,
            deleted: false,
        }
    }

    #[test]
    fn test_topological_order_keeps_chain() {
        let order = topological_order(&[vec![], vec![0], vec![1], vec![2]]).unwrap();
        assert_eq!(order, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_topological_order_reorders_fan_in() {
        // step 0 waits on 2, step 1 waits on 0 and 2
        let order = topological_order(&[vec![2], vec![0, 2], vec![]]).unwrap();
        assert_eq!(order, vec![2, 0, 1]);
    }

    #[test]
    fn test_cycle_is_rejected() {
        let err = topological_order(&[vec![2], vec![0], vec![1]]).unwrap_err();
        assert_eq!(err, GraphError::Cycle(vec![0, 1, 2]));
        assert_eq!(
            topological_order(&[vec![0]]).unwrap_err(),
            GraphError::SelfDependency(0)
        );
        assert!(matches!(
            topological_order(&[vec![5]]).unwrap_err(),
            GraphError::UnknownStep { step: 0, dependency: 5 }
        ));
    }

    #[test]
    fn test_evaluate_rules() {
        let root = unit(10, TaskStatus::Pending, vec![]);
        assert_eq!(evaluate(&root, &[]), Eligibility::Ready);

        let done = unit(1, TaskStatus::Success, vec![]);
        let busy = unit(2, TaskStatus::Running, vec![]);
        let failed = unit(3, TaskStatus::Failed, vec![]);

        let child = unit(10, TaskStatus::Pending, vec![1]);
        assert_eq!(evaluate(&child, &[done.clone()]), Eligibility::Ready);

        let child = unit(10, TaskStatus::Pending, vec![1, 2]);
        assert_eq!(evaluate(&child, &[done.clone(), busy.clone()]), Eligibility::Waiting);

        let child = unit(10, TaskStatus::Pending, vec![2, 3]);
        assert_eq!(
            evaluate(&child, &[busy, failed]),
            Eligibility::Blocked {
                predecessor: 3,
                status: TaskStatus::Failed
            }
        );

        let orphan = unit(10, TaskStatus::Pending, vec![99]);
        assert!(matches!(evaluate(&orphan, &[done]), Eligibility::Blocked { predecessor: 99, .. }));
    }

    #[tokio::test]
    async fn test_resolver_propagates_failure() {
        let store = Arc::new(InMemoryEntityStore::new());
        let (_, units) = store
            .insert_job(
                NewJob::new(JobKind::LipSyncVideoVoiceTone, serde_json::json!({})),
                vec![
                    NewUnit {
                        kind: UnitKind::VoiceSynthesis,
                        params: serde_json::json!({}),
                        status: TaskStatus::Pending,
                        platform: UnitKind::VoiceSynthesis.platform(),
                        depends_on: vec![],
                    },
                    NewUnit {
                        kind: UnitKind::LipSync,
                        params: serde_json::json!({}),
                        status: TaskStatus::Pending,
                        platform: UnitKind::LipSync.platform(),
                        depends_on: vec![0],
                    },
                ],
            )
            .await
            .unwrap();
        store
            .transition_unit(units[0].id, TaskStatus::Pending, TaskStatus::Running)
            .await
            .unwrap();
        store
            .complete_unit(units[0].id, TaskStatus::Failed, None)
            .await
            .unwrap();

        let resolver = DependencyResolver::new(store.clone());
        assert!(!resolver.is_eligible(&units[1]).await.unwrap());

        let child = store.get_unit(units[1].id).await.unwrap();
        assert_eq!(child.status, TaskStatus::Failed);
    }
}
