//! Job decomposition into dependency-ordered units of work
//!
//! A [`JobPlanner`] turns a job's parameters into plan steps; the
//! [`PlannerRegistry`] validates the step graph and produces the units the
//! store inserts atomically with the job.

mod pipelines;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::graph::{topological_order, GraphError};
use crate::model::{JobKind, NewUnit, PipelineParams, Platform, TaskStatus, UnitKind};
use crate::platform::{PlatformError, ResourceProvider, StyleLookup};

pub use pipelines::ChainPlanner;

/// Why a job could not be decomposed
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("no planner registered for job kind {0}")]
    UnsupportedKind(JobKind),

    #[error("missing parameter: {0}")]
    MissingParameter(&'static str),

    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    #[error("resource {id} is not usable: {reason}")]
    Resource { id: i64, reason: String },

    #[error("style {0} not found")]
    UnknownStyle(i64),

    #[error("start step {start} is beyond the {len} planned steps")]
    StartStep { start: usize, len: usize },

    #[error("plan has no steps")]
    Empty,

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Platform(#[from] PlatformError),
}

/// One step of a plan, with dependencies as step indexes
#[derive(Debug, Clone, PartialEq)]
pub struct PlanStep {
    pub kind: UnitKind,
    pub params: serde_json::Value,
    pub depends_on: Vec<usize>,
    /// Created already Success, never executed
    pub completed: bool,
}

/// Caller-supplied step for staged job creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedStep {
    #[serde(rename = "type", alias = "kind")]
    pub kind: UnitKind,
    #[serde(default, alias = "parameter")]
    pub params: serde_json::Value,
}

/// Lookups available while planning
#[derive(Clone)]
pub struct PlanContext {
    pub resources: Arc<dyn ResourceProvider>,
    pub styles: Arc<dyn StyleLookup>,
}

/// Decomposes one job kind
#[async_trait]
pub trait JobPlanner: Send + Sync + 'static {
    fn kind(&self) -> JobKind;

    async fn plan(
        &self,
        params: PipelineParams,
        ctx: &PlanContext,
    ) -> Result<Vec<PlanStep>, PlanError>;
}

/// Planners by job kind
pub struct PlannerRegistry {
    planners: HashMap<JobKind, Arc<dyn JobPlanner>>,
    ctx: PlanContext,
}

impl PlannerRegistry {
    pub fn new(ctx: PlanContext) -> Self {
        Self {
            planners: HashMap::new(),
            ctx,
        }
    }

    /// Registry with the built-in pipelines for every job kind
    pub fn standard(ctx: PlanContext) -> Self {
        let mut registry = Self::new(ctx);
        for kind in JobKind::ALL {
            registry.register(Arc::new(ChainPlanner::for_kind(kind)));
        }
        registry
    }

    pub fn register(&mut self, planner: Arc<dyn JobPlanner>) {
        self.planners.insert(planner.kind(), planner);
    }

    pub fn context(&self) -> &PlanContext {
        &self.ctx
    }

    /// Decompose a job into units in dependency order
    pub async fn plan(
        &self,
        kind: JobKind,
        params: &serde_json::Value,
    ) -> Result<Vec<NewUnit>, PlanError> {
        let planner = self
            .planners
            .get(&kind)
            .ok_or(PlanError::UnsupportedKind(kind))?;
        let params = PipelineParams::from_value(params)
            .map_err(|e| PlanError::InvalidParams(e.to_string()))?;
        let steps = planner.plan(params, &self.ctx).await?;
        build_units(steps)
    }

    /// Build a linear chain from explicit steps, resuming at `start_step`
    pub fn plan_staged(
        &self,
        steps: Vec<StagedStep>,
        start_step: usize,
    ) -> Result<Vec<NewUnit>, PlanError> {
        if start_step > steps.len() {
            return Err(PlanError::StartStep {
                start: start_step,
                len: steps.len(),
            });
        }
        let steps = steps
            .into_iter()
            .enumerate()
            .map(|(index, step)| PlanStep {
                kind: step.kind,
                params: step.params,
                depends_on: if index == 0 { vec![] } else { vec![index - 1] },
                completed: index < start_step,
            })
            .collect();
        build_units(steps)
    }
}

/// Validate the step graph and emit units in topological order
pub fn build_units(steps: Vec<PlanStep>) -> Result<Vec<NewUnit>, PlanError> {
    if steps.is_empty() {
        return Err(PlanError::Empty);
    }

    let depends_on: Vec<Vec<usize>> = steps.iter().map(|s| s.depends_on.clone()).collect();
    let order = topological_order(&depends_on)?;

    let mut position = vec![0usize; steps.len()];
    for (new_index, &old_index) in order.iter().enumerate() {
        position[old_index] = new_index;
    }

    let mut slots: Vec<Option<PlanStep>> = steps.into_iter().map(Some).collect();
    let units = order
        .iter()
        .filter_map(|&old_index| slots[old_index].take())
        .map(|step| {
            let (status, platform) = if step.completed {
                (TaskStatus::Success, Platform::None)
            } else {
                (TaskStatus::Pending, step.kind.platform())
            };
            NewUnit {
                kind: step.kind,
                params: step.params,
                status,
                platform,
                depends_on: step.depends_on.iter().map(|&d| position[d]).collect(),
            }
        })
        .collect();
    Ok(units)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::InMemoryResources;

    fn step(kind: UnitKind, depends_on: Vec<usize>) -> PlanStep {
        PlanStep {
            kind,
            params: serde_json::json!({}),
            depends_on,
            completed: false,
        }
    }

    fn registry() -> PlannerRegistry {
        let catalog = Arc::new(InMemoryResources::new());
        PlannerRegistry::standard(PlanContext {
            resources: catalog.clone(),
            styles: catalog,
        })
    }

    #[test]
    fn test_build_units_reorders_and_remaps() {
        let units = build_units(vec![
            step(UnitKind::LipSync, vec![1]),
            step(UnitKind::VoiceSynthesis, vec![]),
        ])
        .unwrap();

        assert_eq!(units[0].kind, UnitKind::VoiceSynthesis);
        assert!(units[0].depends_on.is_empty());
        assert_eq!(units[1].kind, UnitKind::LipSync);
        assert_eq!(units[1].depends_on, vec![0]);
    }

    #[test]
    fn test_build_units_rejects_cycle_and_empty() {
        let err = build_units(vec![
            step(UnitKind::CopyRewrite, vec![1]),
            step(UnitKind::VoiceSynthesis, vec![0]),
        ])
        .unwrap_err();
        assert!(matches!(err, PlanError::Graph(GraphError::Cycle(_))));
        assert!(matches!(build_units(vec![]), Err(PlanError::Empty)));
    }

    #[test]
    fn test_staged_plan_marks_earlier_steps_done() {
        let steps: Vec<StagedStep> = serde_json::from_value(serde_json::json!([
            {"type": "copy_generation", "parameter": {"text": "hi"}},
            {"type": "voice_synthesis", "parameter": {"audio_path": "v.wav"}},
            {"type": "lip_sync", "parameter": {"video_path": "f.mp4"}}
        ]))
        .unwrap();

        let units = registry().plan_staged(steps, 1).unwrap();

        assert_eq!(units[0].status, TaskStatus::Success);
        assert_eq!(units[0].platform, Platform::None);
        assert_eq!(units[1].status, TaskStatus::Pending);
        assert_eq!(units[1].depends_on, vec![0]);
        assert_eq!(units[2].depends_on, vec![1]);
        assert_eq!(units[2].params["video_path"], "f.mp4");
    }

    #[test]
    fn test_staged_start_step_out_of_range() {
        let steps = vec![StagedStep {
            kind: UnitKind::LipSync,
            params: serde_json::json!({}),
        }];
        assert!(matches!(
            registry().plan_staged(steps, 2),
            Err(PlanError::StartStep { start: 2, len: 1 })
        ));
    }
}
