// Job Orchestration Engine
//
// This crate turns a content-generation job into a chain of units of work,
// drives each unit on the compute platform that serves its kind, and rolls
// unit outcomes back up into job status and progress.
//
// Key design decisions:
// - Storage, compute platforms and resource lookups sit behind traits
//   (EntityStore, QueuePlatform, WorkflowEngine, ResourceProvider)
// - Every status write is a conditional transition, so the ticks and the
//   work pool can race on the same record without locks
// - Admission to the queue platform is bounded by its reported capacity
// - Terminal states are sticky; a unit's predecessor failure propagates
// - Handlers are registered per unit kind at startup, never discovered

pub mod config;
pub mod dispatch;
pub mod engine;
pub mod graph;
pub mod model;
pub mod persistence;
pub mod planner;
pub mod platform;
pub mod worker;

// Re-exports for convenience
pub use config::EngineConfig;
pub use dispatch::{standard_registry, HandlerRegistry, UnitHandler, WorkflowDeps, WorkflowIds};
pub use engine::{EngineError, JobSnapshot, Orchestrator, Scheduler};
pub use graph::{DependencyResolver, Eligibility};
pub use model::{
    Job, JobKind, NewJob, NewUnit, PipelineParams, Platform, Resource, ResourceKind, TaskStatus,
    Unit, UnitKind,
};
pub use persistence::{EntityStore, InMemoryEntityStore, PostgresEntityStore, StoreError};
pub use planner::{PlanContext, PlanError, PlannerRegistry, StagedStep};
pub use platform::{
    ArtifactFetcher, Capacity, InFlight, InMemoryResources, PlatformError, QueuePlatform,
    QueueTask, ResourceProvider, RunState, StatusReport, StyleLookup, WorkflowEngine,
    WorkflowNode,
};
pub use worker::{PriorityWorkPool, WorkPoolError};
