//! Execution dispatch table and the concrete unit handlers
//!
//! ```text
//!  UnitKind ──► HandlerRegistry ──► UnitHandler
//!                                    ├─ LinkParseHandler      (AI server, blocking)
//!                                    ├─ CopyHandler           (AI server, blocking)
//!                                    ├─ VoiceSynthesisHandler (workflow engine, fire-and-forget)
//!                                    └─ ComposeHandler        (workflow engine, fire-and-forget)
//! ```

mod ai_server;
mod handler;
mod registry;
mod workflow;

pub use ai_server::{CopyHandler, LinkParseHandler};
pub use handler::{
    unit_params, ExecutionMode, HandlerError, PollReport, Submission, UnitHandler, UnitInput,
};
pub use registry::{Execution, HandlerRegistry};
pub use workflow::{ComposeHandler, VoiceSynthesisHandler, WorkflowDeps, DEFAULT_EMOTION};

use std::sync::Arc;
use std::time::Duration;

use crate::platform::QueuePlatform;

/// Workflow ids for the media steps
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowIds {
    pub voice_synthesis: String,
    pub video_compose: String,
}

impl Default for WorkflowIds {
    fn default() -> Self {
        Self {
            voice_synthesis: "1974699622956404738".to_string(),
            video_compose: "1967526186341502977".to_string(),
        }
    }
}

/// Registry with a handler for every unit kind
pub fn standard_registry(
    poll_interval: Duration,
    queue: Arc<dyn QueuePlatform>,
    deps: WorkflowDeps,
    workflows: &WorkflowIds,
) -> HandlerRegistry {
    HandlerRegistry::new(poll_interval)
        .with(Arc::new(LinkParseHandler::new(queue.clone())))
        .with(Arc::new(CopyHandler::generation(queue.clone())))
        .with(Arc::new(CopyHandler::rewrite(queue)))
        .with(Arc::new(VoiceSynthesisHandler::new(
            deps.clone(),
            &workflows.voice_synthesis,
        )))
        .with(Arc::new(ComposeHandler::lip_sync(
            deps.clone(),
            &workflows.video_compose,
        )))
        .with(Arc::new(ComposeHandler::video_synthesis(
            deps,
            &workflows.video_compose,
        )))
}
