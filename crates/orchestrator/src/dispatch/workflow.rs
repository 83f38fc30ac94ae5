//! Handlers for media steps executed on the remote workflow engine
//!
//! These submit a run and return; the reconciliation tick polls the run and,
//! on success, stores the first output as a resource of the job.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::handler::*;
use crate::model::{ResourceKind, TaskStatus, Unit, UnitKind};
use crate::platform::{
    ArtifactFetcher, PlatformError, ResourceProvider, WorkflowEngine, WorkflowNode,
};

/// Emotion prompt used when the job does not give one
pub const DEFAULT_EMOTION: &str = "稳重";

/// Collaborators shared by the workflow handlers
#[derive(Clone)]
pub struct WorkflowDeps {
    pub engine: Arc<dyn WorkflowEngine>,
    pub resources: Arc<dyn ResourceProvider>,
    /// Downloads outputs locally; without it results stay remote URLs
    pub fetcher: Option<Arc<dyn ArtifactFetcher>>,
}

impl WorkflowDeps {
    /// Upload a local file, or pass a remote URL through untouched
    async fn reference(&self, location: &str, kind: ResourceKind) -> Result<String, HandlerError> {
        if is_remote(location) {
            return Ok(location.to_string());
        }
        Ok(self.engine.upload(Path::new(location), kind).await?)
    }

    async fn poll_run(&self, unit: &Unit, run_id: &str) -> Result<PollReport, HandlerError> {
        let state = self.engine.check_run(run_id).await?;
        let status = state.to_status();
        if status != TaskStatus::Success {
            return Ok(PollReport::finished(status, None));
        }

        let outputs = self.engine.fetch_outputs(run_id).await?;
        let url = outputs.into_iter().next().ok_or_else(|| {
            PlatformError::NotFound(format!("run {run_id} finished without outputs"))
        })?;

        let location = match &self.fetcher {
            Some(fetcher) => fetcher
                .fetch(unit.id, &url)
                .await?
                .to_string_lossy()
                .into_owned(),
            None => url,
        };

        let resource_id = match self.resources.add(&location, Some(unit.job_id)).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(unit_id = unit.id, error = %e, "Output not registered as a resource");
                None
            }
        };

        info!(unit_id = unit.id, run_id, %location, "Workflow run produced output");
        Ok(PollReport {
            status,
            result: Some(location),
            resource_id,
        })
    }
}

fn is_remote(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

/// Synthesizes speech for a script in a reference voice
pub struct VoiceSynthesisHandler {
    deps: WorkflowDeps,
    workflow_id: String,
}

impl VoiceSynthesisHandler {
    pub fn new(deps: WorkflowDeps, workflow_id: impl Into<String>) -> Self {
        Self {
            deps,
            workflow_id: workflow_id.into(),
        }
    }
}

#[async_trait]
impl UnitHandler for VoiceSynthesisHandler {
    fn kind(&self) -> UnitKind {
        UnitKind::VoiceSynthesis
    }

    fn mode(&self) -> ExecutionMode {
        ExecutionMode::FireAndForget
    }

    async fn submit(&self, unit: &Unit, input: &UnitInput) -> Result<Submission, HandlerError> {
        let params = unit_params(unit)?;
        let text = required(input.content().map(str::to_string).or(params.text), "script")?;
        let voice = required(params.audio_path, "reference audio")?;
        let emotion = params
            .emotion_text
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_EMOTION.to_string());

        let audio = self.deps.reference(&voice, ResourceKind::Audio).await?;
        let nodes = vec![
            WorkflowNode::new("2", "emo_text", emotion),
            WorkflowNode::new("3", "audio", audio),
            WorkflowNode::new("4", "text", text),
        ];
        let run_id = self.deps.engine.create_run(&self.workflow_id, nodes).await?;
        Ok(Submission {
            correlation_id: run_id,
        })
    }

    async fn poll(&self, unit: &Unit, correlation_id: &str) -> Result<PollReport, HandlerError> {
        self.deps.poll_run(unit, correlation_id).await
    }
}

/// Composes a talking video from a source video and a voice track
///
/// Serves both lip-sync and video synthesis; they differ only in the
/// workflow they run.
pub struct ComposeHandler {
    kind: UnitKind,
    deps: WorkflowDeps,
    workflow_id: String,
}

impl ComposeHandler {
    pub fn lip_sync(deps: WorkflowDeps, workflow_id: impl Into<String>) -> Self {
        Self {
            kind: UnitKind::LipSync,
            deps,
            workflow_id: workflow_id.into(),
        }
    }

    pub fn video_synthesis(deps: WorkflowDeps, workflow_id: impl Into<String>) -> Self {
        Self {
            kind: UnitKind::VideoSynthesis,
            deps,
            workflow_id: workflow_id.into(),
        }
    }
}

#[async_trait]
impl UnitHandler for ComposeHandler {
    fn kind(&self) -> UnitKind {
        self.kind
    }

    fn mode(&self) -> ExecutionMode {
        ExecutionMode::FireAndForget
    }

    async fn submit(&self, unit: &Unit, input: &UnitInput) -> Result<Submission, HandlerError> {
        let params = unit_params(unit)?;
        let video = required(params.video_path, "source video")?;
        let audio = required(
            input.content().map(str::to_string).or(params.audio_path),
            "voice track",
        )?;

        let (video_ref, audio_ref) = tokio::try_join!(
            self.deps.reference(&video, ResourceKind::Video),
            self.deps.reference(&audio, ResourceKind::Audio),
        )?;

        let (width, height) = params.pixel.dimensions();
        let nodes = vec![
            WorkflowNode::new("222", "video", video_ref),
            WorkflowNode::new("125", "audio", audio_ref),
            WorkflowNode::new("192", "width", width.to_string()),
            WorkflowNode::new("192", "height", height.to_string()),
            WorkflowNode::new("192", "frame_window_size", "64"),
            WorkflowNode::new("192", "tiled_vae", "true"),
            WorkflowNode::new("222", "frame_load_cap", "32"),
        ];
        let run_id = self.deps.engine.create_run(&self.workflow_id, nodes).await?;
        Ok(Submission {
            correlation_id: run_id,
        })
    }

    async fn poll(&self, unit: &Unit, correlation_id: &str) -> Result<PollReport, HandlerError> {
        self.deps.poll_run(unit, correlation_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Job, JobKind};
    use crate::platform::{InMemoryResources, RunState};
    use parking_lot::Mutex;
    use std::path::PathBuf;

    #[derive(Default)]
    struct FakeEngine {
        uploads: Mutex<Vec<String>>,
        runs: Mutex<Vec<(String, Vec<WorkflowNode>)>>,
        state: Mutex<Option<RunState>>,
    }

    #[async_trait]
    impl WorkflowEngine for FakeEngine {
        async fn upload(&self, path: &Path, _kind: ResourceKind) -> Result<String, PlatformError> {
            let name = path.display().to_string();
            self.uploads.lock().push(name.clone());
            Ok(format!("api/{name}"))
        }

        async fn create_run(
            &self,
            workflow_id: &str,
            nodes: Vec<WorkflowNode>,
        ) -> Result<String, PlatformError> {
            self.runs.lock().push((workflow_id.to_string(), nodes));
            Ok("run-1".to_string())
        }

        async fn check_run(&self, _run_id: &str) -> Result<RunState, PlatformError> {
            Ok(self.state.lock().unwrap_or(RunState::Running))
        }

        async fn fetch_outputs(&self, _run_id: &str) -> Result<Vec<String>, PlatformError> {
            Ok(vec!["https://cdn.example.com/out/final.mp4".to_string()])
        }
    }

    struct LocalFetcher;

    #[async_trait]
    impl ArtifactFetcher for LocalFetcher {
        async fn fetch(&self, unit_id: i64, url: &str) -> Result<PathBuf, PlatformError> {
            let name = url.rsplit('/').next().unwrap_or("output");
            Ok(PathBuf::from(format!("resources/{unit_id}/{name}")))
        }
    }

    fn unit(kind: UnitKind, params: serde_json::Value) -> Unit {
        let now = chrono::Utc::now();
        Unit {
            id: 12,
            job_id: 4,
            kind,
            seq: 2,
            params,
            status: TaskStatus::Running,
            result: None,
            platform: kind.platform(),
            correlation_id: Some("run-1".into()),
            predecessors: vec![11],
            created_at: now,
            updated_at: now,
            deleted: false,
        }
    }

    fn input(upstream: Option<&str>) -> UnitInput {
        let now = chrono::Utc::now();
        UnitInput {
            job: Job {
                id: 4,
                kind: JobKind::LipSyncVideoVoiceStyle,
                params: serde_json::json!({}),
                owner: None,
                status: TaskStatus::Running,
                progress: 0,
                result_resource_id: None,
                created_at: now,
                updated_at: now,
                deleted: false,
            },
            upstream: upstream.map(str::to_string),
        }
    }

    fn deps(engine: Arc<FakeEngine>, fetcher: bool) -> (WorkflowDeps, Arc<InMemoryResources>) {
        let resources = Arc::new(InMemoryResources::new());
        let deps = WorkflowDeps {
            engine,
            resources: resources.clone(),
            fetcher: fetcher.then(|| Arc::new(LocalFetcher) as Arc<dyn ArtifactFetcher>),
        };
        (deps, resources)
    }

    #[tokio::test]
    async fn test_voice_synthesis_nodes() {
        let engine = Arc::new(FakeEngine::default());
        let (deps, _) = deps(engine.clone(), false);
        let handler = VoiceSynthesisHandler::new(deps, "voice-wf");

        let submission = handler
            .submit(
                &unit(UnitKind::VoiceSynthesis, serde_json::json!({"audio_path": "up/me.wav"})),
                &input(Some("hello there")),
            )
            .await
            .unwrap();

        assert_eq!(submission.correlation_id, "run-1");
        let runs = engine.runs.lock();
        let (workflow, nodes) = &runs[0];
        assert_eq!(workflow, "voice-wf");
        assert_eq!(nodes[0], WorkflowNode::new("2", "emo_text", DEFAULT_EMOTION));
        assert_eq!(nodes[1], WorkflowNode::new("3", "audio", "api/up/me.wav"));
        assert_eq!(nodes[2], WorkflowNode::new("4", "text", "hello there"));
    }

    #[tokio::test]
    async fn test_lip_sync_uploads_both_and_passes_urls_through() {
        let engine = Arc::new(FakeEngine::default());
        let (deps, _) = deps(engine.clone(), false);
        let handler = ComposeHandler::lip_sync(deps, "video-wf");

        handler
            .submit(
                &unit(UnitKind::LipSync, serde_json::json!({"video_path": "up/face.mp4"})),
                &input(Some("https://cdn.example.com/voice.wav")),
            )
            .await
            .unwrap();

        assert_eq!(*engine.uploads.lock(), vec!["up/face.mp4".to_string()]);
        let runs = engine.runs.lock();
        let nodes = &runs[0].1;
        assert!(nodes.contains(&WorkflowNode::new("125", "audio", "https://cdn.example.com/voice.wav")));
        assert!(nodes.contains(&WorkflowNode::new("192", "width", "720")));
        assert!(nodes.contains(&WorkflowNode::new("192", "height", "1280")));
        assert!(nodes.contains(&WorkflowNode::new("222", "frame_load_cap", "32")));
    }

    #[tokio::test]
    async fn test_lip_sync_without_audio_is_missing_input() {
        let engine = Arc::new(FakeEngine::default());
        let (deps, _) = deps(engine.clone(), false);
        let handler = ComposeHandler::lip_sync(deps, "video-wf");

        let err = handler
            .submit(
                &unit(UnitKind::LipSync, serde_json::json!({"video_path": "up/face.mp4"})),
                &input(None),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::MissingInput(_)));
        assert!(engine.runs.lock().is_empty());
    }

    #[tokio::test]
    async fn test_poll_downloads_and_registers_output() {
        let engine = Arc::new(FakeEngine::default());
        let (deps, resources) = deps(engine.clone(), true);
        let handler = ComposeHandler::lip_sync(deps, "video-wf");
        let running = unit(UnitKind::LipSync, serde_json::json!({}));

        let report = handler.poll(&running, "run-1").await.unwrap();
        assert_eq!(report, PollReport::running());

        *engine.state.lock() = Some(RunState::Success);
        let report = handler.poll(&running, "run-1").await.unwrap();
        assert_eq!(report.status, TaskStatus::Success);
        assert_eq!(report.result.as_deref(), Some("resources/12/final.mp4"));

        let resource = resources.get(report.resource_id.unwrap()).await.unwrap();
        assert_eq!(resource.kind, ResourceKind::Video);
        assert_eq!(resource.job_id, Some(4));
    }

    #[tokio::test]
    async fn test_poll_failed_run() {
        let engine = Arc::new(FakeEngine::default());
        *engine.state.lock() = Some(RunState::Failed);
        let (deps, _) = deps(engine, false);
        let handler = VoiceSynthesisHandler::new(deps, "voice-wf");

        let report = handler
            .poll(&unit(UnitKind::VoiceSynthesis, serde_json::json!({})), "run-1")
            .await
            .unwrap();
        assert_eq!(report, PollReport::finished(TaskStatus::Failed, None));
    }
}
