//! Handlers for text steps executed on the local AI server
//!
//! All of them block: the server is polled in place until the step
//! finishes, inside the work pool.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use super::handler::*;
use crate::model::{Unit, UnitKind};
use crate::platform::{QueuePlatform, QueueTask};

const LINK_PARSE_STRATEGY: &str = "douyin";
const REWRITE_STRATEGY: &str = "rewrite";

async fn poll_queue(
    queue: &dyn QueuePlatform,
    correlation_id: &str,
) -> Result<PollReport, HandlerError> {
    let report = queue.check_status(correlation_id).await?;
    Ok(PollReport::finished(report.status, report.result))
}

/// Extracts the spoken script from a share link
pub struct LinkParseHandler {
    queue: Arc<dyn QueuePlatform>,
}

impl LinkParseHandler {
    pub fn new(queue: Arc<dyn QueuePlatform>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl UnitHandler for LinkParseHandler {
    fn kind(&self) -> UnitKind {
        UnitKind::LinkParse
    }

    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Blocking
    }

    async fn submit(&self, unit: &Unit, _input: &UnitInput) -> Result<Submission, HandlerError> {
        let params = unit_params(unit)?;
        let link = required(params.link, "link")?;
        let correlation_id = self
            .queue
            .submit(QueueTask {
                unit_id: unit.id,
                strategy: LINK_PARSE_STRATEGY.to_string(),
                params: json!({ "taskId": unit.id.to_string(), "link": link }),
            })
            .await?;
        Ok(Submission { correlation_id })
    }

    async fn poll(&self, _unit: &Unit, correlation_id: &str) -> Result<PollReport, HandlerError> {
        poll_queue(self.queue.as_ref(), correlation_id).await
    }
}

/// Writes or rewrites copy with the server's rewrite strategy
///
/// Copy generation starts from the job text and a style template; copy
/// rewrite starts from the upstream script and applies tone and extra
/// instructions.
pub struct CopyHandler {
    kind: UnitKind,
    queue: Arc<dyn QueuePlatform>,
}

impl CopyHandler {
    pub fn generation(queue: Arc<dyn QueuePlatform>) -> Self {
        Self {
            kind: UnitKind::CopyGeneration,
            queue,
        }
    }

    pub fn rewrite(queue: Arc<dyn QueuePlatform>) -> Self {
        Self {
            kind: UnitKind::CopyRewrite,
            queue,
        }
    }
}

#[async_trait]
impl UnitHandler for CopyHandler {
    fn kind(&self) -> UnitKind {
        self.kind
    }

    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Blocking
    }

    async fn submit(&self, unit: &Unit, input: &UnitInput) -> Result<Submission, HandlerError> {
        let params = unit_params(unit)?;
        let text = required(
            input.content().map(str::to_string).or(params.text),
            "source text",
        )?;

        let mut body = json!({
            "taskId": unit.id.to_string(),
            "text": text,
        });
        if let Some(styles) = params.style_content {
            body["styles"] = json!(styles);
        }
        if self.kind == UnitKind::CopyRewrite {
            if let Some(tone) = params.tone {
                body["tone"] = json!(tone);
            }
            if let Some(extra) = params.extra_instructions {
                body["extra_instructions"] = json!(extra);
            }
        }

        let correlation_id = self
            .queue
            .submit(QueueTask {
                unit_id: unit.id,
                strategy: REWRITE_STRATEGY.to_string(),
                params: body,
            })
            .await?;
        Ok(Submission { correlation_id })
    }

    async fn poll(&self, _unit: &Unit, correlation_id: &str) -> Result<PollReport, HandlerError> {
        poll_queue(self.queue.as_ref(), correlation_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Job, JobKind, TaskStatus};
    use crate::platform::{Capacity, PlatformError, StatusReport};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingQueue {
        submitted: Mutex<Vec<QueueTask>>,
    }

    #[async_trait]
    impl QueuePlatform for RecordingQueue {
        async fn query_capacity(&self) -> Result<Capacity, PlatformError> {
            Ok(Capacity::default())
        }

        async fn submit(&self, task: QueueTask) -> Result<String, PlatformError> {
            let id = task.unit_id.to_string();
            self.submitted.lock().push(task);
            Ok(id)
        }

        async fn check_status(&self, _id: &str) -> Result<StatusReport, PlatformError> {
            Ok(StatusReport {
                status: TaskStatus::Success,
                result: Some("rewritten".into()),
            })
        }
    }

    fn unit(kind: UnitKind, params: serde_json::Value) -> Unit {
        let now = chrono::Utc::now();
        Unit {
            id: 7,
            job_id: 1,
            kind,
            seq: 1,
            params,
            status: TaskStatus::Running,
            result: None,
            platform: kind.platform(),
            correlation_id: None,
            predecessors: vec![6],
            created_at: now,
            updated_at: now,
            deleted: false,
        }
    }

    fn input(upstream: Option<&str>) -> UnitInput {
        let now = chrono::Utc::now();
        UnitInput {
            job: Job {
                id: 1,
                kind: JobKind::OneClickClone,
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

    #[tokio::test]
    async fn test_link_parse_requires_link() {
        let queue = Arc::new(RecordingQueue::default());
        let handler = LinkParseHandler::new(queue.clone());

        let err = handler
            .submit(&unit(UnitKind::LinkParse, serde_json::json!({})), &input(None))
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::MissingInput(_)));
        assert!(queue.submitted.lock().is_empty());

        let submission = handler
            .submit(
                &unit(UnitKind::LinkParse, serde_json::json!({"link": "https://v.douyin.com/x"})),
                &input(None),
            )
            .await
            .unwrap();
        assert_eq!(submission.correlation_id, "7");
        let sent = queue.submitted.lock();
        assert_eq!(sent[0].strategy, "douyin");
        assert_eq!(sent[0].params["link"], "https://v.douyin.com/x");
        assert_eq!(sent[0].params["taskId"], "7");
    }

    #[tokio::test]
    async fn test_rewrite_prefers_upstream_script() {
        let queue = Arc::new(RecordingQueue::default());
        let handler = CopyHandler::rewrite(queue.clone());
        let params = serde_json::json!({
            "text": "fallback",
            "tone": "playful",
            "style_content": "short sentences"
        });

        handler
            .submit(&unit(UnitKind::CopyRewrite, params), &input(Some("parsed script")))
            .await
            .unwrap();

        let sent = queue.submitted.lock();
        assert_eq!(sent[0].strategy, "rewrite");
        assert_eq!(sent[0].params["text"], "parsed script");
        assert_eq!(sent[0].params["tone"], "playful");
        assert_eq!(sent[0].params["styles"], "short sentences");
    }

    #[tokio::test]
    async fn test_generation_uses_job_text_and_ignores_tone() {
        let queue = Arc::new(RecordingQueue::default());
        let handler = CopyHandler::generation(queue.clone());
        let params = serde_json::json!({"text": "product intro", "tone": "calm"});

        handler
            .submit(&unit(UnitKind::CopyGeneration, params), &input(None))
            .await
            .unwrap();
        let report = handler
            .poll(&unit(UnitKind::CopyGeneration, serde_json::json!({})), "7")
            .await
            .unwrap();

        let sent = queue.submitted.lock();
        assert_eq!(sent[0].params["text"], "product intro");
        assert!(sent[0].params.get("tone").is_none());
        assert_eq!(report.status, TaskStatus::Success);
        assert_eq!(report.result.as_deref(), Some("rewritten"));
    }
}
