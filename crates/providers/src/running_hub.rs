// RunningHub workflow engine client
//
// Every call carries the API key. Runs are created from a workflow id plus
// node field overrides; uploads return a file name the workflow can read.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use flashcast_orchestrator::{PlatformError, ResourceKind, RunState, WorkflowEngine, WorkflowNode};

use crate::client::{Client, ClientError};

/// Envelope code RunningHub uses for success
pub const RUNNING_HUB_SUCCESS: i64 = 0;

pub const DEFAULT_RUNNING_HUB_URL: &str = "https://www.runninghub.cn";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateBody<'a> {
    api_key: &'a str,
    workflow_id: &'a str,
    node_info_list: Vec<WorkflowNode>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TaskBody<'a> {
    api_key: &'a str,
    task_id: &'a str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct HubFile {
    file_url: Option<String>,
    file_name: Option<String>,
    task_id: Option<String>,
}

/// Client for the RunningHub open API
pub struct RunningHubClient {
    client: Client,
    api_key: String,
}

impl RunningHubClient {
    pub fn new(base_url: &str, api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(base_url, RUNNING_HUB_SUCCESS),
            api_key: api_key.into(),
        }
    }

    fn task_body<'a>(&'a self, task_id: &'a str) -> TaskBody<'a> {
        TaskBody {
            api_key: &self.api_key,
            task_id,
        }
    }
}

fn upload_type(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Video => "video",
        ResourceKind::Audio => "audio",
        ResourceKind::Image => "image",
    }
}

#[async_trait]
impl WorkflowEngine for RunningHubClient {
    #[instrument(skip(self), fields(path = %path.display()))]
    async fn upload(&self, path: &Path, kind: ResourceKind) -> Result<String, PlatformError> {
        let bytes = tokio::fs::read(path).await.map_err(ClientError::from)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(bytes).file_name(file_name),
            )
            .text("apiKey", self.api_key.clone())
            .text("fileType", upload_type(kind));

        let uploaded: HubFile = self
            .client
            .post_multipart("/task/openapi/upload", form)
            .await?;
        let name = uploaded
            .file_name
            .ok_or_else(|| PlatformError::Rejected("upload returned no file name".into()))?;
        debug!(file_name = %name, "Uploaded file");
        Ok(name)
    }

    #[instrument(skip(self, nodes), fields(nodes = nodes.len()))]
    async fn create_run(
        &self,
        workflow_id: &str,
        nodes: Vec<WorkflowNode>,
    ) -> Result<String, PlatformError> {
        let body = CreateBody {
            api_key: &self.api_key,
            workflow_id,
            node_info_list: nodes,
        };
        let created: HubFile = self.client.post("/task/openapi/create", &body).await?;
        let run_id = created
            .task_id
            .ok_or_else(|| PlatformError::Rejected("create returned no task id".into()))?;
        info!(run_id = %run_id, "Workflow run created");
        Ok(run_id)
    }

    #[instrument(skip(self))]
    async fn check_run(&self, run_id: &str) -> Result<RunState, PlatformError> {
        Ok(self
            .client
            .post("/task/openapi/status", &self.task_body(run_id))
            .await?)
    }

    #[instrument(skip(self))]
    async fn fetch_outputs(&self, run_id: &str) -> Result<Vec<String>, PlatformError> {
        let files: Vec<HubFile> = self
            .client
            .post("/task/openapi/outputs", &self.task_body(run_id))
            .await?;
        Ok(files.into_iter().filter_map(|f| f.file_url).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_body_shape() {
        let body = CreateBody {
            api_key: "key",
            workflow_id: "1974699622956404738",
            node_info_list: vec![WorkflowNode::new("2", "emo_text", "稳重")],
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({
                "apiKey": "key",
                "workflowId": "1974699622956404738",
                "nodeInfoList": [{"nodeId": "2", "fieldName": "emo_text", "fieldValue": "稳重"}]
            })
        );
    }
}
