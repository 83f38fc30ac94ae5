// Local AI server client (queue platform)
//
// Tasks are submitted under a named strategy and tracked by the server's
// task id. The in-flight listing identifies entries by the unit id passed as
// `taskId`, which is what reclaim compares against.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use flashcast_orchestrator::{
    Capacity, InFlight, PlatformError, QueuePlatform, QueueTask, StatusReport, TaskStatus,
};

use crate::client::Client;

/// Envelope code the AI server uses for success
pub const AI_SERVER_SUCCESS: i64 = 200;

/// Default number of concurrent tasks the server accepts
pub const DEFAULT_MAX_TASKS: usize = 5;

#[derive(Debug, Serialize)]
struct SubmitBody<'a> {
    strategy: &'a str,
    params: &'a Value,
}

#[derive(Debug, Deserialize)]
struct TaskListing {
    #[serde(default)]
    tasks: Vec<ListedTask>,
}

#[derive(Debug, Deserialize)]
struct ListedTask {
    id: Value,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    result: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct TaskResult {
    status: String,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

/// Client for the local AI server
pub struct AiServerClient {
    client: Client,
    max_tasks: usize,
}

impl AiServerClient {
    pub fn new(base_url: &str, max_tasks: usize) -> Self {
        Self {
            client: Client::new(base_url, AI_SERVER_SUCCESS),
            max_tasks,
        }
    }

    pub fn max_tasks(&self) -> usize {
        self.max_tasks
    }
}

fn parse_status(raw: &str) -> TaskStatus {
    raw.parse().unwrap_or_else(|_| {
        warn!(status = raw, "Unknown AI server status, treating as running");
        TaskStatus::Running
    })
}

/// Results may be plain text or structured; structured ones are kept as JSON
fn result_text(value: Option<Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

fn listed_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[async_trait]
impl QueuePlatform for AiServerClient {
    #[instrument(skip(self))]
    async fn query_capacity(&self) -> Result<Capacity, PlatformError> {
        let listing: TaskListing = self
            .client
            .post("/api/currentTaskNum", &serde_json::json!({}))
            .await?;

        let in_flight: Vec<InFlight> = listing
            .tasks
            .into_iter()
            .filter_map(|task| {
                let id = listed_id(&task.id)?;
                Some(InFlight {
                    id,
                    status: task
                        .status
                        .as_deref()
                        .map(parse_status)
                        .unwrap_or(TaskStatus::Running),
                    result: result_text(task.result),
                })
            })
            .collect();

        let remaining_slots = self.max_tasks.saturating_sub(in_flight.len());
        debug!(in_flight = in_flight.len(), remaining_slots, "AI server capacity");
        Ok(Capacity {
            remaining_slots,
            in_flight,
        })
    }

    #[instrument(skip(self, task), fields(unit_id = task.unit_id, strategy = %task.strategy))]
    async fn submit(&self, task: QueueTask) -> Result<String, PlatformError> {
        let body = SubmitBody {
            strategy: &task.strategy,
            params: &task.params,
        };
        let task_id: Value = self.client.post("/api/tasks", &body).await?;
        Ok(match task_id {
            Value::String(s) => s,
            other => other.to_string(),
        })
    }

    #[instrument(skip(self))]
    async fn check_status(&self, correlation_id: &str) -> Result<StatusReport, PlatformError> {
        let task: TaskResult = self
            .client
            .get(&format!("/api/tasks/{correlation_id}"))
            .await?;
        let status = parse_status(&task.status);
        let result = if status == TaskStatus::Failed {
            task.error.or_else(|| result_text(task.result))
        } else {
            result_text(task.result)
        };
        Ok(StatusReport { status, result })
    }
}
