// FlashCast platform providers
//
// HTTP implementations of the orchestrator's external contracts:
// - AiServerClient: QueuePlatform for the local AI server
// - RunningHubClient: WorkflowEngine for RunningHub GPU workflows
// - HttpArtifactFetcher: ArtifactFetcher writing outputs to local disk

pub mod ai_server;
pub mod client;
pub mod download;
pub mod running_hub;

pub use ai_server::{AiServerClient, AI_SERVER_SUCCESS, DEFAULT_MAX_TASKS};
pub use client::{ApiEnvelope, Client, ClientError};
pub use download::HttpArtifactFetcher;
pub use running_hub::{RunningHubClient, DEFAULT_RUNNING_HUB_URL, RUNNING_HUB_SUCCESS};
