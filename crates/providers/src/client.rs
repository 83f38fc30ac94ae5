// JSON client with response-envelope decoding
//
// Both platforms wrap payloads as {code, message|msg, data}; they differ
// only in which code means success.

use reqwest::RequestBuilder;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use flashcast_orchestrator::PlatformError;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("platform returned code {code}: {message}")]
    Envelope { code: i64, message: String },

    #[error("response has no data")]
    EmptyData,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ClientError> for PlatformError {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::Http(e) if e.is_connect() || e.is_timeout() => {
                PlatformError::Unavailable(e.to_string())
            }
            ClientError::Http(e) => PlatformError::Rejected(e.to_string()),
            ClientError::Api { status, message } if status == 404 => {
                PlatformError::NotFound(message)
            }
            ClientError::Api { status, message } if status >= 500 => {
                PlatformError::Unavailable(format!("{status}: {message}"))
            }
            e @ (ClientError::Api { .. } | ClientError::Envelope { .. } | ClientError::EmptyData) => {
                PlatformError::Rejected(e.to_string())
            }
            ClientError::Io(e) => PlatformError::Io(e.to_string()),
        }
    }
}

/// Response wrapper used by both platforms
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct ApiEnvelope<T> {
    pub code: i64,
    #[serde(default, alias = "msg")]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Option<T>,
}

impl<T> ApiEnvelope<T> {
    /// Payload of a successful envelope
    pub fn into_data(self, success_code: i64) -> Result<T, ClientError> {
        if self.code != success_code {
            return Err(ClientError::Envelope {
                code: self.code,
                message: self.message.unwrap_or_default(),
            });
        }
        self.data.ok_or(ClientError::EmptyData)
    }
}

pub struct Client {
    base_url: String,
    http: reqwest::Client,
    success_code: i64,
}

impl Client {
    pub fn new(base_url: &str, success_code: i64) -> Self {
        Self::with_http(base_url, success_code, reqwest::Client::new())
    }

    pub fn with_http(base_url: &str, success_code: i64, http: reqwest::Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
            success_code,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        self.send(self.http.get(self.url(path))).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        self.send(self.http.post(self.url(path)).json(body)).await
    }

    pub async fn post_multipart<T: DeserializeOwned>(
        &self,
        path: &str,
        form: reqwest::multipart::Form,
    ) -> Result<T, ClientError> {
        self.send(self.http.post(self.url(path)).multipart(form)).await
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ClientError> {
        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ClientError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let envelope: ApiEnvelope<T> = response.json().await?;
        debug!(code = envelope.code, "Platform response");
        envelope.into_data(self.success_code)
    }
}
