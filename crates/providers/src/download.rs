// Artifact download into the local resource directory

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{info, instrument};

use flashcast_orchestrator::{ArtifactFetcher, PlatformError};

use crate::client::ClientError;

/// Streams remote outputs to `<root>/<unit id>/<file name>`
pub struct HttpArtifactFetcher {
    http: reqwest::Client,
    root: PathBuf,
}

impl HttpArtifactFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            http: reqwest::Client::new(),
            root: root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// File name for a downloaded artifact
///
/// Uses the last path segment of the URL (query and fragment removed). An
/// empty, `.` or `..` segment, or a URL with no path, falls back to
/// `unit-<id>` so the file always lands inside the unit directory.
fn artifact_file_name(url: &str, unit_id: i64) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or_default();
    let path = match without_query.split_once("://") {
        Some((_, rest)) => rest.split_once('/').map(|(_, path)| path).unwrap_or_default(),
        None => without_query,
    };
    match path.rsplit('/').next() {
        Some(name) if !name.is_empty() && name != "." && name != ".." && !name.contains('\\') => {
            name.to_string()
        }
        _ => format!("unit-{unit_id}"),
    }
}

#[async_trait]
impl ArtifactFetcher for HttpArtifactFetcher {
    #[instrument(skip(self))]
    async fn fetch(&self, unit_id: i64, url: &str) -> Result<PathBuf, PlatformError> {
        let dir = self.root.join(unit_id.to_string());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(ClientError::from)?;
        let target = dir.join(artifact_file_name(url, unit_id));

        let response = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(ClientError::from)?;

        let mut file = tokio::fs::File::create(&target)
            .await
            .map_err(ClientError::from)?;
        let mut stream = response.bytes_stream();
        let mut written = 0usize;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(ClientError::from)?;
            file.write_all(&chunk).await.map_err(ClientError::from)?;
            written += chunk.len();
        }
        file.flush().await.map_err(ClientError::from)?;

        info!(path = %target.display(), bytes = written, "Downloaded artifact");
        Ok(target)
    }
}
