//! Artifact acquisition
//!
//! Chart archives are downloaded into a temporary workspace scoped to the
//! pass. The workspace is removed when dropped.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// File name of the downloaded chart archive inside the workspace
pub const ARCHIVE_FILE_NAME: &str = "artifact.tar.gz";

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("tmp dir error: {0}")]
    Workspace(std::io::Error),

    #[error("artifact '{url}' download failed (status code: {status})")]
    Status { url: String, status: u16 },

    #[error("artifact '{url}' request failed: {reason}")]
    Transport { url: String, reason: String },

    #[error("artifact write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("http client error: {0}")]
    Client(String),
}

/// Temporary directory owned by one pass
#[derive(Debug)]
pub struct Workspace {
    dir: tempfile::TempDir,
}

impl Workspace {
    pub fn create(prefix: &str) -> Result<Self, ArtifactError> {
        let dir = tempfile::Builder::new()
            .prefix(prefix)
            .tempdir()
            .map_err(ArtifactError::Workspace)?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Source of chart archives
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    /// Download `url` into `dir`, returning the local archive path
    async fn fetch(&self, url: &str, dir: &Path) -> Result<PathBuf, ArtifactError>;
}

/// Fetches artifacts over HTTP
#[derive(Debug, Clone)]
pub struct HttpArtifactFetcher {
    client: reqwest::Client,
}

impl HttpArtifactFetcher {
    pub fn new(timeout: Duration) -> Result<Self, ArtifactError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ArtifactError::Client(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ArtifactFetcher for HttpArtifactFetcher {
    async fn fetch(&self, url: &str, dir: &Path) -> Result<PathBuf, ArtifactError> {
        let transport = |e: reqwest::Error| ArtifactError::Transport {
            url: url.to_string(),
            reason: e.to_string(),
        };

        let response = self.client.get(url).send().await.map_err(transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(ArtifactError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(transport)?;
        let path = dir.join(ARCHIVE_FILE_NAME);
        tokio::fs::write(&path, &body).await?;

        debug!(url = %url, bytes = body.len(), "Downloaded artifact");
        Ok(path)
    }
}
