//! Model artifact fetching
//!
//! A model reference is either a path on this host, used in place, or an
//! `http(s)` URL that is streamed into the download directory. Downloaded
//! files belong to the [`Artifact`] and are removed when it is dropped.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::StreamExt;
use reqwest::{Client, Url};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use common::error::{Error, Result};
use common::utils::format_mb;
use common::ArtifactInfo;

/// File name used when the URL path has none
const DEFAULT_FILE_NAME: &str = "model.onnx";

/// A model file ready to be handed to an engine
#[derive(Debug)]
pub struct Artifact {
    path: PathBuf,
    info: ArtifactInfo,
    /// Whether this worker created the file and must delete it
    downloaded: bool,
}

impl Artifact {
    /// Location on disk
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Name and size reported with results
    pub fn info(&self) -> &ArtifactInfo {
        &self.info
    }

    /// Returns true if the file was downloaded for this job
    pub fn is_downloaded(&self) -> bool {
        self.downloaded
    }
}

impl Drop for Artifact {
    fn drop(&mut self) {
        if !self.downloaded {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed downloaded artifact {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove artifact {}: {}", self.path.display(), e),
        }
    }
}

/// Resolves model references to local files
pub struct ArtifactFetcher {
    /// HTTP client
    client: Client,
    /// Download directory
    download_dir: PathBuf,
}

impl ArtifactFetcher {
    /// Creates a fetcher with its own HTTP client
    pub fn new(download_dir: impl Into<PathBuf>, connect_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("bench-worker/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| Error::Http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self::with_client(client, download_dir))
    }

    /// Creates a fetcher sharing an existing client
    pub fn with_client(client: Client, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            download_dir: download_dir.into(),
        }
    }

    /// Download directory
    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Resolves `reference` to a file on this host
    pub async fn fetch(&self, reference: &str) -> Result<Artifact> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(Error::ModelLoad("empty model reference".to_string()));
        }

        if reference.starts_with("http://") || reference.starts_with("https://") {
            let url = Url::parse(reference)
                .map_err(|e| Error::ModelLoad(format!("Invalid model URL {}: {}", reference, e)))?;
            return self.download(url).await;
        }

        let path = PathBuf::from(reference.strip_prefix("file://").unwrap_or(reference));
        local_artifact(path).await
    }

    async fn download(&self, url: Url) -> Result<Artifact> {
        let file_name = file_name_from_url(&url);
        let short_id = uuid::Uuid::new_v4().simple().to_string();
        let path = self.download_dir.join(format!("{}_{}", &short_id[..8], file_name));

        info!("Downloading model from {} to {}", url, path.display());

        tokio::fs::create_dir_all(&self.download_dir).await.map_err(|e| {
            Error::ModelLoad(format!(
                "Cannot create download directory {}: {}",
                self.download_dir.display(),
                e
            ))
        })?;

        // The artifact owns the file from here on, so every early return cleans up.
        let artifact = Artifact {
            path,
            info: ArtifactInfo {
                file_name,
                file_size: 0,
            },
            downloaded: true,
        };

        let size = self
            .stream_to(&url, &artifact.path)
            .await
            .map_err(|e| Error::ModelLoad(format!("Failed to download {}: {}", url, e)))?;

        if size == 0 {
            return Err(Error::ModelLoad(format!("Downloaded model from {} is empty", url)));
        }

        info!("Downloaded {} ({})", artifact.info.file_name, format_mb(size));

        let mut artifact = artifact;
        artifact.info.file_size = size;
        Ok(artifact)
    }

    async fn stream_to(&self, url: &Url, path: &Path) -> std::result::Result<u64, String> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !response.status().is_success() {
            return Err(format!("server responded {}", response.status()));
        }

        let mut file = File::create(path).await.map_err(|e| e.to_string())?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| e.to_string())?;
            file.write_all(&chunk).await.map_err(|e| e.to_string())?;
            written += chunk.len() as u64;
        }

        file.flush().await.map_err(|e| e.to_string())?;
        Ok(written)
    }
}

async fn local_artifact(path: PathBuf) -> Result<Artifact> {
    let metadata = tokio::fs::metadata(&path)
        .await
        .map_err(|e| Error::ModelLoad(format!("Model file {} is not readable: {}", path.display(), e)))?;

    if !metadata.is_file() {
        return Err(Error::ModelLoad(format!("{} is not a file", path.display())));
    }

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| DEFAULT_FILE_NAME.to_string());

    Ok(Artifact {
        info: ArtifactInfo {
            file_name,
            file_size: metadata.len(),
        },
        path,
        downloaded: false,
    })
}

/// Last non-empty path segment of `url`
fn file_name_from_url(url: &Url) -> String {
    url.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(str::to_string)
        .unwrap_or_else(|| DEFAULT_FILE_NAME.to_string())
}
