//! File retrieval
//!
//! Turns search hits into local file references. A file is taken from the
//! local archive mirror when present, then from the download cache, and only
//! then fetched over HTTP.

use crate::error::EsgfError;
use crate::search::RemoteFile;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use url::Url;

/// Reference to a retrieved file, a `file://` URL or a plain local path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileReference(String);

impl FileReference {
    pub fn new(reference: impl Into<String>) -> Self {
        FileReference(reference.into())
    }

    /// `file://` reference for a local path
    pub fn from_path(path: &Path) -> Self {
        match Url::from_file_path(path) {
            Ok(url) => FileReference(url.to_string()),
            Err(()) => FileReference(path.to_string_lossy().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Local filesystem path, `None` for remote URLs
    pub fn local_path(&self) -> Option<PathBuf> {
        match Url::parse(&self.0) {
            Ok(url) if url.scheme() == "file" => url.to_file_path().ok(),
            Ok(_) => None,
            Err(url::ParseError::RelativeUrlWithoutBase) => Some(PathBuf::from(&self.0)),
            Err(_) => None,
        }
    }
}

impl std::fmt::Display for FileReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Credentials presented to data nodes
#[derive(Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Credentials {
    #[default]
    Anonymous,
    Bearer {
        token: String,
    },
    Basic {
        username: String,
        password: String,
    },
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::Anonymous => write!(f, "Anonymous"),
            Credentials::Bearer { .. } => write!(f, "Bearer(***)"),
            Credentials::Basic { username, .. } => write!(f, "Basic({username}, ***)"),
        }
    }
}

impl Credentials {
    fn apply(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            Credentials::Anonymous => request,
            Credentials::Bearer { token } => request.bearer_auth(token),
            Credentials::Basic { username, password } => {
                request.basic_auth(username, Some(password))
            }
        }
    }
}

/// Download service
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Retrieve every file and return local references in input order
    async fn download(
        &self,
        files: &[RemoteFile],
        credentials: &Credentials,
    ) -> Result<Vec<FileReference>>;
}

/// Downloader backed by a local archive mirror, a cache directory and HTTP
pub struct HttpDownloader {
    http_client: reqwest::Client,
    cache_dir: PathBuf,
    archive_root: Option<PathBuf>,
}

impl HttpDownloader {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("climproc-esgf-client/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(HttpDownloader {
            http_client,
            cache_dir: cache_dir.into(),
            archive_root: None,
        })
    }

    /// Serve files from a local replica of the archive when they exist there
    pub fn with_archive_root(mut self, archive_root: impl Into<PathBuf>) -> Self {
        self.archive_root = Some(archive_root.into());
        self
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    async fn retrieve(&self, file: &RemoteFile, credentials: &Credentials) -> Result<FileReference> {
        let reference = FileReference::new(&file.url);
        if reference.local_path().is_some() {
            debug!(url = %file.url, "local reference, nothing to fetch");
            return Ok(reference);
        }

        let url = Url::parse(&file.url).map_err(|_| EsgfError::UnsupportedUrl(file.url.clone()))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(EsgfError::UnsupportedUrl(file.url.clone()));
        }
        let relative = relative_data_path(&url)
            .ok_or_else(|| EsgfError::UnsupportedUrl(file.url.clone()))?;

        if let Some(archive_root) = &self.archive_root {
            let archived = archive_root.join(&relative);
            if archived.is_file() {
                debug!(path = %archived.display(), "found in archive");
                return Ok(FileReference::from_path(&archived));
            }
        }

        let target = self.cache_dir.join(&relative);
        if target.is_file() {
            match &file.checksum {
                Some(checksum) if checksum.is_sha256() => {
                    if sha256_file(&target)?.eq_ignore_ascii_case(&checksum.value) {
                        debug!(path = %target.display(), "cached copy verified");
                        return Ok(FileReference::from_path(&target));
                    }
                    warn!(path = %target.display(), "cached copy has wrong checksum, fetching again");
                }
                _ => {
                    debug!(path = %target.display(), "using cached copy");
                    return Ok(FileReference::from_path(&target));
                }
            }
        }

        self.fetch(file, &target, credentials).await?;
        Ok(FileReference::from_path(&target))
    }

    async fn fetch(&self, file: &RemoteFile, target: &Path, credentials: &Credentials) -> Result<()> {
        info!(url = %file.url, "downloading");

        let request = credentials.apply(self.http_client.get(&file.url));
        let mut response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(EsgfError::HttpStatus {
                url: file.url.clone(),
                status: status.as_u16(),
            });
        }

        let dir = target
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.cache_dir.clone());
        std::fs::create_dir_all(&dir)?;

        // Write next to the target and rename, so a partial download never
        // shows up as a cached file.
        let mut tmp = NamedTempFile::new_in(&dir)?;
        let mut hasher = Sha256::new();
        while let Some(chunk) = response.chunk().await? {
            hasher.update(&chunk);
            tmp.write_all(&chunk)?;
        }
        tmp.flush()?;

        if let Some(checksum) = file.checksum.as_ref().filter(|c| c.is_sha256()) {
            let actual = hex::encode(hasher.finalize());
            if !actual.eq_ignore_ascii_case(&checksum.value) {
                return Err(EsgfError::ChecksumMismatch {
                    url: file.url.clone(),
                    expected: checksum.value.clone(),
                    actual,
                });
            }
        }

        tmp.persist(target).map_err(|e| e.error)?;
        debug!(path = %target.display(), "download complete");
        Ok(())
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn download(
        &self,
        files: &[RemoteFile],
        credentials: &Credentials,
    ) -> Result<Vec<FileReference>> {
        info!(count = files.len(), "retrieving files");
        let mut references = Vec::with_capacity(files.len());
        for file in files {
            references.push(self.retrieve(file, credentials).await?);
        }
        Ok(references)
    }
}

/// Path of a data-node URL relative to the archive root.
///
/// THREDDS URLs (`.../fileServer/<data root>/<path>`) keep everything after
/// `fileServer/`; other URLs keep their whole path. Returns `None` for paths
/// that would escape the root.
pub fn relative_data_path(url: &Url) -> Option<PathBuf> {
    let path = url.path();
    let tail = match path.find("/fileServer/") {
        Some(idx) => &path[idx + "/fileServer/".len()..],
        None => path.trim_start_matches('/'),
    };

    let relative = PathBuf::from(tail);
    let safe = relative
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    (safe && relative.file_name().is_some()).then_some(relative)
}

/// Hex SHA256 of a file's contents
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}
