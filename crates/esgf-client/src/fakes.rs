//! In-process search and download services (testing and offline runs)
//!
//! `StaticSearch` answers every query with a fixed result and records the
//! queries it saw; `LocalDownloader` only accepts references to local files.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::download::{Credentials, Downloader, FileReference};
use crate::error::EsgfError;
use crate::search::{RemoteFile, SearchQuery, SearchResult, SearchService};
use crate::Result;

// ---------------------------------------------------------------------------
// StaticSearch
// ---------------------------------------------------------------------------

/// Search service with a canned answer.
#[derive(Debug, Default)]
pub struct StaticSearch {
    result: Option<SearchResult>,
    queries: Mutex<Vec<SearchQuery>>,
}

impl StaticSearch {
    /// Answer every query with these files
    pub fn with_files(files: Vec<RemoteFile>) -> Self {
        let num_found = files.len() as u64;
        Self {
            result: Some(SearchResult {
                files,
                num_found,
                facet_counts: Default::default(),
            }),
            queries: Mutex::new(Vec::new()),
        }
    }

    /// Answer every query with zero matches
    pub fn empty() -> Self {
        Self::with_files(Vec::new())
    }

    /// Fail every query as if the index were down
    pub fn unreachable() -> Self {
        Self::default()
    }

    /// Queries received so far
    pub fn queries(&self) -> Vec<SearchQuery> {
        self.queries.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl SearchService for StaticSearch {
    async fn search(&self, query: &SearchQuery) -> Result<SearchResult> {
        self.queries.lock().unwrap_or_else(|e| e.into_inner()).push(query.clone());
        self.result.clone().ok_or_else(|| EsgfError::Unreachable {
            url: "static://search".to_string(),
            reason: "connection refused".to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// LocalDownloader
// ---------------------------------------------------------------------------

/// Downloader that passes local references through and rejects remote URLs.
#[derive(Debug, Default)]
pub struct LocalDownloader;

impl LocalDownloader {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Downloader for LocalDownloader {
    async fn download(
        &self,
        files: &[RemoteFile],
        _credentials: &Credentials,
    ) -> Result<Vec<FileReference>> {
        files
            .iter()
            .map(|file| {
                let reference = FileReference::new(&file.url);
                match reference.local_path() {
                    Some(_) => Ok(reference),
                    None => Err(EsgfError::UnsupportedUrl(file.url.clone())),
                }
            })
            .collect()
    }
}
