//! Dataset resolution: search the federation, then retrieve the hits.

use std::sync::Arc;

use esgf_client::{Credentials, Downloader, FileReference, SearchQuery, SearchService};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::constraints::ConstraintSet;
use crate::error::ResolutionError;
use crate::monitor::Monitor;
use crate::time_range::TimeRange;

/// Progress reported when the search starts.
pub const SEARCH_PERCENT: u8 = 5;
/// Progress reported when retrieval starts.
pub const DOWNLOAD_PERCENT: u8 = 15;

/// Search flags. Only the first `limit` hits are used; further pages are
/// never requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchOptions {
    pub distrib: bool,
    pub replica: bool,
    pub limit: u32,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            distrib: true,
            replica: false,
            limit: 100,
        }
    }
}

/// Resolves constraints into retrieved local files.
#[derive(Clone)]
pub struct DatasetResolver {
    search: Arc<dyn SearchService>,
    downloader: Arc<dyn Downloader>,
}

impl DatasetResolver {
    pub fn new(search: Arc<dyn SearchService>, downloader: Arc<dyn Downloader>) -> Self {
        Self { search, downloader }
    }

    /// Search for matching files and retrieve them.
    ///
    /// Zero matches is not an error: an empty list is returned and the
    /// caller carries on with an empty workspace.
    pub async fn resolve(
        &self,
        constraints: &ConstraintSet,
        time_range: &TimeRange,
        credentials: &Credentials,
        options: &SearchOptions,
        monitor: &dyn Monitor,
    ) -> Result<Vec<FileReference>, ResolutionError> {
        let (start, end) = time_range.search_bounds()?;

        let query = SearchQuery::files(constraints.to_query_pairs())
            .with_time_bounds(start, end)
            .with_distrib(options.distrib)
            .with_replica(options.replica)
            .with_limit(options.limit);

        monitor.report("searching datasets", SEARCH_PERCENT);
        info!(constraints = constraints.len(), limit = options.limit, "esgsearch ...");
        let result = self
            .search
            .search(&query)
            .await
            .map_err(ResolutionError::Search)?;
        debug!(urls = ?result.urls(), "search hits");

        monitor.report(
            &format!("downloading {} files", result.files.len()),
            DOWNLOAD_PERCENT,
        );
        info!(count = result.files.len(), "download ...");
        let references = self
            .downloader
            .download(&result.files, credentials)
            .await
            .map_err(ResolutionError::Download)?;

        info!(count = references.len(), "datasets resolved");
        Ok(references)
    }
}
