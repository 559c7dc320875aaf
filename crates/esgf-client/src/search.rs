//! ESGF search API client
//!
//! Queries an `esg-search` index node for file-level records and turns the
//! Solr JSON response into [`RemoteFile`] entries. Only a single page is
//! requested: `offset` is whatever the caller put into the query (0 for the
//! pipeline) and no follow-up pages are fetched.

use crate::error::EsgfError;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Record type requested from the index
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SearchType {
    Dataset,
    File,
}

impl SearchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchType::Dataset => "Dataset",
            SearchType::File => "File",
        }
    }
}

/// A single search request against the index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Facet constraints in precedence order; names may repeat
    pub constraints: Vec<(String, String)>,
    /// Free-text query, `*:*` matches everything
    pub query: String,
    /// Lower bound, ISO-8601 timestamp
    pub start: Option<String>,
    /// Upper bound, ISO-8601 timestamp
    pub end: Option<String>,
    pub search_type: SearchType,
    pub limit: u32,
    pub offset: u32,
    /// When set, `start`/`end` bound the record timestamp (`from`/`to`)
    /// instead of the data's temporal coverage.
    pub temporal: bool,
    pub distrib: bool,
    pub replica: bool,
    pub latest: bool,
}

impl SearchQuery {
    /// File-level query with the index defaults used by the pipeline
    pub fn files(constraints: Vec<(String, String)>) -> Self {
        SearchQuery {
            constraints,
            query: "*:*".to_string(),
            start: None,
            end: None,
            search_type: SearchType::File,
            limit: 100,
            offset: 0,
            temporal: false,
            distrib: true,
            replica: false,
            latest: true,
        }
    }

    /// Restrict to a time window
    pub fn with_time_bounds(mut self, start: impl Into<String>, end: impl Into<String>) -> Self {
        self.start = Some(start.into());
        self.end = Some(end.into());
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_distrib(mut self, distrib: bool) -> Self {
        self.distrib = distrib;
        self
    }

    pub fn with_replica(mut self, replica: bool) -> Self {
        self.replica = replica;
        self
    }

    /// Query-string parameters in the order they are sent
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = vec![
            ("type".to_string(), self.search_type.as_str().to_string()),
            ("format".to_string(), "application/solr+json".to_string()),
            ("query".to_string(), self.query.clone()),
            ("limit".to_string(), self.limit.to_string()),
            ("offset".to_string(), self.offset.to_string()),
            ("distrib".to_string(), self.distrib.to_string()),
            ("replica".to_string(), self.replica.to_string()),
            ("latest".to_string(), self.latest.to_string()),
        ];

        params.extend(self.constraints.iter().cloned());

        let (lower, upper) = if self.temporal {
            ("from", "to")
        } else {
            ("start", "end")
        };
        if let Some(start) = &self.start {
            params.push((lower.to_string(), start.clone()));
        }
        if let Some(end) = &self.end {
            params.push((upper.to_string(), end.clone()));
        }

        params
    }
}

/// Published checksum of a file record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Checksum {
    pub algorithm: String,
    pub value: String,
}

impl Checksum {
    pub fn is_sha256(&self) -> bool {
        self.algorithm.eq_ignore_ascii_case("sha256")
    }
}

/// A file record with its HTTP download location
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteFile {
    pub id: String,
    pub url: String,
    pub checksum: Option<Checksum>,
    pub size: Option<u64>,
}

impl RemoteFile {
    /// Record with a bare URL (local paths, tests)
    pub fn from_url(url: impl Into<String>) -> Self {
        let url = url.into();
        RemoteFile {
            id: url.clone(),
            url,
            checksum: None,
            size: None,
        }
    }
}

/// First page of a search
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResult {
    pub files: Vec<RemoteFile>,
    /// Total number of matches reported by the index, possibly more than `files`
    pub num_found: u64,
    /// facet name -> value -> count
    pub facet_counts: BTreeMap<String, BTreeMap<String, u64>>,
}

impl SearchResult {
    pub fn urls(&self) -> Vec<&str> {
        self.files.iter().map(|f| f.url.as_str()).collect()
    }

    /// Whether the index reported more matches than were returned
    pub fn is_truncated(&self) -> bool {
        self.num_found > self.files.len() as u64
    }
}

/// Dataset search service
#[async_trait]
pub trait SearchService: Send + Sync {
    async fn search(&self, query: &SearchQuery) -> Result<SearchResult>;
}

/// HTTP client for an `esg-search` endpoint
pub struct EsgSearchClient {
    base_url: String,
    http_client: reqwest::Client,
}

impl EsgSearchClient {
    /// Create a client for e.g. `https://esgf-data.dkrz.de/esg-search`
    pub fn new(base_url: &str) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("climproc-esgf-client/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(EsgSearchClient {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    fn search_url(&self) -> String {
        if self.base_url.ends_with("/search") {
            self.base_url.clone()
        } else {
            format!("{}/search", self.base_url)
        }
    }
}

#[async_trait]
impl SearchService for EsgSearchClient {
    async fn search(&self, query: &SearchQuery) -> Result<SearchResult> {
        let url = self.search_url();
        info!(url = %url, constraints = query.constraints.len(), "esgf search");
        debug!(params = ?query.to_params(), "search parameters");

        let response = self
            .http_client
            .get(&url)
            .query(&query.to_params())
            .send()
            .await
            .map_err(|e| EsgfError::Unreachable {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(EsgfError::HttpStatus {
                url,
                status: status.as_u16(),
            });
        }

        let body = response.text().await?;
        let result = parse_search_response(&body)?;
        info!(
            returned = result.files.len(),
            num_found = result.num_found,
            "esgf search done"
        );
        if result.is_truncated() {
            warn!(
                num_found = result.num_found,
                returned = result.files.len(),
                "search matched more files than the first page holds"
            );
        }
        Ok(result)
    }
}

/// Parse a Solr JSON search response
pub fn parse_search_response(body: &str) -> Result<SearchResult> {
    let json: Value = serde_json::from_str(body)
        .map_err(|e| EsgfError::MalformedResponse(format!("invalid JSON: {e}")))?;

    let response = json
        .get("response")
        .ok_or_else(|| EsgfError::MalformedResponse("missing `response`".to_string()))?;
    let num_found = response
        .get("numFound")
        .and_then(Value::as_u64)
        .ok_or_else(|| EsgfError::MalformedResponse("missing `response.numFound`".to_string()))?;
    let docs = response
        .get("docs")
        .and_then(Value::as_array)
        .ok_or_else(|| EsgfError::MalformedResponse("missing `response.docs`".to_string()))?;

    let mut files = Vec::with_capacity(docs.len());
    for doc in docs {
        match parse_file_doc(doc) {
            Some(file) => files.push(file),
            None => {
                let id = doc.get("id").unwrap_or(&Value::Null);
                warn!(doc = %id, "record without HTTPServer url");
            }
        }
    }

    let facet_counts = json
        .get("facet_counts")
        .and_then(|f| f.get("facet_fields"))
        .and_then(Value::as_object)
        .map(|fields| {
            fields
                .iter()
                .map(|(name, pairs)| (name.clone(), parse_facet_pairs(pairs)))
                .collect()
        })
        .unwrap_or_default();

    Ok(SearchResult {
        files,
        num_found,
        facet_counts,
    })
}

fn first_string(doc: &Value, field: &str) -> Option<String> {
    match doc.get(field)? {
        Value::String(s) => Some(s.clone()),
        Value::Array(values) => values.first()?.as_str().map(str::to_string),
        _ => None,
    }
}

fn parse_file_doc(doc: &Value) -> Option<RemoteFile> {
    // url entries look like "<url>|<mime type>|<service>"
    let url = doc
        .get("url")?
        .as_array()?
        .iter()
        .filter_map(Value::as_str)
        .find_map(|entry| {
            let mut parts = entry.split('|');
            let url = parts.next()?;
            let service = parts.nth(1)?;
            (service == "HTTPServer").then(|| url.to_string())
        })?;

    let id = first_string(doc, "id").unwrap_or_else(|| url.clone());
    let checksum = match (
        first_string(doc, "checksum"),
        first_string(doc, "checksum_type"),
    ) {
        (Some(value), Some(algorithm)) => Some(Checksum { algorithm, value }),
        _ => None,
    };
    let size = doc.get("size").and_then(Value::as_u64);

    Some(RemoteFile {
        id,
        url,
        checksum,
        size,
    })
}

fn parse_facet_pairs(pairs: &Value) -> BTreeMap<String, u64> {
    let mut counts = BTreeMap::new();
    if let Some(items) = pairs.as_array() {
        for chunk in items.chunks(2) {
            if let [Value::String(name), count] = chunk {
                counts.insert(name.clone(), count.as_u64().unwrap_or(0));
            }
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "response": {
            "numFound": 3,
            "docs": [
                {
                    "id": "cmip5.output1.MPI-M.pr_Amon_2000.nc|esgf1",
                    "url": [
                        "http://esgf1/thredds/fileServer/cmip5/pr_Amon_2000.nc|application/netcdf|HTTPServer",
                        "http://esgf1/thredds/dodsC/cmip5/pr_Amon_2000.nc.html|application/opendap-html|OPENDAP"
                    ],
                    "checksum": ["abc123"],
                    "checksum_type": ["SHA256"],
                    "size": 1024
                },
                {
                    "id": "opendap-only",
                    "url": ["http://esgf1/thredds/dodsC/x.nc.html|application/opendap-html|OPENDAP"]
                }
            ]
        },
        "facet_counts": {
            "facet_fields": {"model": ["MPI-ESM-LR", 2, "HadGEM2-ES", 1]}
        }
    }"#;

    #[test]
    fn test_parse_search_response() {
        let result = parse_search_response(SAMPLE).unwrap();
        assert_eq!(result.num_found, 3);
        assert_eq!(result.files.len(), 1);

        let file = &result.files[0];
        assert_eq!(
            file.url,
            "http://esgf1/thredds/fileServer/cmip5/pr_Amon_2000.nc"
        );
        assert!(file.checksum.as_ref().unwrap().is_sha256());
        assert_eq!(file.size, Some(1024));
        assert!(result.is_truncated());
        assert_eq!(result.facet_counts["model"]["MPI-ESM-LR"], 2);
    }

    #[test]
    fn test_parse_rejects_missing_docs() {
        let err = parse_search_response(r#"{"response": {"numFound": 0}}"#).unwrap_err();
        assert!(matches!(err, EsgfError::MalformedResponse(_)));

        let err = parse_search_response("<html>").unwrap_err();
        assert!(matches!(err, EsgfError::MalformedResponse(_)));
    }

    #[test]
    fn test_query_params_keep_constraint_order() {
        let query = SearchQuery::files(vec![
            ("project".to_string(), "CMIP5".to_string()),
            ("model".to_string(), "A".to_string()),
            ("model".to_string(), "B".to_string()),
        ])
        .with_time_bounds("2000-01-01T00:00:00Z", "2005-12-31T23:59:59Z");

        let params = query.to_params();
        let models: Vec<_> = params
            .iter()
            .filter(|(k, _)| k == "model")
            .map(|(_, v)| v.as_str())
            .collect();
        assert_eq!(models, vec!["A", "B"]);
        assert!(params.contains(&("type".to_string(), "File".to_string())));
        assert!(params.contains(&("latest".to_string(), "true".to_string())));
        assert!(params.contains(&("offset".to_string(), "0".to_string())));
        assert!(params.contains(&("start".to_string(), "2000-01-01T00:00:00Z".to_string())));
    }

    #[test]
    fn test_temporal_flag_switches_bound_names() {
        let mut query = SearchQuery::files(vec![]).with_time_bounds("a", "b");
        query.temporal = true;
        let params = query.to_params();
        assert!(params.contains(&("from".to_string(), "a".to_string())));
        assert!(params.contains(&("to".to_string(), "b".to_string())));
    }
}
