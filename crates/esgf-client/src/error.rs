//! Error types for esgf-client

use thiserror::Error;

/// Errors that can occur while talking to an ESGF index or data node
#[derive(Error, Debug)]
pub enum EsgfError {
    /// Search endpoint could not be reached
    #[error("search service unreachable at {url}: {reason}")]
    Unreachable { url: String, reason: String },

    /// Server answered with a non-success status
    #[error("HTTP {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    /// Search response did not have the expected shape
    #[error("malformed search response: {0}")]
    MalformedResponse(String),

    /// Downloaded bytes do not match the published checksum
    #[error("checksum mismatch for {url}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        url: String,
        expected: String,
        actual: String,
    },

    /// URL cannot be fetched by this downloader
    #[error("unsupported file URL: {0}")]
    UnsupportedUrl(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport-level HTTP error
    #[error("HTTP error: {0}")]
    Http(String),
}

impl From<reqwest::Error> for EsgfError {
    fn from(err: reqwest::Error) -> Self {
        EsgfError::Http(err.to_string())
    }
}
