//! ESGF-Client: dataset search and retrieval for climproc
//!
//! This crate is the narrow boundary to the Earth System Grid Federation:
//! a file-level search against an `esg-search` index node and the retrieval
//! of the matching files into local storage.
//!
//! ## Key Components
//!
//! - `SearchService` / `EsgSearchClient`: first-page file search
//! - `Downloader` / `HttpDownloader`: archive, cache, then HTTP retrieval
//! - `fakes`: canned services for tests and offline use

pub mod download;
mod error;
pub mod fakes;
pub mod search;

pub use download::{relative_data_path, sha256_file, Credentials, Downloader, FileReference, HttpDownloader};
pub use error::EsgfError;
pub use search::{
    parse_search_response, Checksum, EsgSearchClient, RemoteFile, SearchQuery, SearchResult,
    SearchService, SearchType,
};

/// Result type for esgf-client operations
pub type Result<T> = std::result::Result<T, EsgfError>;
