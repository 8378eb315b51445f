//! Artifact transport for kiln.
//!
//! This crate provides the `ArtifactSource` seam that turns a location
//! (`file:`, `mvn:`, `http(s):`) into a local file, the default source backed
//! by a local maven repository and remote repositories over HTTP, an
//! in-memory source for tests, and the `DownloadManager` worker pool whose
//! `Downloader` batches end in an explicit `await_all` barrier.

pub mod config;
pub mod http;
pub mod manager;
pub mod mock;
pub mod source;

pub use config::FetchConfig;
pub use http::HttpClient;
pub use manager::{Artifact, DownloadManager, Downloader};
pub use mock::MemorySource;
pub use source::DefaultSource;

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error returned by a download callback.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("fetch I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("artifact not found: {0}")]
    NotFound(String),
    #[error("unsupported location scheme: {0}")]
    UnsupportedScheme(String),
    #[error("invalid artifact location: {0}")]
    Coordinate(#[from] kiln_schema::CoordinateError),
    #[error("processing {location} failed: {source}")]
    Callback {
        location: String,
        source: CallbackError,
    },
    #[error("worker pool error: {0}")]
    Pool(String),
    #[error("fetching {location} failed earlier: {reason}")]
    Failed { location: String, reason: String },
    #[error("{} downloads failed: {}", .0.len(), join_errors(.0))]
    Multiple(Vec<FetchError>),
}

fn join_errors(errors: &[FetchError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Something that can turn an artifact location into a local file.
pub trait ArtifactSource: Send + Sync {
    /// Fetch `location`, writing into `dest_dir` if the bytes are not
    /// already on the local filesystem. Returns the local path.
    fn fetch(&self, location: &str, dest_dir: &Path) -> Result<PathBuf, FetchError>;

    /// Add remote maven repositories to search for later fetches.
    fn add_remote_repositories(&self, _repositories: &[String]) {}
}

/// File name to use when writing a fetched location.
pub(crate) fn file_name_for(location: &str) -> String {
    if let Ok(coord) = kiln_schema::MavenCoordinate::parse(location) {
        return coord.file_name();
    }
    let trimmed = location.trim_end_matches('/');
    let name = trimmed
        .rsplit(['/', ':'])
        .next()
        .filter(|n| !n.is_empty())
        .unwrap_or("artifact");
    name.split(['?', '#']).next().unwrap_or(name).to_owned()
}
