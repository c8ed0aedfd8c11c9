//! Error types for the download module.
//!
//! Every variant carries the URL or path it concerns, so a single
//! `ERROR` hook invocation has enough context to log or persist the failure.

use std::path::PathBuf;

use thiserror::Error;

use super::hooks::DownloadEvent;
use crate::scheduler::SchedulerError;

/// Errors that can occur while normalizing, transferring, or merging a download.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Network-level error (DNS resolution, connection refused, TLS, broken body stream).
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The URL that failed to download.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout downloading {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// Non-2xx response.
    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// A resumed transfer was answered with a full body instead of `206`.
    #[error("server ignored Range bytes={boundary}- for {url} (HTTP {status})")]
    RangeIgnored {
        /// The URL being resumed.
        url: String,
        /// Status actually returned.
        status: u16,
        /// Offset the request asked to resume from.
        boundary: u64,
    },

    /// File system error during download (create file, write, etc.)
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The provided URL is malformed or invalid.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// A request flagged as chunked does not point at `<name>.chunk_<N>`.
    #[error("not a chunk file path: {path}")]
    InvalidChunkName {
        /// The offending path.
        path: PathBuf,
    },

    /// Concatenating chunk files failed.
    #[error(transparent)]
    Merge(#[from] MergeError),

    /// A lifecycle hook returned an error.
    #[error("{event} hook failed: {error:#}")]
    Hook {
        /// Event whose hook failed.
        event: DownloadEvent,
        /// Error returned by the hook.
        error: anyhow::Error,
    },

    /// The scheduler refused the task.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

impl DownloadError {
    /// Creates a network error from a reqwest error, classifying timeouts.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            return Self::timeout(url);
        }
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates a range-ignored error.
    pub fn range_ignored(url: impl Into<String>, status: u16, boundary: u64) -> Self {
        Self::RangeIgnored {
            url: url.into(),
            status,
            boundary,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates an invalid chunk name error.
    pub fn invalid_chunk_name(path: impl Into<PathBuf>) -> Self {
        Self::InvalidChunkName { path: path.into() }
    }

    /// Creates a hook failure error.
    pub fn hook(event: DownloadEvent, error: anyhow::Error) -> Self {
        Self::Hook { event, error }
    }

    /// Returns true when the scheduler rejected the task for capacity.
    ///
    /// Callers typically wait and resubmit.
    #[must_use]
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::Scheduler(inner) if inner.is_capacity())
    }
}

/// Errors raised while merging a chunk directory.
#[derive(Debug, Error)]
pub enum MergeError {
    /// The directory name does not end in `.chunk`.
    #[error("{path} is not a chunk directory")]
    NotChunkDir {
        /// The rejected directory.
        path: PathBuf,
    },

    /// The chunk directory contains no chunk files for its resource.
    #[error("no chunk files in {dir}")]
    NoChunks {
        /// The empty chunk directory.
        dir: PathBuf,
    },

    /// The chunk sequence has a gap.
    #[error("chunk {number} missing from {dir}")]
    MissingChunk {
        /// The chunk directory.
        dir: PathBuf,
        /// 1-based number of the first missing chunk file.
        number: u32,
    },

    /// File system error while reading chunks or writing the merged file.
    #[error("IO error merging {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl MergeError {
    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
