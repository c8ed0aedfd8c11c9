//! Download requests and the scheduler task they normalize into.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use url::Url;

use super::chunk::{self, ChunkManifest};
use super::error::DownloadError;

/// First unwritten byte of a resource, rendered as an open HTTP range (`"1500-"`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ByteBoundary(u64);

impl ByteBoundary {
    /// Creates a boundary at `offset`.
    #[must_use]
    pub fn new(offset: u64) -> Self {
        Self(offset)
    }

    /// The byte offset.
    #[must_use]
    pub fn offset(self) -> u64 {
        self.0
    }

    /// Moves the boundary forward by `bytes`.
    pub fn advance(&mut self, bytes: u64) {
        self.0 = self.0.saturating_add(bytes);
    }
}

impl fmt::Display for ByteBoundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-", self.0)
    }
}

impl FromStr for ByteBoundary {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().trim_end_matches('-').parse().map(Self)
    }
}

impl Serialize for ByteBoundary {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ByteBoundary {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// What a caller asks the downloader to fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadRequest {
    /// Source URL.
    pub url: String,
    /// Destination file, or the chunk file to continue when `chunked` is set.
    pub path: PathBuf,
    /// Offset to resume from.
    #[serde(default)]
    pub boundary: Option<u64>,
    /// Full resource size when already known.
    #[serde(default)]
    pub total_size: Option<u64>,
    /// `path` names a chunk file (`<name>.chunk_<N>`).
    #[serde(default)]
    pub chunked: bool,
    /// Extra request headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Opaque caller data carried through to hooks.
    #[serde(default)]
    pub meta: serde_json::Map<String, serde_json::Value>,
}

impl DownloadRequest {
    /// Creates a fresh request for `url` saved at `path`.
    pub fn new(url: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            path: path.into(),
            boundary: None,
            total_size: None,
            chunked: false,
            headers: BTreeMap::new(),
            meta: serde_json::Map::new(),
        }
    }

    /// Attaches caller metadata.
    #[must_use]
    pub fn with_meta(mut self, meta: serde_json::Map<String, serde_json::Value>) -> Self {
        self.meta = meta;
        self
    }

    /// Adds a request header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Rebuilds a resumable request from a chunk directory's manifest.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the manifest cannot be read or parsed.
    pub async fn from_manifest(chunk_dir: &Path) -> Result<Self, DownloadError> {
        let manifest = ChunkManifest::read(chunk_dir).await?;
        Ok(manifest.into_request(chunk_dir))
    }

    /// Rebuilds the request a persisted task snapshot would resume from.
    #[must_use]
    pub fn resume_from(task: &DownloadTask) -> Self {
        Self {
            url: task.url.clone(),
            path: task.path.clone(),
            boundary: Some(task.byte_boundary.offset()),
            total_size: task.total_size,
            chunked: task.is_chunked,
            headers: task.headers.clone(),
            meta: task.meta.clone(),
        }
    }
}

/// A normalized download as scheduled and reported to hooks.
///
/// Serializable so hooks can persist snapshots and a later run can resume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadTask {
    /// Source URL.
    pub url: String,
    /// Current output file: the final file, or the next chunk file to write.
    pub path: PathBuf,
    /// Final file name of the resource.
    pub resource_name: String,
    /// Whether the resource is being written as chunk files.
    pub is_chunked: bool,
    /// First unwritten byte.
    pub byte_boundary: ByteBoundary,
    /// Full resource size when known.
    pub total_size: Option<u64>,
    /// 0-based index of the chunk `path` points at.
    pub chunk_index: Option<u32>,
    /// Bytes per chunk file.
    pub chunk_size: Option<u64>,
    /// Extra request headers.
    pub headers: BTreeMap<String, String>,
    /// Opaque caller data.
    pub meta: serde_json::Map<String, serde_json::Value>,
}

impl DownloadTask {
    /// Normalizes a request.
    ///
    /// # Errors
    ///
    /// - [`DownloadError::InvalidUrl`] if the URL does not parse
    /// - [`DownloadError::InvalidChunkName`] if a chunked request's path is
    ///   not a chunk file, or any request's path has no file name
    pub fn from_request(request: DownloadRequest, chunk_threshold: u64) -> Result<Self, DownloadError> {
        Url::parse(&request.url).map_err(|_| DownloadError::invalid_url(&request.url))?;

        let file_name = request
            .path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| DownloadError::invalid_chunk_name(&request.path))?
            .to_string();

        let (resource_name, chunk_index, chunk_size) = if request.chunked {
            let (resource, number) = chunk::parse_chunk_file_name(&file_name)
                .ok_or_else(|| DownloadError::invalid_chunk_name(&request.path))?;
            (resource, Some(number - 1), Some(chunk_threshold))
        } else {
            (file_name, None, None)
        };

        Ok(Self {
            url: request.url,
            path: request.path,
            resource_name,
            is_chunked: request.chunked,
            byte_boundary: ByteBoundary::new(request.boundary.unwrap_or(0)),
            total_size: request.total_size,
            chunk_index,
            chunk_size,
            headers: request.headers,
            meta: request.meta,
        })
    }

    /// Directory holding the resource (the parent of the chunk directory when chunked).
    #[must_use]
    pub fn resource_dir(&self) -> PathBuf {
        let parent = self.path.parent().unwrap_or_else(|| Path::new(""));
        if self.is_chunked {
            parent.parent().unwrap_or_else(|| Path::new("")).to_path_buf()
        } else {
            parent.to_path_buf()
        }
    }

    /// Chunk directory for this resource.
    #[must_use]
    pub fn chunk_dir(&self) -> PathBuf {
        self.resource_dir()
            .join(chunk::chunk_dir_name(&self.resource_name))
    }

    /// Switches the task to chunked mode at chunk 0.
    pub(crate) fn enter_chunked_mode(&mut self, chunk_size: u64) {
        let dir = self.chunk_dir();
        self.path = dir.join(chunk::chunk_file_name(&self.resource_name, 0));
        self.is_chunked = true;
        self.chunk_index = Some(0);
        self.chunk_size = Some(chunk_size);
    }

    /// Points `path` at the next chunk file.
    pub(crate) fn advance_chunk(&mut self) {
        let next = self.chunk_index.map_or(0, |index| index + 1);
        self.chunk_index = Some(next);
        self.path = self
            .chunk_dir()
            .join(chunk::chunk_file_name(&self.resource_name, next));
    }

    /// Appends `extension` to an unchunked destination that has none.
    pub(crate) fn apply_extension(&mut self, extension: &str) {
        if self.is_chunked || self.path.extension().is_some() {
            return;
        }
        self.resource_name = format!("{}.{extension}", self.resource_name);
        self.path = self.resource_dir().join(&self.resource_name);
    }
}
