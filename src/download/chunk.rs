//! On-disk chunk layout, sidecar manifest, and merging.
//!
//! A resource `movie.mp4` split into chunks lives in
//! `movie.mp4.chunk/movie.mp4.chunk_1 .. movie.mp4.chunk_N` (1-based on disk)
//! next to a `manifest.json` describing how to resume it. Merging concatenates
//! the chunk files in numeric order into `movie.mp4` beside the chunk
//! directory. The chunk directory is left in place, so merging is repeatable.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, instrument};

use super::error::{DownloadError, MergeError};
use super::task::{DownloadRequest, DownloadTask};

/// Suffix of chunk directories and the stem of chunk file names.
pub const CHUNK_SUFFIX: &str = ".chunk";

/// Sidecar file written inside each chunk directory.
pub const MANIFEST_FILE: &str = "manifest.json";

/// `<resource>.chunk_<number>`
#[allow(clippy::expect_used)]
static CHUNK_FILE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+)\.chunk_(\d+)$").expect("chunk file regex is valid") // Static pattern, safe to panic
});

/// `movie.mp4` → `movie.mp4.chunk`
#[must_use]
pub fn chunk_dir_name(resource_name: &str) -> String {
    format!("{resource_name}{CHUNK_SUFFIX}")
}

/// File name of the chunk with 0-based `index` (`movie.mp4.chunk_<index + 1>`).
#[must_use]
pub fn chunk_file_name(resource_name: &str, index: u32) -> String {
    format!("{resource_name}{CHUNK_SUFFIX}_{}", index.saturating_add(1))
}

/// Splits `movie.mp4.chunk_3` into `("movie.mp4", 3)`.
///
/// Returns `None` for anything else, including chunk number 0.
#[must_use]
pub fn parse_chunk_file_name(file_name: &str) -> Option<(String, u32)> {
    let captures = CHUNK_FILE_RE.captures(file_name)?;
    let number: u32 = captures.get(2)?.as_str().parse().ok()?;
    if number == 0 {
        return None;
    }
    Some((captures.get(1)?.as_str().to_string(), number))
}

/// Resumption record kept next to the chunk files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkManifest {
    /// Final file name of the resource.
    pub resource_name: String,
    /// Source URL.
    pub url: String,
    /// Full resource size when known.
    pub total_size: Option<u64>,
    /// First unwritten byte.
    pub boundary: u64,
    /// 1-based number of the next chunk file to write.
    pub next_chunk: u32,
    /// Request headers to replay.
    #[serde(default)]
    pub headers: std::collections::BTreeMap<String, String>,
    /// Opaque caller data.
    #[serde(default)]
    pub meta: serde_json::Map<String, serde_json::Value>,
}

impl ChunkManifest {
    /// Snapshot of a chunked task after a flush.
    #[must_use]
    pub fn from_task(task: &DownloadTask) -> Self {
        Self {
            resource_name: task.resource_name.clone(),
            url: task.url.clone(),
            total_size: task.total_size,
            boundary: task.byte_boundary.offset(),
            next_chunk: task.chunk_index.unwrap_or(0).saturating_add(1),
            headers: task.headers.clone(),
            meta: task.meta.clone(),
        }
    }

    /// Writes `manifest.json` into `chunk_dir` (via a temp file and rename).
    ///
    /// # Errors
    ///
    /// Returns an IO error if the file cannot be written.
    pub async fn write(&self, chunk_dir: &Path) -> Result<(), DownloadError> {
        let path = chunk_dir.join(MANIFEST_FILE);
        let tmp = chunk_dir.join(format!("{MANIFEST_FILE}.tmp"));
        let body = serde_json::to_vec_pretty(self)
            .map_err(|e| DownloadError::io(&path, std::io::Error::other(e)))?;
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| DownloadError::io(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| DownloadError::io(&path, e))
    }

    /// Reads `manifest.json` from `chunk_dir`.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the file is missing or malformed.
    pub async fn read(chunk_dir: &Path) -> Result<Self, DownloadError> {
        let path = chunk_dir.join(MANIFEST_FILE);
        let body = tokio::fs::read(&path)
            .await
            .map_err(|e| DownloadError::io(&path, e))?;
        serde_json::from_slice(&body).map_err(|e| {
            DownloadError::io(
                &path,
                std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            )
        })
    }

    /// Request continuing from this manifest.
    #[must_use]
    pub fn into_request(self, chunk_dir: &Path) -> DownloadRequest {
        let path = chunk_dir.join(chunk_file_name(
            &self.resource_name,
            self.next_chunk.saturating_sub(1),
        ));
        DownloadRequest {
            url: self.url,
            path,
            boundary: Some(self.boundary),
            total_size: self.total_size,
            chunked: true,
            headers: self.headers,
            meta: self.meta,
        }
    }
}

/// Concatenates the chunk files of `chunk_dir` into `<parent>/<resource name>`.
///
/// Chunks are ordered by their numeric suffix, never lexically. Returns the
/// merged file's path.
///
/// # Errors
///
/// - [`MergeError::NotChunkDir`] if the directory name lacks `.chunk`
/// - [`MergeError::NoChunks`] if no chunk files are present
/// - [`MergeError::MissingChunk`] if the sequence `1..=N` has a gap
/// - [`MergeError::Io`] on read/write failure
#[instrument(level = "debug", skip(chunk_dir), fields(dir = %chunk_dir.display()))]
pub async fn merge_chunks(chunk_dir: &Path) -> Result<PathBuf, MergeError> {
    let dir_name = chunk_dir
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default();
    let Some(resource_name) = dir_name.strip_suffix(CHUNK_SUFFIX).filter(|s| !s.is_empty()) else {
        return Err(MergeError::NotChunkDir {
            path: chunk_dir.to_path_buf(),
        });
    };

    let mut chunks = list_chunks(chunk_dir, resource_name).await?;
    if chunks.is_empty() {
        return Err(MergeError::NoChunks {
            dir: chunk_dir.to_path_buf(),
        });
    }
    chunks.sort_by_key(|(number, _)| *number);
    for (expected, (number, _)) in (1_u32..).zip(&chunks) {
        if *number != expected {
            return Err(MergeError::MissingChunk {
                dir: chunk_dir.to_path_buf(),
                number: expected,
            });
        }
    }

    let output = chunk_dir
        .parent()
        .unwrap_or_else(|| Path::new(""))
        .join(resource_name);
    let file = File::create(&output)
        .await
        .map_err(|e| MergeError::io(&output, e))?;
    let mut writer = BufWriter::new(file);
    let mut total: u64 = 0;
    for (_, path) in &chunks {
        let mut reader = File::open(path)
            .await
            .map_err(|e| MergeError::io(path, e))?;
        total += tokio::io::copy(&mut reader, &mut writer)
            .await
            .map_err(|e| MergeError::io(path, e))?;
    }
    writer
        .flush()
        .await
        .map_err(|e| MergeError::io(&output, e))?;

    info!(
        path = %output.display(),
        chunks = chunks.len(),
        bytes = total,
        "chunks merged"
    );
    Ok(output)
}

async fn list_chunks(chunk_dir: &Path, resource_name: &str) -> Result<Vec<(u32, PathBuf)>, MergeError> {
    let mut entries = tokio::fs::read_dir(chunk_dir)
        .await
        .map_err(|e| MergeError::io(chunk_dir, e))?;
    let mut chunks = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| MergeError::io(chunk_dir, e))?
    {
        let file_name = entry.file_name();
        let Some((resource, number)) = file_name.to_str().and_then(parse_chunk_file_name) else {
            continue;
        };
        if resource == resource_name {
            chunks.push((number, entry.path()));
        }
    }
    Ok(chunks)
}

/// Merges every `*.chunk` subdirectory of `dir`.
///
/// Stops at the first failing directory.
///
/// # Errors
///
/// Returns the first [`MergeError`] encountered.
#[instrument(level = "debug", skip(dir), fields(dir = %dir.display()))]
pub async fn merge_directory(dir: &Path) -> Result<Vec<PathBuf>, MergeError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| MergeError::io(dir, e))?;
    let mut chunk_dirs = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|e| MergeError::io(dir, e))? {
        let is_dir = entry
            .file_type()
            .await
            .map_err(|e| MergeError::io(entry.path(), e))?
            .is_dir();
        let named_chunk = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.ends_with(CHUNK_SUFFIX));
        if is_dir && named_chunk {
            chunk_dirs.push(entry.path());
        }
    }
    chunk_dirs.sort();
    debug!(count = chunk_dirs.len(), "chunk directories found");

    let mut merged = Vec::with_capacity(chunk_dirs.len());
    for chunk_dir in chunk_dirs {
        merged.push(merge_chunks(&chunk_dir).await?);
    }
    Ok(merged)
}
