//! Chunked, resumable downloader built on the [`Scheduler`].
//!
//! Each admitted [`DownloadTask`] is transferred by one Tokio task:
//!
//! 1. `GET` with `Range: bytes=<boundary>-`
//! 2. On headers: size/type policy (reject → `ABORT`), extension inference,
//!    chunk-mode decision, directory creation, `START`
//! 3. Body segments accumulate in memory; every time more than
//!    `chunk_threshold` bytes are buffered, exactly `chunk_threshold` bytes are
//!    flushed to the current chunk file and `WRITE` fires
//! 4. On completion the remainder is written (`WRITE`), a chunked resource is
//!    merged and its chunk directory removed, then `END` fires
//!
//! A transfer that starts chunked at byte 0 clears any chunk directory left
//! by an earlier run first.
//!
//! Any failure fires `ERROR` with the task snapshot, whose boundary is the
//! first byte not yet on disk.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use futures_util::StreamExt;
use regex::Regex;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

use super::chunk::{ChunkManifest, merge_chunks};
use super::client::HttpClient;
use super::constants::{DEFAULT_CHUNK_THRESHOLD, DEFAULT_MAX_SIZE};
use super::error::DownloadError;
use super::filename::extension_from_content_type;
use super::hooks::{DownloadEvent, DownloadHooks, ResponseMeta};
use super::task::{DownloadRequest, DownloadTask};
use crate::scheduler::{Scheduler, SchedulerOptions};

/// Caller-supplied acceptance predicate over response headers.
pub type SizeFilter = Arc<dyn Fn(&ResponseMeta) -> bool + Send + Sync>;

/// Transfer policy shared by every task of a [`Downloader`].
#[derive(Clone)]
pub struct DownloadOptions {
    /// Chunk size; resources larger than this are split on disk.
    pub chunk_threshold: u64,
    /// Largest accepted resource.
    pub max_size: Option<u64>,
    /// Pattern the resource extension must match.
    pub extensions: Option<Regex>,
    /// Extra acceptance check.
    pub size_filter: Option<SizeFilter>,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            chunk_threshold: DEFAULT_CHUNK_THRESHOLD,
            max_size: Some(DEFAULT_MAX_SIZE),
            extensions: None,
            size_filter: None,
        }
    }
}

impl fmt::Debug for DownloadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadOptions")
            .field("chunk_threshold", &self.chunk_threshold)
            .field("max_size", &self.max_size)
            .field("extensions", &self.extensions.as_ref().map(Regex::as_str))
            .field("size_filter", &self.size_filter.is_some())
            .finish()
    }
}

impl DownloadOptions {
    /// Why the response should be rejected, if it should.
    ///
    /// `boundary` is added to the response length so resumed transfers are
    /// judged on the full resource size.
    #[must_use]
    pub fn rejection(&self, response: &ResponseMeta, boundary: u64) -> Option<String> {
        if let (Some(max), Some(length)) = (self.max_size, response.content_length) {
            let total = boundary.saturating_add(length);
            if total > max {
                return Some(format!("size {total} exceeds max {max}"));
            }
        }
        if let Some(pattern) = &self.extensions {
            match response.extension.as_deref() {
                Some(extension) if pattern.is_match(extension) => {}
                Some(extension) => return Some(format!("extension {extension} not allowed")),
                None => return Some("unknown extension".to_string()),
            }
        }
        if let Some(filter) = &self.size_filter
            && !filter(response)
        {
            return Some("rejected by size filter".to_string());
        }
        None
    }
}

/// Downloader: a [`Scheduler`] of [`DownloadTask`]s plus the transfer logic.
///
/// Cloning is cheap and every clone drives the same queue.
#[derive(Clone)]
pub struct Downloader {
    scheduler: Scheduler<DownloadTask>,
    transfer: Arc<Transfer>,
}

impl fmt::Debug for Downloader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Downloader")
            .field("scheduler", &self.scheduler)
            .field("options", &self.transfer.options)
            .finish_non_exhaustive()
    }
}

impl Downloader {
    /// Creates a stopped downloader.
    #[must_use]
    pub fn new(
        scheduler_options: SchedulerOptions,
        options: DownloadOptions,
        client: HttpClient,
        hooks: Arc<dyn DownloadHooks>,
    ) -> Self {
        Self {
            scheduler: Scheduler::new(scheduler_options),
            transfer: Arc::new(Transfer {
                client,
                options,
                hooks,
            }),
        }
    }

    /// Normalizes `request` and submits it.
    ///
    /// # Errors
    ///
    /// Returns a normalization error, or `DownloadError::Scheduler` when the
    /// queue is full (see [`DownloadError::is_capacity`]).
    pub fn download(&self, request: DownloadRequest) -> Result<(), DownloadError> {
        let task = DownloadTask::from_request(request, self.chunk_threshold())?;
        debug!(url = %task.url, path = %task.path.display(), boundary = %task.byte_boundary, "queueing download");
        self.scheduler.submit(task)?;
        Ok(())
    }

    /// Starts draining the queue.
    ///
    /// # Errors
    ///
    /// Returns `DownloadError::Scheduler` if already started.
    pub fn start(&self) -> Result<(), DownloadError> {
        let transfer = Arc::clone(&self.transfer);
        self.scheduler.start(move |task| {
            let transfer = Arc::clone(&transfer);
            async move { transfer.run(task).await }
        })?;
        Ok(())
    }

    /// Stops admitting queued tasks; running transfers finish.
    pub fn stop(&self) {
        self.scheduler.stop();
    }

    /// Waits until nothing is queued or running.
    pub async fn idle(&self) {
        self.scheduler.idle().await;
    }

    /// True iff another [`download`](Self::download) would be admitted.
    #[must_use]
    pub fn is_accepting_more(&self) -> bool {
        self.scheduler.is_accepting_more()
    }

    /// The underlying scheduler, for queue queries.
    #[must_use]
    pub fn scheduler(&self) -> &Scheduler<DownloadTask> {
        &self.scheduler
    }

    /// Transfers one task immediately, outside the queue.
    ///
    /// Hooks fire exactly as for scheduled tasks. Returns the final snapshot.
    pub async fn execute(&self, task: DownloadTask) -> DownloadTask {
        self.transfer.run(task).await
    }

    fn chunk_threshold(&self) -> u64 {
        self.transfer.options.chunk_threshold.max(1)
    }
}

struct Transfer {
    client: HttpClient,
    options: DownloadOptions,
    hooks: Arc<dyn DownloadHooks>,
}

fn notify(event: DownloadEvent, result: anyhow::Result<()>) -> Result<(), DownloadError> {
    result.map_err(|error| DownloadError::hook(event, error))
}

impl Transfer {
    #[instrument(skip(self, task), fields(url = %task.url))]
    async fn run(&self, mut task: DownloadTask) -> DownloadTask {
        if let Err(error) = self.transfer(&mut task).await {
            warn!(
                path = %task.path.display(),
                boundary = %task.byte_boundary,
                error = %error,
                "download failed"
            );
            if let Err(hook_error) = self.hooks.on_error(&task, &error) {
                warn!(error = %hook_error, "ERROR hook failed; ending task");
            }
        }
        task
    }

    async fn transfer(&self, task: &mut DownloadTask) -> Result<(), DownloadError> {
        let threshold = self.options.chunk_threshold.max(1);
        let boundary = task.byte_boundary.offset();

        let response = self
            .client
            .get_range(&task.url, boundary, &task.headers)
            .await?;
        let status = response.status().as_u16();
        if boundary > 0 && status != 206 {
            return Err(DownloadError::range_ignored(&task.url, status, boundary));
        }

        let content_length = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let inferred = content_type.as_deref().and_then(extension_from_content_type);
        let meta = ResponseMeta {
            status,
            content_length,
            content_type,
            extension: inferred.map(str::to_string).or_else(|| path_extension(&task.path)),
        };

        if !task.is_chunked {
            task.total_size = content_length.map(|length| boundary.saturating_add(length));
        }

        if let Some(reason) = self.options.rejection(&meta, boundary) {
            info!(reason = %reason, "download rejected");
            drop(response);
            return notify(DownloadEvent::Abort, self.hooks.on_abort(task, &meta));
        }

        if let Some(extension) = inferred {
            task.apply_extension(extension);
        }
        if !task.is_chunked && boundary == 0 && content_length.is_some_and(|len| len > threshold) {
            task.enter_chunked_mode(threshold);
        }
        if task.is_chunked && boundary == 0 {
            reset_chunk_dir(&task.chunk_dir()).await?;
        } else {
            create_parent(&task.path).await?;
        }
        debug!(
            path = %task.path.display(),
            chunked = task.is_chunked,
            total_size = ?task.total_size,
            "download starting"
        );
        notify(DownloadEvent::Start, self.hooks.on_start(task))?;

        let mut buffer: Vec<u8> = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(segment) = stream.next().await {
            let segment = segment.map_err(|e| DownloadError::network(&task.url, e))?;
            buffer.extend_from_slice(&segment);
            while buffer.len() as u64 > threshold {
                self.flush(task, &mut buffer, threshold).await?;
            }
        }

        self.finish(task, buffer).await?;
        info!(
            path = %task.path.display(),
            bytes = task.byte_boundary.offset(),
            "download complete"
        );
        notify(DownloadEvent::End, self.hooks.on_end(task))
    }

    /// Writes buffered bytes out once the buffer exceeds the threshold.
    async fn flush(
        &self,
        task: &mut DownloadTask,
        buffer: &mut Vec<u8>,
        threshold: u64,
    ) -> Result<(), DownloadError> {
        if !task.is_chunked {
            if task.byte_boundary.offset() > 0 {
                // resumed single file: append everything buffered
                append_file(&task.path, buffer).await?;
                task.byte_boundary.advance(buffer.len() as u64);
                buffer.clear();
                return notify(DownloadEvent::Write, self.hooks.on_write(task));
            }
            debug!("body outgrew chunk threshold without Content-Length; switching to chunks");
            task.enter_chunked_mode(threshold);
            reset_chunk_dir(&task.chunk_dir()).await?;
        }

        let split_at = usize::try_from(threshold).unwrap_or(usize::MAX);
        let rest = buffer.split_off(split_at);
        let chunk = std::mem::replace(buffer, rest);
        write_file(&task.path, &chunk).await?;
        task.byte_boundary.advance(chunk.len() as u64);
        task.advance_chunk();
        ChunkManifest::from_task(task)
            .write(&task.chunk_dir())
            .await?;
        debug!(
            boundary = %task.byte_boundary,
            next = %task.path.display(),
            "chunk flushed"
        );
        notify(DownloadEvent::Write, self.hooks.on_write(task))
    }

    /// Writes the remainder; a chunked resource is then merged and its chunk
    /// directory removed.
    async fn finish(&self, task: &mut DownloadTask, buffer: Vec<u8>) -> Result<(), DownloadError> {
        if task.is_chunked {
            if !buffer.is_empty() {
                write_file(&task.path, &buffer).await?;
                task.byte_boundary.advance(buffer.len() as u64);
                notify(DownloadEvent::Write, self.hooks.on_write(task))?;
            }
            let chunk_dir = task.chunk_dir();
            task.path = merge_chunks(&chunk_dir).await?;
            tokio::fs::remove_dir_all(&chunk_dir)
                .await
                .map_err(|e| DownloadError::io(&chunk_dir, e))?;
            debug!(dir = %chunk_dir.display(), "chunk directory removed");
            return Ok(());
        }

        if task.byte_boundary.offset() > 0 {
            append_file(&task.path, &buffer).await?;
        } else {
            write_file(&task.path, &buffer).await?;
        }
        task.byte_boundary.advance(buffer.len() as u64);
        notify(DownloadEvent::Write, self.hooks.on_write(task))
    }
}

fn path_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase)
}

async fn create_parent(path: &Path) -> Result<(), DownloadError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| DownloadError::io(parent, e))?;
    }
    Ok(())
}

/// Empties `dir` so a transfer starting at byte 0 never merges stale chunks.
async fn reset_chunk_dir(dir: &Path) -> Result<(), DownloadError> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => debug!(dir = %dir.display(), "removed stale chunk directory"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(DownloadError::io(dir, e)),
    }
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| DownloadError::io(dir, e))
}

async fn write_file(path: &Path, bytes: &[u8]) -> Result<(), DownloadError> {
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| DownloadError::io(path, e))
}

async fn append_file(path: &Path, bytes: &[u8]) -> Result<(), DownloadError> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| DownloadError::io(path, e))?;
    file.write_all(bytes)
        .await
        .map_err(|e| DownloadError::io(path, e))?;
    file.flush().await.map_err(|e| DownloadError::io(path, e))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn meta(content_length: Option<u64>, extension: Option<&str>) -> ResponseMeta {
        ResponseMeta {
            status: 200,
            content_length,
            content_type: None,
            extension: extension.map(str::to_string),
        }
    }

    #[test]
    fn test_default_options() {
        let options = DownloadOptions::default();
        assert_eq!(options.chunk_threshold, 32 * 1024 * 1024);
        assert_eq!(options.max_size, Some(256 * 1024 * 1024));
        assert!(options.rejection(&meta(Some(10), None), 0).is_none());
    }

    #[test]
    fn test_rejection_counts_boundary_toward_max_size() {
        let options = DownloadOptions {
            max_size: Some(1000),
            ..DownloadOptions::default()
        };
        assert!(options.rejection(&meta(Some(1000), None), 0).is_none());
        let reason = options.rejection(&meta(Some(600), None), 500).unwrap();
        assert!(reason.contains("1100"), "unexpected reason: {reason}");
        assert!(options.rejection(&meta(None, None), 0).is_none());
    }

    #[test]
    fn test_rejection_by_extension_pattern() {
        let options = DownloadOptions {
            extensions: Some(Regex::new("^(mp4|mkv)$").unwrap()),
            ..DownloadOptions::default()
        };
        assert!(options.rejection(&meta(None, Some("mp4")), 0).is_none());
        assert!(options.rejection(&meta(None, Some("html")), 0).is_some());
        assert!(options.rejection(&meta(None, None), 0).is_some());
    }

    #[test]
    fn test_rejection_by_custom_filter() {
        let options = DownloadOptions {
            size_filter: Some(Arc::new(|response: &ResponseMeta| {
                response.content_length.is_some_and(|len| len >= 100)
            })),
            ..DownloadOptions::default()
        };
        assert!(options.rejection(&meta(Some(100), None), 0).is_none());
        assert!(options.rejection(&meta(Some(99), None), 0).is_some());
    }

    #[test]
    fn test_options_debug_hides_filter_closure() {
        let options = DownloadOptions {
            size_filter: Some(Arc::new(|_: &ResponseMeta| true)),
            ..DownloadOptions::default()
        };
        let debug = format!("{options:?}");
        assert!(debug.contains("size_filter: true"), "unexpected: {debug}");
    }
}
