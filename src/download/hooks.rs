//! Download lifecycle events and the hook trait that observes them.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::DownloadError;
use super::task::DownloadTask;

/// Lifecycle events of a single download task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DownloadEvent {
    /// Response headers were rejected by the size/type policy; terminal.
    Abort,
    /// Output path and directories are final; body bytes follow.
    Start,
    /// A chunk was flushed and the boundary advanced.
    Write,
    /// Transfer finished (chunks merged when chunked); terminal.
    End,
    /// Transfer failed, or another hook failed; terminal.
    Error,
}

impl DownloadEvent {
    /// Event name as used in logs and persisted state.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Abort => "ABORT",
            Self::Start => "START",
            Self::Write => "WRITE",
            Self::End => "END",
            Self::Error => "ERROR",
        }
    }

    /// Every event, in lifecycle order.
    pub const ALL: [Self; 5] = [Self::Abort, Self::Start, Self::Write, Self::End, Self::Error];
}

impl fmt::Display for DownloadEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response facts the acceptance policy decides on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseMeta {
    /// HTTP status of the response.
    pub status: u16,
    /// Bytes in this response body, from `Content-Length`.
    pub content_length: Option<u64>,
    /// Raw `Content-Type` header.
    pub content_type: Option<String>,
    /// Extension inferred from the content type, else the destination's own.
    pub extension: Option<String>,
}

/// Observer of download lifecycle events.
///
/// Hooks run inline on the transfer's task, so they should be quick. An
/// error from `on_abort`, `on_start`, `on_write`, or `on_end` ends the
/// transfer and is reported through `on_error`; an error from `on_error`
/// itself is only logged.
pub trait DownloadHooks: Send + Sync {
    /// The response was rejected before any body bytes were read.
    fn on_abort(&self, _task: &DownloadTask, _response: &ResponseMeta) -> anyhow::Result<()> {
        Ok(())
    }

    /// The output location is final.
    fn on_start(&self, _task: &DownloadTask) -> anyhow::Result<()> {
        Ok(())
    }

    /// A chunk was flushed; `task.path` already names the next chunk.
    fn on_write(&self, _task: &DownloadTask) -> anyhow::Result<()> {
        Ok(())
    }

    /// The resource is complete at `task.path`.
    fn on_end(&self, _task: &DownloadTask) -> anyhow::Result<()> {
        Ok(())
    }

    /// The transfer failed.
    fn on_error(&self, _task: &DownloadTask, _error: &DownloadError) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Hooks that ignore every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl DownloadHooks for NoopHooks {}
