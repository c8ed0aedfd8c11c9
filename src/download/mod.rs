//! Chunked, resumable HTTP downloader.
//!
//! This module streams HTTP resources to disk through an admission-controlled
//! [`Scheduler`](crate::scheduler::Scheduler).
//!
//! # Features
//!
//! - Streaming downloads with bounded memory (at most one chunk buffered)
//! - Resources above the chunk threshold are split into
//!   `<name>.chunk/<name>.chunk_<N>` files and merged on completion
//! - Resumable: every task carries the first unwritten byte and a chunked
//!   resource keeps a `manifest.json` to rebuild its request from
//! - Size/type policy applied on response headers, before any body is read
//! - Lifecycle hooks (`ABORT`, `START`, `WRITE`, `END`, `ERROR`)
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use harvester_core::download::{
//!     DownloadOptions, DownloadRequest, Downloader, HttpClient, NoopHooks,
//! };
//! use harvester_core::scheduler::SchedulerOptions;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let downloader = Downloader::new(
//!     SchedulerOptions::default(),
//!     DownloadOptions::default(),
//!     HttpClient::new(),
//!     Arc::new(NoopHooks),
//! );
//! downloader.start()?;
//! downloader.download(DownloadRequest::new(
//!     "https://example.com/video.mp4",
//!     "./downloads/video.mp4",
//! ))?;
//! downloader.idle().await;
//! # Ok(())
//! # }
//! ```

pub mod chunk;
mod client;
mod constants;
mod downloader;
mod error;
mod filename;
mod hooks;
mod task;

pub use chunk::{ChunkManifest, merge_chunks, merge_directory};
pub use client::{ClientSettings, HttpClient};
pub(crate) use client::build_client;
pub use constants::{
    CONNECT_TIMEOUT_SECS, DEFAULT_CHUNK_THRESHOLD, DEFAULT_MAX_SIZE, READ_TIMEOUT_SECS,
};
pub use downloader::{DownloadOptions, Downloader, SizeFilter};
pub use error::{DownloadError, MergeError};
pub use filename::{extension_from_content_type, fallback_filename_from_url, sanitize_filename};
pub use hooks::{DownloadEvent, DownloadHooks, NoopHooks, ResponseMeta};
pub use task::{ByteBoundary, DownloadRequest, DownloadTask};
