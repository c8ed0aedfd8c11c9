//! Harvester Core Library
//!
//! This library walks a site through a fixed number of link-following levels,
//! extracts structured records at each level, and feeds discovered resources
//! into a bounded, resumable file downloader.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`scheduler`] - Admission-controlled task scheduler (waiting queue plus
//!   bounded in-flight set, drained by a poll loop)
//! - [`download`] - Chunked, resumable HTTP downloader built on the scheduler
//! - [`crawl`] - Level controller chain, browsing sessions, and the
//!   [`Browse`](crawl::Browse) orchestrator
//! - [`store`] - JSON-file category store for crash-recovery bookkeeping
//! - [`config`] - TOML harvest configuration

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod crawl;
pub mod download;
pub mod scheduler;
pub mod store;

mod user_agent;

// Re-export commonly used types
pub use config::HarvestConfig;
pub use crawl::{Browse, BrowseConfig, BrowseHandler, CrawlError, LevelController, Record, Session};
pub use download::{
    DownloadError, DownloadEvent, DownloadHooks, DownloadOptions, DownloadRequest, DownloadTask,
    Downloader, HttpClient, merge_directory,
};
pub use scheduler::{Scheduler, SchedulerError, SchedulerOptions};
pub use store::{CategoryStore, StoreError};
