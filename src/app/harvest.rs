//! Browse handler that turns final-level records into downloads.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use url::Url;

use harvester_core::crawl::{BrowseHandler, HookError, LevelMeta};
use harvester_core::download::{fallback_filename_from_url, sanitize_filename};
use harvester_core::{DownloadError, DownloadRequest, Downloader, HarvestConfig, Record};

use super::persistence::BrowseLedger;

/// Submits `request`, waiting `retry` between attempts while the scheduler
/// is full.
pub(crate) async fn submit_with_retry(
    downloader: &Downloader,
    request: DownloadRequest,
    retry: Duration,
) -> Result<(), DownloadError> {
    loop {
        match downloader.download(request.clone()) {
            Err(error) if error.is_capacity() => {
                debug!(url = %request.url, retry_ms = retry.as_millis(), "scheduler full; waiting");
                tokio::time::sleep(retry).await;
            }
            result => return result,
        }
    }
}

/// Feeds crawl results into a [`Downloader`].
pub(crate) struct Harvest {
    downloader: Downloader,
    output_dir: PathBuf,
    name_field: String,
    capacity_retry: Duration,
    failures: BrowseLedger,
    submitted: AtomicUsize,
}

impl Harvest {
    pub(crate) fn new(downloader: Downloader, config: &HarvestConfig, failures: BrowseLedger) -> Self {
        Self {
            downloader,
            output_dir: config.output_dir.clone(),
            name_field: config.name_field.clone(),
            capacity_retry: config.capacity_retry(),
            failures,
            submitted: AtomicUsize::new(0),
        }
    }

    /// Downloads submitted so far.
    pub(crate) fn submitted(&self) -> usize {
        self.submitted.load(Ordering::Relaxed)
    }

    /// Download request for `record`, named after its name field.
    pub(crate) fn request_for(&self, record: &Record) -> Option<DownloadRequest> {
        let url = record.url()?;
        let name = match record.get_str(&self.name_field) {
            Some(name) if !name.trim().is_empty() => sanitize_filename(name),
            _ => fallback_filename_from_url(&Url::parse(url).ok()?),
        };
        Some(
            DownloadRequest::new(url, self.output_dir.join(name))
                .with_meta(record.as_map().clone()),
        )
    }
}

#[async_trait]
impl BrowseHandler for Harvest {
    fn filter(&self, record: &Record, path: &[LevelMeta]) -> bool {
        let Some(url) = record.url() else {
            warn!(level = path.len(), "record has no url; skipping");
            return false;
        };
        if path.len() == 1 {
            info!(url, "visiting target");
        } else {
            debug!(url, level = path.len(), "visiting");
        }
        true
    }

    async fn on_data(&self, records: &[Record], _path: &[LevelMeta]) -> anyhow::Result<()> {
        for record in records {
            let Some(request) = self.request_for(record) else {
                warn!(record = ?record.as_map(), "record has no downloadable url");
                continue;
            };
            match submit_with_retry(&self.downloader, request, self.capacity_retry).await {
                Ok(()) => {
                    self.submitted.fetch_add(1, Ordering::Relaxed);
                }
                Err(error) => warn!(url = record.url().unwrap_or_default(), error = %error, "download rejected"),
            }
        }
        Ok(())
    }

    fn on_error(&self, record: &Record, error: &HookError) {
        warn!(url = record.url().unwrap_or_default(), error = %error, "crawl step failed");
        if let Err(failure) = self.failures.record(record, error) {
            warn!(error = %format!("{failure:#}"), "cannot persist crawl failure");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use harvester_core::download::NoopHooks;
    use harvester_core::{DownloadOptions, HttpClient, SchedulerOptions};
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::app::persistence::{BROWSE_STORE, open_store};

    const CONFIG: &str = r#"
        target = "https://example.com/list"
        output_dir = "/data/out"
        name_field = "title"
        capacity_retry_ms = 10

        [[levels]]
    "#;

    fn downloader(max: usize) -> Downloader {
        Downloader::new(
            SchedulerOptions::new(max, 1, Duration::from_millis(10)).unwrap(),
            DownloadOptions::default(),
            HttpClient::new(),
            Arc::new(NoopHooks),
        )
    }

    fn harvest(dir: &TempDir, downloader: Downloader) -> Harvest {
        let config = HarvestConfig::from_toml_str(CONFIG).unwrap();
        let failures = BrowseLedger::new(open_store(dir.path(), BROWSE_STORE).unwrap());
        Harvest::new(downloader, &config, failures)
    }

    #[test]
    fn test_request_for_uses_name_field_and_keeps_meta() {
        let dir = TempDir::new().unwrap();
        let harvest = harvest(&dir, downloader(3));

        let mut record = Record::from_url("https://cdn.example.com/v/123.mp4");
        record.insert("title", json!("Episode 1: Pilot"));
        record.insert("page", json!(2));
        let request = harvest.request_for(&record).unwrap();
        assert_eq!(request.url, "https://cdn.example.com/v/123.mp4");
        assert_eq!(request.path.parent().unwrap(), PathBuf::from("/data/out"));
        assert!(!request.path.to_string_lossy().contains(':'));
        assert_eq!(request.meta["page"], json!(2));

        let untitled = Record::from_url("https://cdn.example.com/v/123.mp4");
        let request = harvest.request_for(&untitled).unwrap();
        assert_eq!(request.path, PathBuf::from("/data/out/123.mp4"));

        assert!(harvest.request_for(&Record::new()).is_none());
    }

    #[test]
    fn test_filter_rejects_records_without_url() {
        let dir = TempDir::new().unwrap();
        let harvest = harvest(&dir, downloader(3));
        assert!(!harvest.filter(&Record::new(), &[]));
        assert!(harvest.filter(&Record::from_url("https://example.com"), &[]));
    }

    #[tokio::test]
    async fn test_submit_with_retry_waits_for_capacity() {
        let downloader = downloader(1);
        downloader
            .download(DownloadRequest::new("https://example.com/a.mp4", "/tmp/a.mp4"))
            .unwrap();
        assert!(!downloader.is_accepting_more());

        // frees the slot by draining the queue without a transfer
        let drain = downloader.clone();
        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            drain.scheduler().start(|task| async move { task }).unwrap();
        });

        let request = DownloadRequest::new("https://example.com/b.mp4", "/tmp/b.mp4");
        submit_with_retry(&downloader, request, Duration::from_millis(10))
            .await
            .unwrap();
        release.await.unwrap();
    }
}
