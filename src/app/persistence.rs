//! Crash-recovery bookkeeping in the category stores.
//!
//! Download snapshots go to `<state_dir>/download.json` and crawl failures to
//! `<state_dir>/browse.json`, both filed under `[event, page]` and keyed by URL.

use std::path::Path;
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result, bail};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use harvester_core::crawl::HookError;
use harvester_core::download::{DownloadError, DownloadEvent, DownloadHooks, DownloadTask, ResponseMeta};
use harvester_core::{CategoryStore, Record};

pub(crate) const DOWNLOAD_STORE: &str = "download";
pub(crate) const BROWSE_STORE: &str = "browse";
const CATEGORY_KEYS: [&str; 2] = ["event", "page"];
const PRIMARY_KEY: &str = "url";
const DEFAULT_PAGE: &str = "0";

/// Events whose snapshots describe a download that has not finished.
pub(crate) const UNFINISHED_EVENTS: [DownloadEvent; 3] =
    [DownloadEvent::Start, DownloadEvent::Write, DownloadEvent::Error];

/// Opens `<state_dir>/<name>.json` with the harvester's category layout.
pub(crate) fn open_store(state_dir: &Path, name: &str) -> Result<CategoryStore> {
    CategoryStore::open(state_dir, name, &CATEGORY_KEYS, PRIMARY_KEY)
        .with_context(|| format!("Failed to open {name} store in {}", state_dir.display()))
}

/// The `page` category of an item: its `page` field, or `"0"`.
fn page_of(fields: &Map<String, Value>) -> String {
    match fields.get("page") {
        Some(Value::String(page)) if !page.is_empty() => page.clone(),
        Some(Value::Number(page)) => page.to_string(),
        _ => DEFAULT_PAGE.to_string(),
    }
}

/// Download hooks that log progress and persist every task snapshot.
pub(crate) struct DownloadLedger {
    store: Mutex<CategoryStore>,
}

impl DownloadLedger {
    pub(crate) fn new(store: CategoryStore) -> Self {
        Self {
            store: Mutex::new(store),
        }
    }

    fn record(&self, event: DownloadEvent, task: &DownloadTask, error: Option<String>) -> Result<()> {
        let Value::Object(mut item) = serde_json::to_value(task)? else {
            bail!("download task did not serialize to an object");
        };
        item.insert("event".to_string(), Value::String(event.as_str().to_string()));
        if let Some(error) = error {
            item.insert("error".to_string(), Value::String(error));
        }
        let page = page_of(&task.meta);
        self.store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .set(&[event.as_str(), &page], item)?;
        Ok(())
    }

    /// Snapshots recorded as started, partially written, or failed.
    pub(crate) fn unfinished(&self) -> Vec<DownloadTask> {
        let store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        let mut tasks = Vec::new();
        for event in UNFINISHED_EVENTS {
            let items = match store.get_by_category(&[event.as_str()]) {
                Ok(items) => items,
                Err(error) => {
                    warn!(event = %event, error = %error, "cannot query download store");
                    continue;
                }
            };
            for item in items {
                match serde_json::from_value::<DownloadTask>(Value::Object(item.clone())) {
                    Ok(task) => tasks.push(task),
                    Err(error) => warn!(event = %event, error = %error, "skipping unreadable snapshot"),
                }
            }
        }
        tasks
    }
}

impl DownloadHooks for DownloadLedger {
    fn on_abort(&self, task: &DownloadTask, response: &ResponseMeta) -> anyhow::Result<()> {
        info!(
            resource = %task.resource_name,
            content_length = ?response.content_length,
            content_type = ?response.content_type,
            "download abandoned by policy"
        );
        self.record(DownloadEvent::Abort, task, None)
    }

    fn on_start(&self, task: &DownloadTask) -> anyhow::Result<()> {
        info!(
            resource = %task.resource_name,
            total_size = ?task.total_size,
            chunked = task.is_chunked,
            "download started"
        );
        self.record(DownloadEvent::Start, task, None)
    }

    fn on_write(&self, task: &DownloadTask) -> anyhow::Result<()> {
        debug!(
            resource = %task.resource_name,
            chunk = ?task.chunk_index,
            boundary = %task.byte_boundary,
            "chunk written"
        );
        self.record(DownloadEvent::Write, task, None)
    }

    fn on_end(&self, task: &DownloadTask) -> anyhow::Result<()> {
        info!(resource = %task.resource_name, path = %task.path.display(), "download finished");
        self.record(DownloadEvent::End, task, None)
    }

    fn on_error(&self, task: &DownloadTask, error: &DownloadError) -> anyhow::Result<()> {
        warn!(resource = %task.resource_name, error = %error, "download failed");
        self.record(DownloadEvent::Error, task, Some(error.to_string()))
    }
}

/// Persists crawl failures so they can be inspected after the run.
pub(crate) struct BrowseLedger {
    store: Mutex<CategoryStore>,
}

impl BrowseLedger {
    pub(crate) fn new(store: CategoryStore) -> Self {
        Self {
            store: Mutex::new(store),
        }
    }

    pub(crate) fn record(&self, request: &Record, error: &HookError) -> Result<()> {
        if request.url().is_none() {
            bail!("crawl request has no url");
        }
        let mut item = request.as_map().clone();
        item.insert(
            "event".to_string(),
            Value::String(error.event.as_str().to_string()),
        );
        if let Some(cause) = &error.error {
            item.insert("error".to_string(), Value::String(format!("{cause:#}")));
        }
        let page = page_of(&item);
        self.store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .set(&[error.event.as_str(), &page], item)?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use harvester_core::DownloadRequest;
    use harvester_core::crawl::DigEvent;
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    fn task(url: &str, page: Value) -> DownloadTask {
        let mut meta = Map::new();
        meta.insert("page".to_string(), page);
        let request = DownloadRequest::new(url, "/tmp/out/video.mp4").with_meta(meta);
        DownloadTask::from_request(request, 1000).unwrap()
    }

    #[test]
    fn test_page_of_reads_strings_and_numbers() {
        let mut fields = Map::new();
        assert_eq!(page_of(&fields), "0");
        fields.insert("page".to_string(), json!(4));
        assert_eq!(page_of(&fields), "4");
        fields.insert("page".to_string(), json!("7"));
        assert_eq!(page_of(&fields), "7");
    }

    #[test]
    fn test_download_ledger_moves_task_between_events() {
        let dir = TempDir::new().unwrap();
        let ledger = DownloadLedger::new(open_store(dir.path(), DOWNLOAD_STORE).unwrap());
        let task = task("https://example.com/a.mp4", json!(2));

        ledger.on_start(&task).unwrap();
        assert_eq!(ledger.unfinished(), vec![task.clone()]);

        ledger.on_end(&task).unwrap();
        assert!(ledger.unfinished().is_empty());

        let store = ledger.store.lock().unwrap();
        let done = store.get_by_category(&["END", "2"]).unwrap();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0]["event"], json!("END"));
    }

    #[test]
    fn test_download_ledger_keeps_error_message() {
        let dir = TempDir::new().unwrap();
        let ledger = DownloadLedger::new(open_store(dir.path(), DOWNLOAD_STORE).unwrap());
        let task = task("https://example.com/b.mp4", json!("1"));

        let error = DownloadError::http_status("https://example.com/b.mp4", 404);
        ledger.on_error(&task, &error).unwrap();

        let store = ledger.store.lock().unwrap();
        let item = store.get("https://example.com/b.mp4").unwrap();
        assert_eq!(item["event"], json!("ERROR"));
        assert!(item["error"].as_str().unwrap().contains("404"));
        drop(store);
        assert_eq!(ledger.unfinished().len(), 1);
    }

    #[test]
    fn test_browse_ledger_records_failure() {
        let dir = TempDir::new().unwrap();
        let ledger = BrowseLedger::new(open_store(dir.path(), BROWSE_STORE).unwrap());
        let mut request = Record::from_url("https://example.com/show/1");
        request.insert("page", json!(3));
        let error = HookError {
            event: DigEvent::Error,
            error: Some(anyhow::anyhow!("HTTP 500")),
        };

        ledger.record(&request, &error).unwrap();
        let store = ledger.store.lock().unwrap();
        let failures = store.get_by_category(&["DIG_ERROR", "3"]).unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0]["error"], json!("HTTP 500"));

        let nameless = HookError {
            event: DigEvent::Error,
            error: None,
        };
        drop(store);
        assert!(ledger.record(&Record::new(), &nameless).is_err());
    }
}
