//! Command implementations wiring the library into a runnable harvest.

mod harvest;
mod persistence;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use harvester_core::{
    Browse, BrowseConfig, DownloadRequest, Downloader, HarvestConfig, HttpClient, Record, Session,
    merge_directory,
};

use self::harvest::{Harvest, submit_with_retry};
use self::persistence::{BROWSE_STORE, BrowseLedger, DOWNLOAD_STORE, DownloadLedger, open_store};

/// Builds a started downloader whose snapshots go to `ledger`.
fn start_downloader(config: &HarvestConfig, ledger: Arc<DownloadLedger>) -> Result<Downloader> {
    let client = HttpClient::with_settings(&config.client_settings())
        .context("Failed to build download client")?;
    let downloader = Downloader::new(
        config.scheduler_options()?,
        config.download_options()?,
        client,
        ledger,
    );
    downloader.start()?;
    Ok(downloader)
}

/// Waits for queued and running downloads; Ctrl-C stops admitting new ones.
async fn wait_for_downloads(downloader: &Downloader) {
    tokio::select! {
        () = downloader.idle() => info!("all downloads finished"),
        result = tokio::signal::ctrl_c() => {
            if let Err(error) = result {
                warn!(error = %error, "cannot listen for Ctrl-C");
            }
            warn!(
                in_flight = downloader.scheduler().in_flight_count(),
                waiting = downloader.scheduler().waiting_count(),
                "interrupted; run `harvester resume` to continue"
            );
        }
    }
    downloader.stop();
}

/// `harvester crawl`: crawl the target and download final-level records.
pub(crate) async fn run_crawl(config_path: &Path) -> Result<()> {
    let config = HarvestConfig::load(config_path)?;
    let ledger = Arc::new(DownloadLedger::new(open_store(&config.state_dir, DOWNLOAD_STORE)?));
    let downloader = start_downloader(&config, ledger)?;

    let failures = BrowseLedger::new(open_store(&config.state_dir, BROWSE_STORE)?);
    let handler = Arc::new(Harvest::new(downloader.clone(), &config, failures));
    let browse = Browse::new(
        config.extractors(),
        handler.clone(),
        BrowseConfig {
            log_over: config.log_over,
            ..BrowseConfig::default()
        },
    )?;
    let session = Session::new(&config.client_settings())?;

    let interrupter = browse.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; stopping crawl");
            interrupter.interrupt();
        }
    });
    let outcome = browse
        .start(session, Record::from_url(config.target.clone()))
        .await;
    ctrl_c.abort();
    let outcome = outcome.context("Crawl aborted")?;

    info!(
        outcome = ?outcome,
        submitted = handler.submitted(),
        "crawl finished; waiting for downloads"
    );
    wait_for_downloads(&downloader).await;
    Ok(())
}

/// `harvester resume`: resubmit snapshots left unfinished by an earlier run.
pub(crate) async fn run_resume(config_path: &Path) -> Result<()> {
    let config = HarvestConfig::load(config_path)?;
    let ledger = Arc::new(DownloadLedger::new(open_store(&config.state_dir, DOWNLOAD_STORE)?));
    let tasks = ledger.unfinished();
    if tasks.is_empty() {
        info!("nothing to resume");
        return Ok(());
    }

    info!(tasks = tasks.len(), "resuming downloads");
    let downloader = start_downloader(&config, ledger)?;
    for task in &tasks {
        let request = DownloadRequest::resume_from(task);
        if let Err(error) = submit_with_retry(&downloader, request, config.capacity_retry()).await {
            warn!(url = %task.url, error = %error, "cannot resume download");
        }
    }
    wait_for_downloads(&downloader).await;
    Ok(())
}

/// `harvester merge`: merge every chunk directory found in `dir`.
pub(crate) async fn run_merge(dir: &Path) -> Result<()> {
    let merged = merge_directory(dir)
        .await
        .with_context(|| format!("Failed to merge chunks in {}", dir.display()))?;
    if merged.is_empty() {
        info!(dir = %dir.display(), "no chunk directories found");
    }
    for path in &merged {
        info!(path = %path.display(), "merged");
    }
    Ok(())
}
