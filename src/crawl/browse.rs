//! Crawl orchestrator: builds a level chain and wires default hooks.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument};

use super::error::CrawlError;
use super::extract::Extractor;
use super::hooks::{DigHooks, HookBus, HookError};
use super::level::{DigOutcome, LevelController, LevelMeta};
use super::record::Record;
use super::session::Session;

/// Caller-side callbacks for a crawl.
#[async_trait]
pub trait BrowseHandler: Send + Sync {
    /// Decides whether `record` is fetched; rejected records are skipped.
    fn filter(&self, _record: &Record, _path: &[LevelMeta]) -> bool {
        true
    }

    /// Receives the records extracted at the final level.
    ///
    /// The crawl waits for this future before moving to the next sibling,
    /// so a slow consumer slows the crawl down.
    async fn on_data(&self, records: &[Record], path: &[LevelMeta]) -> anyhow::Result<()>;

    /// Receives fetch, extraction, and hook failures.
    fn on_error(&self, _record: &Record, _error: &HookError) {}
}

/// Options for [`Browse::new`].
#[derive(Clone)]
pub struct BrowseConfig {
    /// Log sibling progress on `DIG_OVER`.
    pub log_over: bool,
    /// Hooks registered after the defaults.
    pub extra_hooks: Vec<Arc<dyn DigHooks>>,
}

impl Default for BrowseConfig {
    fn default() -> Self {
        Self {
            log_over: true,
            extra_hooks: Vec::new(),
        }
    }
}

impl fmt::Debug for BrowseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrowseConfig")
            .field("log_over", &self.log_over)
            .field("extra_hooks", &self.extra_hooks.len())
            .finish()
    }
}

struct BrowseHooks {
    handler: Arc<dyn BrowseHandler>,
    max_level: usize,
    log_over: bool,
}

#[async_trait]
impl DigHooks for BrowseHooks {
    async fn on_ready(&self, path: &[LevelMeta], level: &LevelController) -> anyhow::Result<()> {
        let rejected = path
            .last()
            .is_some_and(|current| !self.handler.filter(&current.request, path));
        if rejected {
            level.skip();
        }
        Ok(())
    }

    async fn on_done(&self, path: &[LevelMeta], _level: &LevelController) -> anyhow::Result<()> {
        if path.len() != self.max_level {
            return Ok(());
        }
        match path.last().and_then(|current| current.records.as_deref()) {
            Some(records) => self.handler.on_data(records, path).await,
            None => Ok(()),
        }
    }

    async fn on_over(&self, path: &[LevelMeta], _level: &LevelController) -> anyhow::Result<()> {
        if !self.log_over || path.len() < 2 {
            return Ok(());
        }
        let child = &path[path.len() - 1];
        let total = path[path.len() - 2]
            .records
            .as_ref()
            .map_or(0, Vec::len);
        info!(
            level = path.len() - 1,
            progress = format!("{} of {total}", child.index + 1),
            outcome = ?child.outcome.unwrap_or(DigOutcome::Completed),
            "branch finished"
        );
        Ok(())
    }

    async fn on_error(
        &self,
        path: &[LevelMeta],
        _level: &LevelController,
        error: &HookError,
    ) -> anyhow::Result<()> {
        if let Some(current) = path.last() {
            self.handler.on_error(&current.request, error);
        }
        Ok(())
    }
}

/// A chain of level controllers plus the hooks that drive a crawl.
#[derive(Debug, Clone)]
pub struct Browse {
    levels: Vec<Arc<LevelController>>,
}

impl Browse {
    /// Builds one level per extractor, in order.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError::EmptyChain`] when `extractors` is empty.
    pub fn new(
        extractors: Vec<Arc<dyn Extractor>>,
        handler: Arc<dyn BrowseHandler>,
        config: BrowseConfig,
    ) -> Result<Self, CrawlError> {
        if extractors.is_empty() {
            return Err(CrawlError::EmptyChain);
        }

        let mut bus = HookBus::new();
        bus.register(Arc::new(BrowseHooks {
            handler,
            max_level: extractors.len(),
            log_over: config.log_over,
        }));
        for hook in config.extra_hooks {
            bus.register(hook);
        }
        let bus = Arc::new(bus);

        let levels: Vec<Arc<LevelController>> = extractors
            .into_iter()
            .map(|extractor| LevelController::new(extractor, Arc::clone(&bus)))
            .collect();
        for pair in levels.windows(2) {
            pair[0].link(&pair[1])?;
        }
        Ok(Self { levels })
    }

    /// Number of levels in the chain.
    #[must_use]
    pub fn max_level(&self) -> usize {
        self.levels.len()
    }

    /// The level at 1-based `depth`.
    #[must_use]
    pub fn level(&self, depth: usize) -> Option<&Arc<LevelController>> {
        depth.checked_sub(1).and_then(|index| self.levels.get(index))
    }

    /// Clears stale interrupts and digs `root` from the first level.
    ///
    /// # Errors
    ///
    /// Propagates [`CrawlError::Hook`] when a hook failure escalated past
    /// `DIG_ERROR`.
    #[instrument(skip_all, fields(levels = self.levels.len()))]
    pub async fn start(&self, session: Session, root: Record) -> Result<DigOutcome, CrawlError> {
        let head = &self.levels[0];
        head.reset_chain();
        let outcome = head.dig(session, root).await?;
        info!(outcome = ?outcome, "crawl finished");
        Ok(outcome)
    }

    /// Cooperatively stops the crawl at every level.
    pub fn interrupt(&self) {
        self.levels[0].interrupt();
    }
}
