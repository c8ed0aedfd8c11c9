//! Crawl lifecycle events and the hook bus that broadcasts them.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use super::level::{LevelController, LevelMeta};

/// Events a level controller emits while digging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DigEvent {
    /// About to fetch; handlers may `skip()` the level.
    Ready,
    /// Fetch and extraction finished (records may be absent on failure).
    Done,
    /// A child branch finished; the path still ends with the child's entry.
    Over,
    /// Fetch/extraction failed, or another hook failed.
    Error,
}

impl DigEvent {
    /// Event name as used in logs and persisted state.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "DIG_READY",
            Self::Done => "DIG_DONE",
            Self::Over => "DIG_OVER",
            Self::Error => "DIG_ERROR",
        }
    }
}

impl fmt::Display for DigEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What went wrong, as handed to `DIG_ERROR` handlers.
#[derive(Debug)]
pub struct HookError {
    /// The event being processed when the error occurred.
    pub event: DigEvent,
    /// The failure, if there was one.
    pub error: Option<anyhow::Error>,
}

impl fmt::Display for HookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error {
            Some(error) => write!(f, "{}: {error:#}", self.event),
            None => f.write_str(self.event.as_str()),
        }
    }
}

/// Observer of crawl events.
///
/// `path` runs from the crawl root to the level being notified; its last
/// entry describes the current request. Every method defaults to a no-op.
#[async_trait]
pub trait DigHooks: Send + Sync {
    /// Before fetching.
    async fn on_ready(&self, _path: &[LevelMeta], _level: &LevelController) -> anyhow::Result<()> {
        Ok(())
    }

    /// After fetching and extracting.
    async fn on_done(&self, _path: &[LevelMeta], _level: &LevelController) -> anyhow::Result<()> {
        Ok(())
    }

    /// After a child branch returned.
    async fn on_over(&self, _path: &[LevelMeta], _level: &LevelController) -> anyhow::Result<()> {
        Ok(())
    }

    /// On fetch/extraction failure or hook escalation.
    async fn on_error(
        &self,
        _path: &[LevelMeta],
        _level: &LevelController,
        _error: &HookError,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Ordered list of hooks shared by every level of a chain.
#[derive(Clone, Default)]
pub struct HookBus {
    hooks: Vec<Arc<dyn DigHooks>>,
}

impl fmt::Debug for HookBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookBus")
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

impl HookBus {
    /// Empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a hook; hooks run in registration order.
    pub fn register(&mut self, hook: Arc<dyn DigHooks>) {
        self.hooks.push(hook);
    }

    /// Number of registered hooks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    /// True when no hooks are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Runs every hook for `event`, stopping at the first failure.
    pub(crate) async fn notify(
        &self,
        event: DigEvent,
        path: &[LevelMeta],
        level: &LevelController,
        error: &HookError,
    ) -> anyhow::Result<()> {
        for hook in &self.hooks {
            match event {
                DigEvent::Ready => hook.on_ready(path, level).await?,
                DigEvent::Done => hook.on_done(path, level).await?,
                DigEvent::Over => hook.on_over(path, level).await?,
                DigEvent::Error => hook.on_error(path, level, error).await?,
            }
        }
        Ok(())
    }
}
