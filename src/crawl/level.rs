//! Level controllers: one node per crawl level, linked into a chain.
//!
//! # State machine
//!
//! ```text
//! STATIC --dig--> RUNNING --returns--> STATIC
//!                    |
//!                interrupt / skip
//!                    v
//!               INTERRUPTED --unwinds--> STATIC
//! ```
//!
//! Transitions use compare-and-swap. The RUNNING state is owned by an RAII
//! guard, so every exit path (including hook errors) restores STATIC.
//! Interruption is cooperative and only observed after `DIG_READY`, after
//! `DIG_DONE`, and after each child branch.

use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use futures_util::future::BoxFuture;
use serde::Serialize;
use tracing::{debug, instrument, warn};

use super::error::{CrawlError, LinkError};
use super::extract::Extractor;
use super::hooks::{DigEvent, HookBus, HookError};
use super::record::Record;
use super::session::Session;

const STATIC: u8 = 0;
const RUNNING: u8 = 1;
const INTERRUPTED: u8 = 2;

/// Run state of a [`LevelController`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LevelStatus {
    /// Idle; a dig may start.
    Static,
    /// A dig is in progress.
    Running,
    /// The current dig should unwind at its next check.
    Interrupted,
}

impl LevelStatus {
    fn from_raw(raw: u8) -> Self {
        match raw {
            RUNNING => Self::Running,
            INTERRUPTED => Self::Interrupted,
            _ => Self::Static,
        }
    }
}

/// How a level's dig ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DigOutcome {
    /// Fetched, extracted, and every child branch visited.
    Completed,
    /// Skipped before fetching (filter rejection or interrupt during `DIG_READY`).
    Skipped,
    /// Fetch or extraction failed; reported through `DIG_ERROR`.
    Failed,
    /// Stopped after fetching because the chain was interrupted.
    Interrupted,
}

/// One entry of the path from the crawl root to the current level.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelMeta {
    /// The request this level fetched.
    pub request: Record,
    /// Records extracted at this level; `None` until extracted or on failure.
    pub records: Option<Vec<Record>>,
    /// Position of `request` among its parent's records.
    pub index: usize,
    /// Filled in by the level once its dig returns.
    pub outcome: Option<DigOutcome>,
}

impl LevelMeta {
    /// Entry for `request` at `index`.
    #[must_use]
    pub fn new(request: Record, index: usize) -> Self {
        Self {
            request,
            records: None,
            index,
            outcome: None,
        }
    }
}

/// A node of the crawl chain, owning the extractor for its level.
pub struct LevelController {
    extractor: Arc<dyn Extractor>,
    hooks: Arc<HookBus>,
    status: AtomicU8,
    depth: AtomicUsize,
    next: OnceLock<Arc<LevelController>>,
    prev: OnceLock<Weak<LevelController>>,
}

impl fmt::Debug for LevelController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LevelController")
            .field("depth", &self.depth())
            .field("status", &self.status())
            .field("has_next", &self.has_next())
            .finish_non_exhaustive()
    }
}

/// Restores STATIC when a dig exits, however it exits.
struct RunGuard<'a> {
    status: &'a AtomicU8,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.status.store(STATIC, Ordering::SeqCst);
    }
}

impl LevelController {
    /// Creates an unlinked, idle controller at depth 1.
    #[must_use]
    pub fn new(extractor: Arc<dyn Extractor>, hooks: Arc<HookBus>) -> Arc<Self> {
        Arc::new(Self {
            extractor,
            hooks,
            status: AtomicU8::new(STATIC),
            depth: AtomicUsize::new(1),
            next: OnceLock::new(),
            prev: OnceLock::new(),
        })
    }

    /// Appends `next` after this node and renumbers the tail.
    ///
    /// # Errors
    ///
    /// - [`LinkError::AlreadyHasPrevious`] if `next` is not a chain head
    /// - [`LinkError::AlreadyHasNext`] if this node already has a successor
    /// - [`LinkError::Cycle`] if this node is reachable from `next`
    pub fn link(self: &Arc<Self>, next: &Arc<Self>) -> Result<(), LinkError> {
        if next.prev.get().is_some() {
            return Err(LinkError::AlreadyHasPrevious {
                depth: next.depth(),
            });
        }
        if self.next.get().is_some() {
            return Err(LinkError::AlreadyHasNext {
                depth: self.depth(),
            });
        }
        let mut cursor = Some(Arc::clone(next));
        while let Some(node) = cursor {
            if Arc::ptr_eq(&node, self) {
                return Err(LinkError::Cycle);
            }
            cursor = node.next.get().cloned();
        }

        next.prev
            .set(Arc::downgrade(self))
            .map_err(|_| LinkError::AlreadyHasPrevious {
                depth: next.depth(),
            })?;
        self.next
            .set(Arc::clone(next))
            .map_err(|_| LinkError::AlreadyHasNext {
                depth: self.depth(),
            })?;
        next.set_depth(self.depth() + 1);
        Ok(())
    }

    fn set_depth(&self, depth: usize) {
        self.depth.store(depth, Ordering::SeqCst);
        if let Some(next) = self.next.get() {
            next.set_depth(depth + 1);
        }
    }

    /// 1-based position in the chain.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    /// Current run state.
    #[must_use]
    pub fn status(&self) -> LevelStatus {
        LevelStatus::from_raw(self.status.load(Ordering::SeqCst))
    }

    /// True when a successor is linked.
    #[must_use]
    pub fn has_next(&self) -> bool {
        self.next.get().is_some()
    }

    /// The successor, if linked.
    #[must_use]
    pub fn next(&self) -> Option<&Arc<LevelController>> {
        self.next.get()
    }

    /// The predecessor, if linked and still alive.
    #[must_use]
    pub fn prev(&self) -> Option<Arc<LevelController>> {
        self.prev.get().and_then(Weak::upgrade)
    }

    /// True when this node has been asked to stop.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.status.load(Ordering::SeqCst) == INTERRUPTED
    }

    /// Stops only this node's current dig; siblings continue.
    pub fn skip(&self) {
        self.status.store(INTERRUPTED, Ordering::SeqCst);
    }

    /// Stops the whole chain: this node and every node before and after it.
    pub fn interrupt(&self) {
        self.skip();
        let mut cursor = self.next.get().cloned();
        while let Some(node) = cursor {
            node.skip();
            cursor = node.next.get().cloned();
        }
        let mut cursor = self.prev();
        while let Some(node) = cursor {
            node.skip();
            cursor = node.prev();
        }
        debug!(depth = self.depth(), "chain interrupted");
    }

    /// Clears interrupt flags left on idle nodes of the whole chain.
    pub fn reset_chain(&self) {
        match self.head() {
            Some(head) => head.reset_forward(),
            None => self.reset_forward(),
        }
    }

    /// First node of the chain, or `None` when this node is the head.
    fn head(&self) -> Option<Arc<LevelController>> {
        let mut head = self.prev()?;
        while let Some(prev) = head.prev() {
            head = prev;
        }
        Some(head)
    }

    fn reset_forward(&self) {
        let _ = self
            .status
            .compare_exchange(INTERRUPTED, STATIC, Ordering::SeqCst, Ordering::SeqCst);
        if let Some(next) = self.next.get() {
            next.reset_forward();
        }
    }

    /// Digs `request` with this node as the crawl root.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError::Hook`] when a hook failure could not be absorbed
    /// by `DIG_ERROR`. Fetch and extraction errors are reported through hooks,
    /// not returned.
    #[instrument(level = "debug", skip_all, fields(url = request.url().unwrap_or_default()))]
    pub async fn dig(&self, session: Session, request: Record) -> Result<DigOutcome, CrawlError> {
        let mut path = vec![LevelMeta::new(request, 0)];
        self.dig_level(session, &mut path).await
    }

    fn dig_level<'a>(
        &'a self,
        mut session: Session,
        path: &'a mut Vec<LevelMeta>,
    ) -> BoxFuture<'a, Result<DigOutcome, CrawlError>> {
        Box::pin(async move {
            if let Err(current) =
                self.status
                    .compare_exchange(STATIC, RUNNING, Ordering::SeqCst, Ordering::SeqCst)
            {
                if current == INTERRUPTED {
                    self.status.store(STATIC, Ordering::SeqCst);
                    debug!(depth = self.depth(), "consumed stale interrupt");
                    return Ok(DigOutcome::Interrupted);
                }
                debug!(depth = self.depth(), "dig already running");
                return Ok(DigOutcome::Skipped);
            }
            let _running = RunGuard {
                status: &self.status,
            };

            self.notify(DigEvent::Ready, path, None).await?;
            if self.is_interrupted() {
                debug!(depth = self.depth(), "level skipped");
                return Ok(DigOutcome::Skipped);
            }

            let request = path
                .last()
                .map(|meta| meta.request.clone())
                .unwrap_or_default();
            let mut outcome = DigOutcome::Completed;
            let records = match session.dig(&request, self.extractor.as_ref()).await {
                Ok(records) => Some(records),
                Err(error) => {
                    warn!(depth = self.depth(), url = request.url().unwrap_or_default(), error = %error, "dig failed");
                    outcome = DigOutcome::Failed;
                    self.notify(DigEvent::Error, path, Some(error.into())).await?;
                    None
                }
            };
            if let Some(current) = path.last_mut() {
                current.records.clone_from(&records);
            }

            self.notify(DigEvent::Done, path, None).await?;
            if self.is_interrupted() {
                return Ok(DigOutcome::Interrupted);
            }

            if let (Some(next), Some(records)) = (self.next.get(), records) {
                for (index, record) in records.into_iter().enumerate() {
                    path.push(LevelMeta::new(record, index));
                    let child = match next.dig_level(session.fork(), path).await {
                        Ok(child) => child,
                        Err(error) => {
                            path.pop();
                            return Err(error);
                        }
                    };
                    if let Some(entry) = path.last_mut() {
                        entry.outcome = Some(child);
                    }
                    let over = self.notify(DigEvent::Over, path, None).await;
                    path.pop();
                    over?;
                    if self.is_interrupted() {
                        return Ok(DigOutcome::Interrupted);
                    }
                }
            }
            Ok(outcome)
        })
    }

    /// Notifies the bus, escalating failures to `DIG_ERROR`.
    async fn notify(
        &self,
        event: DigEvent,
        path: &[LevelMeta],
        error: Option<anyhow::Error>,
    ) -> Result<(), CrawlError> {
        let info = HookError { event, error };
        let Err(failure) = self.hooks.notify(event, path, self, &info).await else {
            return Ok(());
        };
        if event == DigEvent::Error {
            return Err(CrawlError::hook(event, failure));
        }

        warn!(event = %event, error = %failure, "hook failed; escalating to DIG_ERROR");
        let escalated = HookError {
            event,
            error: Some(failure),
        };
        if let Err(second) = self
            .hooks
            .notify(DigEvent::Error, path, self, &escalated)
            .await
        {
            self.interrupt();
            return Err(CrawlError::hook(DigEvent::Error, second));
        }
        Ok(())
    }
}
