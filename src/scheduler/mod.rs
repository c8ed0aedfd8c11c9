//! Admission-controlled task scheduler.
//!
//! A [`Scheduler`] separates *admission* from *concurrency*: a bounded waiting
//! queue accepts work (callers get [`SchedulerError::Capacity`] when it is
//! full and are expected to retry), while a smaller in-flight bound limits how
//! many tasks execute at once. A fixed-interval poll loop moves tasks from the
//! queue to the in-flight set.
//!
//! # Concurrency Model
//!
//! - The poll loop runs in its own Tokio task and only holds a weak reference
//!   to the scheduler, so dropping every handle ends it
//! - Each dispatched task runs in its own Tokio task
//! - An in-flight slot is released exactly once when the executor's future
//!   resolves (RAII, so a panicking executor still frees its slot)
//! - Bookkeeping sits behind a `std::sync::Mutex` that is never held across
//!   an `.await`; listeners are called after the lock is released
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use harvester_core::scheduler::{Scheduler, SchedulerOptions};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let options = SchedulerOptions::new(10, 2, Duration::from_millis(100))?;
//! let scheduler = Scheduler::new(options);
//! scheduler.submit("https://example.com/a.pdf".to_string())?;
//! scheduler.start(|url: String| async move {
//!     println!("working on {url}");
//!     url
//! })?;
//! scheduler.idle().await;
//! scheduler.stop();
//! # Ok(())
//! # }
//! ```

mod error;

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, instrument, warn};

pub use error::SchedulerError;

/// Default total capacity (waiting + in flight).
pub const DEFAULT_MAX: usize = 3;

/// Default in-flight bound.
pub const DEFAULT_DOING_MAX: usize = 2;

/// Default poll interval.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(1000);

/// Validated scheduler bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerOptions {
    max: usize,
    doing_max: usize,
    interval: Duration,
}

impl SchedulerOptions {
    /// Creates scheduler options.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Config`] if any value is zero or if
    /// `doing_max > max`.
    pub fn new(max: usize, doing_max: usize, interval: Duration) -> Result<Self, SchedulerError> {
        if max == 0 {
            return Err(SchedulerError::config("max must be greater than 0"));
        }
        if doing_max == 0 {
            return Err(SchedulerError::config("doing_max must be greater than 0"));
        }
        if interval.is_zero() {
            return Err(SchedulerError::config("interval must be greater than 0"));
        }
        if doing_max > max {
            return Err(SchedulerError::config(format!(
                "doing_max {doing_max} exceeds max {max}"
            )));
        }
        Ok(Self {
            max,
            doing_max,
            interval,
        })
    }

    /// Total capacity: waiting plus in flight.
    #[must_use]
    pub fn max(&self) -> usize {
        self.max
    }

    /// Maximum number of tasks executing at once.
    #[must_use]
    pub fn doing_max(&self) -> usize {
        self.doing_max
    }

    /// Poll interval.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            max: DEFAULT_MAX,
            doing_max: DEFAULT_DOING_MAX,
            interval: DEFAULT_INTERVAL,
        }
    }
}

/// Scheduler lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchedulerEvent {
    /// A task finished executing.
    End,
    /// The waiting queue and the in-flight set are both empty.
    Finish,
}

impl SchedulerEvent {
    /// Event name as used in logs and persisted state.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::End => "END",
            Self::Finish => "FINISH",
        }
    }
}

impl fmt::Display for SchedulerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives scheduler events.
///
/// Callbacks run on the Tokio task that finished the work, outside of the
/// scheduler's lock, so they may call back into the scheduler.
pub trait SchedulerListener<T>: Send + Sync {
    /// Called once per task after its slot has been released.
    fn on_end(&self, _task: &T) {}

    /// Called when a release leaves both queues empty.
    fn on_finish(&self) {}
}

/// Bounded waiting queue plus bounded in-flight set, drained by a poll loop.
pub struct Scheduler<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    options: SchedulerOptions,
    state: Mutex<State<T>>,
    listener: Option<Arc<dyn SchedulerListener<T>>>,
    idle: Notify,
}

struct State<T> {
    waiting: VecDeque<T>,
    in_flight: usize,
    poller: Option<JoinHandle<()>>,
}

impl<T> Clone for Scheduler<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Scheduler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("Scheduler")
            .field("options", &self.inner.options)
            .field("waiting", &state.waiting.len())
            .field("in_flight", &state.in_flight)
            .field("running", &state.poller.is_some())
            .finish()
    }
}

impl<T: Send + 'static> Scheduler<T> {
    /// Creates a stopped scheduler without a listener.
    #[must_use]
    pub fn new(options: SchedulerOptions) -> Self {
        Self::build(options, None)
    }

    /// Creates a stopped scheduler that reports `END`/`FINISH` to `listener`.
    #[must_use]
    pub fn with_listener(options: SchedulerOptions, listener: Arc<dyn SchedulerListener<T>>) -> Self {
        Self::build(options, Some(listener))
    }

    fn build(options: SchedulerOptions, listener: Option<Arc<dyn SchedulerListener<T>>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                options,
                state: Mutex::new(State {
                    waiting: VecDeque::new(),
                    in_flight: 0,
                    poller: None,
                }),
                listener,
                idle: Notify::new(),
            }),
        }
    }

    /// Returns the configured bounds.
    #[must_use]
    pub fn options(&self) -> SchedulerOptions {
        self.inner.options
    }

    /// Appends a task to the waiting queue.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Capacity`] if
    /// `waiting >= max - in_flight`. The task is dropped; callers that want
    /// to retry should keep their own copy.
    pub fn submit(&self, task: T) -> Result<(), SchedulerError> {
        let mut state = self.inner.lock();
        let max = self.inner.options.max;
        if state.waiting.len() >= max.saturating_sub(state.in_flight) {
            return Err(SchedulerError::Capacity {
                waiting: state.waiting.len(),
                in_flight: state.in_flight,
                max,
            });
        }
        state.waiting.push_back(task);
        debug!(
            waiting = state.waiting.len(),
            in_flight = state.in_flight,
            "task submitted"
        );
        Ok(())
    }

    /// Starts the poll loop.
    ///
    /// Every interval, while tasks are waiting and fewer than `doing_max` are
    /// in flight, the oldest waiting task is handed to `executor`. The
    /// executor's future resolves to the (possibly updated) task, which is
    /// then reported through [`SchedulerListener::on_end`].
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::AlreadyStarted`] if the loop is running.
    #[instrument(level = "debug", skip(self, executor), fields(max = self.inner.options.max, doing_max = self.inner.options.doing_max))]
    pub fn start<E, Fut>(&self, executor: E) -> Result<(), SchedulerError>
    where
        E: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let mut state = self.inner.lock();
        if state.poller.is_some() {
            return Err(SchedulerError::AlreadyStarted);
        }
        let inner = Arc::downgrade(&self.inner);
        state.poller = Some(tokio::spawn(poll_loop(inner, Arc::new(executor))));
        debug!("scheduler started");
        Ok(())
    }

    /// Stops polling. Tasks already in flight run to completion.
    pub fn stop(&self) {
        if let Some(poller) = self.inner.lock().poller.take() {
            poller.abort();
            debug!("scheduler stopped");
        }
    }

    /// Returns true when the poll loop is not running.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.inner.lock().poller.is_none()
    }

    /// Number of tasks waiting to be dispatched.
    #[must_use]
    pub fn waiting_count(&self) -> usize {
        self.inner.lock().waiting.len()
    }

    /// Number of tasks currently executing.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.inner.lock().in_flight
    }

    /// True iff another [`submit`](Self::submit) would currently succeed.
    #[must_use]
    pub fn is_accepting_more(&self) -> bool {
        let state = self.inner.lock();
        state.waiting.len() < self.inner.options.max.saturating_sub(state.in_flight)
    }

    /// True when nothing is waiting or in flight.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        let state = self.inner.lock();
        state.waiting.is_empty() && state.in_flight == 0
    }

    /// Waits until nothing is waiting or in flight.
    ///
    /// Returns immediately if the scheduler is already idle. Waiting tasks
    /// only drain while the scheduler is started.
    pub async fn idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }
}

impl<T> Inner<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves as many waiting tasks as the in-flight bound allows.
    fn admit(&self) -> Vec<T> {
        let mut state = self.lock();
        let mut admitted = Vec::new();
        while state.in_flight < self.options.doing_max {
            let Some(task) = state.waiting.pop_front() else {
                break;
            };
            state.in_flight += 1;
            admitted.push(task);
        }
        admitted
    }

    fn release(&self, task: Option<T>) {
        let finished = {
            let mut state = self.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
            state.waiting.is_empty() && state.in_flight == 0
        };

        if let Some(listener) = &self.listener {
            if let Some(task) = &task {
                listener.on_end(task);
            }
            if finished {
                listener.on_finish();
            }
        }
        if finished {
            debug!("scheduler drained");
            self.idle.notify_waiters();
        }
    }
}

/// In-flight slot; released exactly once, on completion or on drop.
struct InFlightSlot<T> {
    inner: Arc<Inner<T>>,
    released: bool,
}

impl<T> InFlightSlot<T> {
    fn new(inner: Arc<Inner<T>>) -> Self {
        Self {
            inner,
            released: false,
        }
    }

    fn complete(mut self, task: T) {
        self.released = true;
        self.inner.release(Some(task));
    }
}

impl<T> Drop for InFlightSlot<T> {
    fn drop(&mut self) {
        if !self.released {
            warn!("task executor ended without completing; releasing its slot");
            self.inner.release(None);
        }
    }
}

async fn poll_loop<T, E, Fut>(inner: Weak<Inner<T>>, executor: Arc<E>)
where
    T: Send + 'static,
    E: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = T> + Send + 'static,
{
    let Some(period) = inner.upgrade().map(|inner| inner.options.interval) else {
        return;
    };
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        for task in inner.admit() {
            let slot = InFlightSlot::new(Arc::clone(&inner));
            let executor = Arc::clone(&executor);
            tokio::spawn(async move {
                let task = executor(task).await;
                slot.complete(task);
            });
        }
    }
}
