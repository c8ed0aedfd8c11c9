//! Error types for the scheduler module.

use thiserror::Error;

/// Errors returned by [`Scheduler`](super::Scheduler) operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// Scheduler bounds are invalid (zero values or `doing_max > max`).
    #[error("invalid scheduler options: {reason}")]
    Config {
        /// Which constraint was violated.
        reason: String,
    },

    /// The waiting queue cannot admit another task right now.
    ///
    /// Recoverable: the caller should retry the submission later.
    #[error("scheduler at capacity: {waiting} waiting + {in_flight} in flight (max {max})")]
    Capacity {
        /// Tasks waiting when the submission was rejected.
        waiting: usize,
        /// Tasks in flight when the submission was rejected.
        in_flight: usize,
        /// Configured total capacity.
        max: usize,
    },

    /// `start` was called on a scheduler whose poll loop is already running.
    #[error("scheduler already started")]
    AlreadyStarted,
}

impl SchedulerError {
    /// Creates a configuration error.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Returns true for the recoverable capacity error.
    #[must_use]
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::Capacity { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_error_capacity_display() {
        let error = SchedulerError::Capacity {
            waiting: 2,
            in_flight: 1,
            max: 3,
        };
        let msg = error.to_string();
        assert!(msg.contains("2 waiting"), "Expected waiting count in: {msg}");
        assert!(msg.contains("1 in flight"), "Expected in-flight count in: {msg}");
        assert!(msg.contains("max 3"), "Expected max in: {msg}");
        assert!(error.is_capacity());
    }

    #[test]
    fn test_scheduler_error_config_display() {
        let error = SchedulerError::config("doing_max 4 exceeds max 3");
        assert!(error.to_string().contains("doing_max 4 exceeds max 3"));
        assert!(!error.is_capacity());
    }
}
