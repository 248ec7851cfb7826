//! Timeout enforcement for tracking tasks
//!
//! - `poll_interval`: fixed wait between polls of an unfinished operation
//! - `overall`: maximum wall-clock time a tracker may spend on one job
//!
//! The deadline never cancels anything itself. The tracker checks it before
//! each poll and fails the job once it has passed.

use std::time::{Duration, Instant};

/// Timeout configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// Wait between polls (default: 3s)
    pub poll_interval: Duration,

    /// Maximum tracking time per job (default: 1800s, None = unbounded)
    pub overall: Option<Duration>,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            overall: Some(Duration::from_secs(1800)),
        }
    }
}

impl TimeoutConfig {
    pub fn validate(&self) -> Result<(), TimeoutValidationError> {
        // poll_interval must be in (0, 300s]
        if self.poll_interval.is_zero() || self.poll_interval > Duration::from_secs(300) {
            return Err(TimeoutValidationError::PollIntervalOutOfBounds {
                value_ms: self.poll_interval.as_millis() as u64,
            });
        }

        // overall must be in [poll_interval, 86400s]
        if let Some(overall) = self.overall {
            if overall < self.poll_interval || overall > Duration::from_secs(86400) {
                return Err(TimeoutValidationError::OverallOutOfBounds {
                    value: overall.as_secs(),
                });
            }
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TimeoutValidationError {
    #[error("poll interval must be in (0, 300s], got {value_ms}ms")]
    PollIntervalOutOfBounds { value_ms: u64 },

    #[error("overall timeout must be between the poll interval and 86400s, got {value}s")]
    OverallOutOfBounds { value: u64 },
}

/// Overall deadline for one tracking run
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    limit: Option<Duration>,
}

impl Deadline {
    pub fn new(limit: Option<Duration>) -> Self {
        Self {
            start: Instant::now(),
            limit,
        }
    }

    pub fn unbounded() -> Self {
        Self::new(None)
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn expired(&self) -> bool {
        match self.limit {
            Some(limit) => self.elapsed() >= limit,
            None => false,
        }
    }

    /// Time left before the deadline (None = unbounded)
    pub fn remaining(&self) -> Option<Duration> {
        self.limit.map(|limit| limit.saturating_sub(self.elapsed()))
    }

    /// How long to wait before the next poll: the interval, cut short by the deadline
    pub fn next_wait(&self, interval: Duration) -> Duration {
        match self.remaining() {
            Some(remaining) => interval.min(remaining),
            None => interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let config = TimeoutConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(3));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_poll_interval_invalid() {
        let config = TimeoutConfig {
            poll_interval: Duration::ZERO,
            ..TimeoutConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(TimeoutValidationError::PollIntervalOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_overall_shorter_than_interval_invalid() {
        let config = TimeoutConfig {
            poll_interval: Duration::from_secs(10),
            overall: Some(Duration::from_secs(5)),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unbounded_deadline_never_expires() {
        let deadline = Deadline::unbounded();
        assert!(!deadline.expired());
        assert_eq!(deadline.remaining(), None);
        assert_eq!(deadline.next_wait(Duration::from_secs(3)), Duration::from_secs(3));
    }

    #[test]
    fn test_zero_deadline_expired() {
        let deadline = Deadline::new(Some(Duration::ZERO));
        assert!(deadline.expired());
        assert_eq!(deadline.next_wait(Duration::from_secs(3)), Duration::ZERO);
    }

    #[test]
    fn test_next_wait_capped_by_remaining() {
        let deadline = Deadline::new(Some(Duration::from_secs(1)));
        assert!(deadline.next_wait(Duration::from_secs(3)) <= Duration::from_secs(1));
    }
}
