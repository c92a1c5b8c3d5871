//! Wait timings and deadline tracking
//!
//! The poller sleeps `poll_interval` between queries and gives up once the
//! optional overall deadline passes. Sleeps are truncated so that the last
//! query happens no later than the deadline.

use std::time::{Duration, Instant};

/// Upper bound for a single poll interval
pub const MAX_POLL_INTERVAL_SECONDS: u64 = 3600;

/// Poll timing configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitTimings {
    /// Time between status queries (default: 5)
    pub poll_interval_seconds: u64,

    /// Overall limit on waiting; `None` waits indefinitely
    pub deadline_seconds: Option<u64>,
}

impl Default for WaitTimings {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 5,
            deadline_seconds: None,
        }
    }
}

impl WaitTimings {
    pub fn validate(&self) -> Result<(), TimeoutValidationError> {
        if self.poll_interval_seconds == 0 || self.poll_interval_seconds > MAX_POLL_INTERVAL_SECONDS {
            return Err(TimeoutValidationError::PollIntervalOutOfBounds {
                value: self.poll_interval_seconds,
            });
        }

        if let Some(deadline) = self.deadline_seconds {
            if deadline < self.poll_interval_seconds {
                return Err(TimeoutValidationError::DeadlineTooShort {
                    value: deadline,
                    min: self.poll_interval_seconds,
                });
            }
        }

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn deadline(&self) -> Deadline {
        Deadline::new(self.deadline_seconds.map(Duration::from_secs))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TimeoutValidationError {
    #[error("poll_interval_seconds must be in (0, 3600], got {value}")]
    PollIntervalOutOfBounds { value: u64 },

    #[error("deadline_seconds must be at least the poll interval ({min}), got {value}")]
    DeadlineTooShort { value: u64, min: u64 },
}

/// Wall-clock budget started at construction
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

    /// A deadline that never expires
    pub fn unbounded() -> Self {
        Self::new(None)
    }

    pub fn after(limit: Duration) -> Self {
        Self::new(Some(limit))
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Time left, or `None` when unbounded
    pub fn remaining(&self) -> Option<Duration> {
        self.limit.map(|limit| limit.saturating_sub(self.elapsed()))
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().map(|r| r.is_zero()).unwrap_or(false)
    }

    /// Shorten a planned sleep so it ends no later than the deadline
    pub fn truncate(&self, sleep: Duration) -> Duration {
        match self.remaining() {
            Some(remaining) => sleep.min(remaining),
            None => sleep,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_default_timings_valid() {
        let timings = WaitTimings::default();
        assert_eq!(timings.poll_interval_seconds, 5);
        assert!(timings.validate().is_ok());
    }

    #[test]
    fn test_poll_interval_bounds() {
        for bad in [0, 3601] {
            let timings = WaitTimings {
                poll_interval_seconds: bad,
                deadline_seconds: None,
            };
            assert!(matches!(
                timings.validate(),
                Err(TimeoutValidationError::PollIntervalOutOfBounds { .. })
            ));
        }
    }

    #[test]
    fn test_deadline_shorter_than_interval() {
        let timings = WaitTimings {
            poll_interval_seconds: 10,
            deadline_seconds: Some(5),
        };
        assert!(matches!(
            timings.validate(),
            Err(TimeoutValidationError::DeadlineTooShort { value: 5, min: 10 })
        ));
    }

    #[test]
    fn test_unbounded_never_expires() {
        let deadline = Deadline::unbounded();
        assert!(!deadline.is_expired());
        assert_eq!(deadline.remaining(), None);
        assert_eq!(deadline.truncate(Duration::from_secs(9)), Duration::from_secs(9));
    }

    #[test]
    fn test_deadline_expires() {
        let deadline = Deadline::after(Duration::from_millis(50));
        assert!(!deadline.is_expired());
        sleep(Duration::from_millis(80));
        assert!(deadline.is_expired());
        assert_eq!(deadline.truncate(Duration::from_secs(1)), Duration::ZERO);
    }

    #[test]
    fn test_truncate_to_remaining() {
        let deadline = Deadline::after(Duration::from_secs(2));
        assert!(deadline.truncate(Duration::from_secs(60)) <= Duration::from_secs(2));
    }
}
