//! Bounded retry for conflicting saves.
//!
//! A save that loses an optimistic revision check returns
//! [`NoteError::Conflict`](crate::error::NoteError::Conflict). The operation
//! passed to [`with_conflict_retry`] is expected to refresh from the latest
//! persisted state on every attempt; this module only decides how many attempts
//! there are and how long to wait between them.

use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::Result;

pub trait RetryPolicy {
    /// Total attempts, including the first.
    fn attempts(&self) -> u32;

    /// Called after failed attempt number `attempt` (1-based), before the next one.
    fn pause(&self, attempt: u32);
}

/// Fixed number of attempts with a fixed sleep in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedDelay {
    attempts: u32,
    delay: Duration,
}

impl FixedDelay {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }
}

impl Default for FixedDelay {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(100))
    }
}

impl RetryPolicy for FixedDelay {
    fn attempts(&self) -> u32 {
        self.attempts
    }

    fn pause(&self, _attempt: u32) {
        thread::sleep(self.delay);
    }
}

/// Same attempt budget, no sleeping. For tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Immediate(pub u32);

impl RetryPolicy for Immediate {
    fn attempts(&self) -> u32 {
        self.0.max(1)
    }

    fn pause(&self, _attempt: u32) {}
}

/// Runs `op` until it succeeds, fails with a non-conflict error, or the policy's
/// attempt budget is spent.
///
/// Returns `Ok(None)` when every attempt conflicted: the operation is abandoned
/// and logged, not escalated.
pub fn with_conflict_retry<T, P, F>(policy: &P, mut op: F) -> Result<Option<T>>
where
    P: RetryPolicy + ?Sized,
    F: FnMut(u32) -> Result<T>,
{
    let attempts = policy.attempts();
    for attempt in 1..=attempts {
        match op(attempt) {
            Ok(value) => return Ok(Some(value)),
            Err(err) if err.is_conflict() => {
                debug!(attempt, attempts, "save conflicted: {}", err);
                if attempt < attempts {
                    policy.pause(attempt);
                }
            }
            Err(err) => return Err(err),
        }
    }
    warn!(attempts, "giving up after repeated save conflicts");
    Ok(None)
}
