//! Cancellation support for tracking tasks
//!
//! A `CancelToken` is shared between the supervisor and one tracker. The
//! tracker checks it before every poll and sleeps on it between polls, so a
//! cancel request wakes the tracker immediately instead of after the poll
//! interval.
//!
//! Cancel reasons:
//! - Operator: explicit cancel of one job
//! - Shutdown: supervisor shutdown (SIGINT/SIGTERM or end of process)

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Why a tracker was asked to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancelReason {
    Operator,
    Shutdown,
}

#[derive(Debug, Default)]
struct Inner {
    reason: Mutex<Option<CancelReason>>,
    wake: Condvar,
}

/// Cloneable cancellation signal with an interruptible sleep
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. The first reason wins.
    pub fn cancel(&self, reason: CancelReason) {
        let mut guard = match self.inner.reason.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.is_none() {
            *guard = Some(reason);
        }
        self.inner.wake.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.reason().is_some()
    }

    pub fn reason(&self) -> Option<CancelReason> {
        match self.inner.reason.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Sleep for `duration` unless cancelled first.
    ///
    /// Returns the cancel reason if the sleep was interrupted (or the token
    /// was already cancelled), `None` if the full duration elapsed.
    pub fn sleep(&self, duration: Duration) -> Option<CancelReason> {
        let deadline = Instant::now() + duration;
        let mut guard = match self.inner.reason.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        loop {
            if let Some(reason) = *guard {
                return Some(reason);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            guard = match self.inner.wake.wait_timeout(guard, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }
}
