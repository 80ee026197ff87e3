//! Cancellable waits.
//!
//! Every sleep in the fabric (the broker's accept poll, a session's poll
//! interval and dead-peer backoff, consumer idle waits, the telemetry
//! interval) goes through a [`Pacer`], so one `cancel` stops them all and
//! tests can swap in a clock that never sleeps.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

/// A source of cancellable timed waits.
pub trait Pacer: Send + Sync {
    /// Wait up to `duration`. Returns `false` if the pacer was cancelled,
    /// before or during the wait.
    fn pause(&self, duration: Duration) -> bool;

    /// Cancel the current and every future wait.
    fn cancel(&self);

    fn is_cancelled(&self) -> bool;
}

/// Real-time pacer backed by a condition variable.
#[derive(Debug, Default)]
pub struct SignalPacer {
    cancelled: Mutex<bool>,
    signal: Condvar,
}

impl SignalPacer {
    /// Create a new, uncancelled pacer.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Pacer for SignalPacer {
    fn pause(&self, duration: Duration) -> bool {
        let cancelled = self.cancelled.lock().unwrap_or_else(PoisonError::into_inner);
        let (cancelled, _) = self
            .signal
            .wait_timeout_while(cancelled, duration, |cancelled| !*cancelled)
            .unwrap_or_else(PoisonError::into_inner);
        !*cancelled
    }

    fn cancel(&self) {
        *self.cancelled.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.signal.notify_all();
    }

    fn is_cancelled(&self) -> bool {
        *self.cancelled.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Pacer that never sleeps. Counts pauses and can cancel itself after a
/// fixed number of them.
#[derive(Debug, Default)]
pub struct InstantPacer {
    pauses: AtomicU64,
    limit: Option<u64>,
    cancelled: AtomicBool,
}

impl InstantPacer {
    /// Create a new pacer with no pause limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pacer that cancels itself on pause number `limit + 1`.
    pub fn with_limit(limit: u64) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    /// Number of pauses requested so far.
    pub fn pauses(&self) -> u64 {
        self.pauses.load(Ordering::Acquire)
    }
}

impl Pacer for InstantPacer {
    fn pause(&self, _duration: Duration) -> bool {
        let count = self.pauses.fetch_add(1, Ordering::AcqRel) + 1;
        if self.limit.is_some_and(|limit| count > limit) {
            self.cancel();
        }
        !self.is_cancelled()
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}
