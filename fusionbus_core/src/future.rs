//! Single-result future carrying a request's reply back to its sender.
//!
//! A [`ReplyFuture`] is a cloneable handle to a write-once slot:
//!
//! ```text
//!            resolve(v)
//!  Pending ─────────────► Resolved(v)
//!     │
//!     └────────────────► Cancelled
//!            cancel()
//! ```
//!
//! Exactly one transition ever happens. Later `resolve`/`cancel` calls are
//! ignored and report `false`. Readers may wait from any number of threads,
//! before or after settlement.

use crate::error::ReplyError;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug)]
enum SlotState<T> {
    Pending,
    Resolved(T),
    Cancelled,
}

#[derive(Debug)]
struct Slot<T> {
    state: Mutex<SlotState<T>>,
    settled: Condvar,
}

/// Write-once, read-many asynchronous value.
pub struct ReplyFuture<T> {
    slot: Arc<Slot<T>>,
}

impl<T: Clone> ReplyFuture<T> {
    /// Creates an unresolved future.
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Slot {
                state: Mutex::new(SlotState::Pending),
                settled: Condvar::new(),
            }),
        }
    }

    /// Stores `value` and wakes every waiter.
    ///
    /// Returns `false` without touching the stored value if the future was
    /// already resolved or cancelled.
    pub fn resolve(&self, value: T) -> bool {
        self.settle(SlotState::Resolved(value))
    }

    /// Marks the future as cancelled and wakes every waiter.
    ///
    /// Returns `false` if the future was already settled.
    pub fn cancel(&self) -> bool {
        self.settle(SlotState::Cancelled)
    }

    fn settle(&self, outcome: SlotState<T>) -> bool {
        let mut state = self.slot.state.lock();
        if !matches!(*state, SlotState::Pending) {
            return false;
        }
        *state = outcome;
        drop(state);
        self.slot.settled.notify_all();
        true
    }

    /// Returns true once the future is resolved or cancelled.
    pub fn is_done(&self) -> bool {
        !matches!(*self.slot.state.lock(), SlotState::Pending)
    }

    /// Returns the value if already resolved, without blocking.
    pub fn try_get(&self) -> Option<T> {
        match &*self.slot.state.lock() {
            SlotState::Resolved(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// Blocks until the future settles.
    pub fn get(&self) -> Result<T, ReplyError> {
        let mut state = self.slot.state.lock();
        while matches!(*state, SlotState::Pending) {
            self.slot.settled.wait(&mut state);
        }
        Self::outcome(&state, Duration::ZERO)
    }

    /// Blocks until the future settles or `timeout` elapses.
    pub fn get_timeout(&self, timeout: Duration) -> Result<T, ReplyError> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return self.get();
        };

        let mut state = self.slot.state.lock();
        while matches!(*state, SlotState::Pending) {
            if self.slot.settled.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        Self::outcome(&state, timeout)
    }

    fn outcome(state: &SlotState<T>, waited: Duration) -> Result<T, ReplyError> {
        match state {
            SlotState::Resolved(value) => Ok(value.clone()),
            SlotState::Cancelled => Err(ReplyError::Cancelled),
            SlotState::Pending => Err(ReplyError::Timeout(waited)),
        }
    }
}

impl<T: Clone> Default for ReplyFuture<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for ReplyFuture<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for ReplyFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplyFuture")
            .field("state", &*self.slot.state.lock())
            .finish()
    }
}
