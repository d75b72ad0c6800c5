//! Virtual clock and deferred-call queue
//!
//! Time in the simulated runtime is an integer number of seconds that only
//! moves when a test asks it to. `run_in` requests are queued against that
//! clock and handed back by [`Scheduler::advance`] once they are due; the
//! caller invokes them.

use ad_core::{Kwargs, TimerCallback};
use chrono::NaiveTime;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, instrument, trace};

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// A unique identifier for a deferred call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TimerHandle(u64);

/// A queued `run_in` callback
#[derive(Clone)]
pub struct DeferredCall {
    pub handle: TimerHandle,
    pub callback: TimerCallback,
    /// Absolute due time in virtual seconds
    pub due: u64,
    pub kwargs: Kwargs,
}

impl fmt::Debug for DeferredCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredCall")
            .field("handle", &self.handle)
            .field("due", &self.due)
            .field("kwargs", &self.kwargs)
            .finish_non_exhaustive()
    }
}

/// Inspectable view of a pending deferred call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingCall {
    pub handle: TimerHandle,
    pub due: u64,
    pub kwargs: Kwargs,
}

impl From<&DeferredCall> for PendingCall {
    fn from(call: &DeferredCall) -> Self {
        Self {
            handle: call.handle,
            due: call.due,
            kwargs: call.kwargs.clone(),
        }
    }
}

/// Virtual clock with a queue of pending deferred calls
pub struct Scheduler {
    /// Current virtual time in seconds
    now: AtomicU64,
    /// Pending calls in registration order
    pending: Mutex<Vec<DeferredCall>>,
    next_handle: AtomicU64,
}

impl Scheduler {
    /// Create a scheduler with the clock at zero
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Create a scheduler with the clock at `seconds`
    pub fn starting_at(seconds: u64) -> Self {
        Self {
            now: AtomicU64::new(seconds),
            pending: Mutex::new(Vec::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    fn pending_lock(&self) -> MutexGuard<'_, Vec<DeferredCall>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current virtual time in seconds
    pub fn now(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    /// Current virtual time rendered as a time of day past midnight
    pub fn time_of_day(&self) -> NaiveTime {
        let seconds = (self.now() % SECONDS_PER_DAY) as u32;
        NaiveTime::from_num_seconds_from_midnight_opt(seconds, 0).unwrap_or(NaiveTime::MIN)
    }

    /// Set the clock to an absolute value without firing anything
    pub fn set_time(&self, seconds: u64) {
        debug!(seconds, "Setting virtual clock");
        self.now.store(seconds, Ordering::SeqCst);
    }

    /// Queue `callback` to run `delay` seconds from now
    #[instrument(skip(self, callback, kwargs))]
    pub fn run_in(&self, callback: TimerCallback, delay: u64, kwargs: Kwargs) -> TimerHandle {
        let handle = TimerHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        let due = self.now().saturating_add(delay);
        trace!(handle = handle.0, due, "Queueing deferred call");

        self.pending_lock().push(DeferredCall {
            handle,
            callback,
            due,
            kwargs,
        });
        handle
    }

    /// Move the clock forward and take every call that is now due
    ///
    /// Due calls are removed from the queue and returned in registration
    /// order. The queue is filtered as a snapshot under one lock, so calls
    /// queued while the returned ones run are left for a later advance.
    #[instrument(skip(self))]
    pub fn advance(&self, seconds: u64) -> Vec<DeferredCall> {
        let now = match self.now.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |now| {
            Some(now.saturating_add(seconds))
        }) {
            Ok(previous) | Err(previous) => previous.saturating_add(seconds),
        };

        let mut pending = self.pending_lock();
        let snapshot = std::mem::take(&mut *pending);
        let (due, waiting): (Vec<_>, Vec<_>) =
            snapshot.into_iter().partition(|call| call.due <= now);
        *pending = waiting;

        debug!(now, due = due.len(), waiting = pending.len(), "Advanced virtual clock");
        due
    }

    /// Remove a pending call; unknown or already-fired handles are ignored
    pub fn cancel(&self, handle: TimerHandle) -> bool {
        let mut pending = self.pending_lock();
        let before = pending.len();
        pending.retain(|call| call.handle != handle);
        before != pending.len()
    }

    /// Calls still waiting for their due time
    pub fn pending(&self) -> Vec<PendingCall> {
        self.pending_lock().iter().map(PendingCall::from).collect()
    }

    /// Reset the clock to zero and drop every pending call
    pub fn clear(&self) {
        self.pending_lock().clear();
        self.now.store(0, Ordering::SeqCst);
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
