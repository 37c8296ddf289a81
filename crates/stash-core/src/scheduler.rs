#![forbid(unsafe_code)]

//! Cooperative, thread-local timer queue.
//!
//! Stash never spawns threads. Deferred work (store teardown after the last
//! subscriber leaves) is queued here and runs only when the host calls
//! [`run_due`] or [`advance`] on the same thread, typically once per turn of
//! its event loop.
//!
//! # Clock
//!
//! | Source   | `now()`                        | `advance()`        |
//! |----------|--------------------------------|--------------------|
//! | System   | `web_time::Instant::now()`     | `ClockNotManual`   |
//! | Manual   | frozen until advanced          | moves time forward |
//!
//! Tests switch to [`ClockSource::Manual`] so delays are crossed
//! deterministically.
//!
//! # Invariants
//!
//! 1. Timers fire in deadline order; equal deadlines fire in scheduling order.
//! 2. A cancelled timer never fires. Cancelling twice returns `false` the
//!    second time.
//! 3. No scheduler borrow is held while a callback runs, so callbacks may
//!    schedule or cancel timers, and a panicking callback leaves the queue
//!    consistent (the panicking timer is already removed).
//! 4. Callbacks are dropped outside the scheduler borrow, so a callback whose
//!    captures schedule work on drop cannot re-enter a held borrow.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use tracing::trace;
pub use web_time::Instant;

use crate::error::StashError;

type TimerCallback = Box<dyn FnOnce()>;

/// Which clock drives deadlines on this thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClockSource {
    /// Wall-clock monotonic time.
    #[default]
    System,
    /// Virtual time that only moves through [`advance`].
    Manual,
}

/// Token for a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle {
    id: u64,
}

impl TimerHandle {
    /// Numeric id, unique per thread.
    #[must_use]
    pub const fn id(self) -> u64 {
        self.id
    }
}

#[derive(Debug, Clone, Copy)]
enum ClockState {
    System,
    Manual(Instant),
}

struct SchedulerState {
    clock: ClockState,
    timers: BTreeMap<(Instant, u64), TimerCallback>,
    deadlines: HashMap<u64, Instant>,
    next_id: u64,
}

impl SchedulerState {
    fn new() -> Self {
        Self {
            clock: ClockState::System,
            timers: BTreeMap::new(),
            deadlines: HashMap::new(),
            next_id: 1,
        }
    }

    fn now(&self) -> Instant {
        match self.clock {
            ClockState::System => Instant::now(),
            ClockState::Manual(t) => t,
        }
    }

    fn pop_due(&mut self) -> Option<(u64, TimerCallback)> {
        let now = self.now();
        let (&(deadline, id), _) = self.timers.first_key_value()?;
        if deadline > now {
            return None;
        }
        let callback = self.timers.remove(&(deadline, id))?;
        self.deadlines.remove(&id);
        Some((id, callback))
    }
}

thread_local! {
    static SCHEDULER: RefCell<SchedulerState> = RefCell::new(SchedulerState::new());
}

fn with_state<R>(f: impl FnOnce(&mut SchedulerState) -> R) -> R {
    SCHEDULER.with(|s| f(&mut s.borrow_mut()))
}

/// Current time on this thread's clock.
#[must_use]
pub fn now() -> Instant {
    with_state(|s| s.now())
}

/// The active clock source.
#[must_use]
pub fn clock() -> ClockSource {
    with_state(|s| match s.clock {
        ClockState::System => ClockSource::System,
        ClockState::Manual(_) => ClockSource::Manual,
    })
}

/// Switch clocks. A manual clock starts at the current instant.
///
/// Pending deadlines are kept as absolute instants and are compared against
/// the new clock from here on.
pub fn set_clock(source: ClockSource) {
    with_state(|s| {
        s.clock = match (source, s.clock) {
            (ClockSource::System, _) => ClockState::System,
            (ClockSource::Manual, ClockState::Manual(t)) => ClockState::Manual(t),
            (ClockSource::Manual, ClockState::System) => ClockState::Manual(Instant::now()),
        };
    });
}

/// Queue `callback` to run once `delay` has elapsed.
pub fn schedule(delay: Duration, callback: impl FnOnce() + 'static) -> TimerHandle {
    with_state(|s| {
        let id = s.next_id;
        s.next_id += 1;
        let deadline = s.now() + delay;
        s.timers.insert((deadline, id), Box::new(callback));
        s.deadlines.insert(id, deadline);
        trace!(timer = id, ?delay, "timer scheduled");
        TimerHandle { id }
    })
}

/// Cancel a pending timer. Returns `false` if it already fired or was
/// cancelled.
pub fn cancel(handle: TimerHandle) -> bool {
    let removed = with_state(|s| {
        let deadline = s.deadlines.remove(&handle.id)?;
        s.timers.remove(&(deadline, handle.id))
    });
    match removed {
        Some(callback) => {
            trace!(timer = handle.id, "timer cancelled");
            drop(callback);
            true
        }
        None => false,
    }
}

/// Whether the timer is still queued.
#[must_use]
pub fn is_pending(handle: TimerHandle) -> bool {
    with_state(|s| s.deadlines.contains_key(&handle.id))
}

/// Deadline of a queued timer.
#[must_use]
pub fn deadline(handle: TimerHandle) -> Option<Instant> {
    with_state(|s| s.deadlines.get(&handle.id).copied())
}

/// Whether a queued timer's deadline has passed without it being run yet.
#[must_use]
pub fn is_overdue(handle: TimerHandle) -> bool {
    with_state(|s| {
        s.deadlines
            .get(&handle.id)
            .is_some_and(|&deadline| deadline <= s.now())
    })
}

/// Number of queued timers.
#[must_use]
pub fn pending_count() -> usize {
    with_state(|s| s.timers.len())
}

/// Earliest queued deadline.
#[must_use]
pub fn next_deadline() -> Option<Instant> {
    with_state(|s| s.timers.first_key_value().map(|(&(deadline, _), _)| deadline))
}

/// Run every timer whose deadline has passed. Returns how many ran.
pub fn run_due() -> usize {
    let mut ran = 0;
    while let Some((id, callback)) = with_state(SchedulerState::pop_due) {
        trace!(timer = id, "timer fired");
        callback();
        ran += 1;
    }
    ran
}

/// Move the manual clock forward by `by`, then run whatever became due.
///
/// # Errors
///
/// Returns [`StashError::ClockNotManual`] when the system clock is active.
pub fn advance(by: Duration) -> Result<usize, StashError> {
    shift_clock(by)?;
    Ok(run_due())
}

/// Move the manual clock forward by `by` without running anything.
///
/// # Errors
///
/// Returns [`StashError::ClockNotManual`] when the system clock is active.
pub fn shift_clock(by: Duration) -> Result<(), StashError> {
    with_state(|s| match &mut s.clock {
        ClockState::Manual(t) => {
            *t += by;
            Ok(())
        }
        ClockState::System => Err(StashError::ClockNotManual),
    })
}

/// Drop every queued timer without running it.
pub fn reset() {
    let drained = with_state(|s| {
        s.deadlines.clear();
        std::mem::take(&mut s.timers)
    });
    drop(drained);
}
