#![forbid(unsafe_code)]

//! Subscriber-driven lifecycle: Start on first subscriber, debounced Stop
//! after the last one leaves.
//!
//! # State machine
//!
//! ```text
//!               listen (0 → 1)                 unlisten (1 → 0)
//!   Idle ───────────────────────▶ Active ───────────────────────▶ Draining
//!    ▲        run Start             ▲                schedule Stop   │
//!    │                              │  listen before deadline        │
//!    │                              └──── cancel timer ◀─────────────┤
//!    │                                                               │
//!    └──────────────────── deadline passes: run Stop ◀───────────────┘
//! ```
//!
//! A subscriber that arrives after the deadline but before the scheduler got
//! to run the timer sees the teardown run first, then a fresh Start.
//!
//! # Invariants
//!
//! 1. Start listeners of one pass all observe `subscriber_count() == 1`.
//! 2. Stop listeners observe `subscriber_count() == 0`, and it stayed 0 for
//!    the whole delay.
//! 3. A 0 → 1 edge runs Start or cancels a pending teardown, never both.
//! 4. The teardown timer holds the store strongly until it fires or is
//!    cancelled; listener handles hold it weakly.

use std::rc::{Rc, Weak};
use std::time::Duration;

use smallvec::smallvec;
use stash_core::scheduler::{self, TimerHandle};
use stash_core::{SharedContext, StashError};
use tracing::debug;

use crate::events::{LifecycleEvent, NotifyEvent, SetEvent};
use crate::registry::{EventClass, ListenerHandle, ListenerId, ListenerOwner};
use crate::store::{Store, SubscriberFn, Subscription};

/// How long a store stays mounted after its last subscriber leaves.
pub const STORE_UNMOUNT_DELAY: Duration = Duration::from_millis(1000);

/// Per-store lifecycle bookkeeping.
#[derive(Debug, Default)]
pub(crate) struct LifecycleState {
    pub(crate) active: bool,
    pub(crate) pending_teardown: Option<TimerHandle>,
}

impl<T: Clone + 'static, K: Clone + 'static> Store<T, K> {
    /// Intercept writes before they are committed.
    pub fn on_set(&self, listener: impl Fn(&SetEvent<'_, T, K>) + 'static) -> ListenerHandle {
        let id = self.core.listeners.add_set(listener);
        self.listener_handle(EventClass::Set, id)
    }

    /// Observe writes after they are committed.
    pub fn on_notify(
        &self,
        listener: impl Fn(&NotifyEvent<'_, T, K>) + 'static,
    ) -> ListenerHandle {
        let id = self.core.listeners.add_notify(listener);
        self.listener_handle(EventClass::Notify, id)
    }

    /// Run when the first subscriber arrives.
    pub fn on_start(
        &self,
        listener: impl Fn(&LifecycleEvent<'_, T, K>) + 'static,
    ) -> ListenerHandle {
        let id = self.core.listeners.add_start(listener);
        self.listener_handle(EventClass::Start, id)
    }

    /// Run once [`STORE_UNMOUNT_DELAY`] passes with no subscribers.
    pub fn on_stop(
        &self,
        listener: impl Fn(&LifecycleEvent<'_, T, K>) + 'static,
    ) -> ListenerHandle {
        let id = self.core.listeners.add_stop(listener);
        self.listener_handle(EventClass::Stop, id)
    }

    /// Deadline of the pending teardown, if one is scheduled.
    #[must_use]
    pub fn teardown_deadline(&self) -> Option<scheduler::Instant> {
        let pending = self.core.lifecycle.borrow().pending_teardown;
        pending.and_then(scheduler::deadline)
    }

    fn listener_handle(&self, class: EventClass, id: ListenerId) -> ListenerHandle {
        self.owned_handle(smallvec![(class, id)])
    }

    pub(crate) fn owned_handle(
        &self,
        entries: smallvec::SmallVec<[(EventClass, ListenerId); 2]>,
    ) -> ListenerHandle {
        let owner: Weak<dyn ListenerOwner> = Rc::downgrade(&self.core) as Weak<dyn ListenerOwner>;
        ListenerHandle::new(owner, entries)
    }

    pub(crate) fn attach(&self, callback: SubscriberFn<T, K>) -> Subscription {
        if self.subscriber_count() == 0 {
            self.flush_overdue_teardown();
        }
        let id = self.core.next_subscriber.get();
        self.core.next_subscriber.set(id + 1);
        let count = {
            let mut subscribers = self.core.subscribers.borrow_mut();
            subscribers.push((id, callback));
            subscribers.len()
        };
        // Guard exists before Start runs so a panicking Start listener
        // unwinds through it and detaches this subscriber.
        let store = self.clone();
        let subscription = Subscription::new(move || store.detach(id));
        if count == 1 {
            self.first_subscriber();
        }
        subscription
    }

    fn detach(&self, id: u64) {
        let (removed, remaining) = {
            let mut subscribers = self.core.subscribers.borrow_mut();
            let removed = subscribers
                .iter()
                .position(|(sid, _)| *sid == id)
                .map(|i| subscribers.remove(i));
            (removed, subscribers.len())
        };
        let was_present = removed.is_some();
        drop(removed);
        if was_present && remaining == 0 {
            self.last_subscriber_left();
        }
    }

    /// Run a teardown whose deadline passed before the scheduler got to it.
    fn flush_overdue_teardown(&self) {
        let pending = self.core.lifecycle.borrow().pending_teardown;
        if let Some(handle) = pending.filter(|&h| scheduler::is_overdue(h)) {
            scheduler::cancel(handle);
            debug!(timer = handle.id(), "overdue teardown runs before restart");
            self.fire_teardown();
        }
    }

    fn first_subscriber(&self) {
        let pending = self.core.lifecycle.borrow_mut().pending_teardown.take();
        match pending {
            Some(handle) => {
                scheduler::cancel(handle);
                debug!(timer = handle.id(), "resubscribed within delay; teardown cancelled");
            }
            None => self.run_start(),
        }
    }

    fn last_subscriber_left(&self) {
        if !self.is_active() {
            return;
        }
        let store = self.clone();
        let handle = scheduler::schedule(STORE_UNMOUNT_DELAY, move || store.fire_teardown());
        self.core.lifecycle.borrow_mut().pending_teardown = Some(handle);
        debug!(timer = handle.id(), delay = ?STORE_UNMOUNT_DELAY, "last subscriber left; teardown scheduled");
    }

    fn fire_teardown(&self) {
        let was_pending = self
            .core
            .lifecycle
            .borrow_mut()
            .pending_teardown
            .take()
            .is_some();
        if was_pending && self.subscriber_count() == 0 {
            self.run_stop();
        }
    }

    pub(crate) fn run_start(&self) {
        self.core.lifecycle.borrow_mut().active = true;
        let listeners = self.core.listeners.start.snapshot();
        debug!(listeners = listeners.len(), "store started");
        if listeners.is_empty() {
            return;
        }
        let shared = SharedContext::new();
        let event = LifecycleEvent {
            shared: &shared,
            store: self,
        };
        for listener in &listeners {
            listener(&event);
        }
    }

    pub(crate) fn run_stop(&self) {
        *self.core.lifecycle.borrow_mut() = LifecycleState::default();
        let listeners = self.core.listeners.stop.snapshot();
        debug!(listeners = listeners.len(), "store stopped");
        if listeners.is_empty() {
            return;
        }
        let shared = SharedContext::new();
        let event = LifecycleEvent {
            shared: &shared,
            store: self,
        };
        for listener in &listeners {
            listener(&event);
        }
    }
}

/// Register a Set interceptor on `store`.
pub fn on_set<T, K>(
    store: &Store<T, K>,
    listener: impl Fn(&SetEvent<'_, T, K>) + 'static,
) -> ListenerHandle
where
    T: Clone + 'static,
    K: Clone + 'static,
{
    store.on_set(listener)
}

/// Register a Notify interceptor on `store`.
pub fn on_notify<T, K>(
    store: &Store<T, K>,
    listener: impl Fn(&NotifyEvent<'_, T, K>) + 'static,
) -> ListenerHandle
where
    T: Clone + 'static,
    K: Clone + 'static,
{
    store.on_notify(listener)
}

/// Register a Start listener on `store`.
pub fn on_start<T, K>(
    store: &Store<T, K>,
    listener: impl Fn(&LifecycleEvent<'_, T, K>) + 'static,
) -> ListenerHandle
where
    T: Clone + 'static,
    K: Clone + 'static,
{
    store.on_start(listener)
}

/// Register a Stop listener on `store`.
pub fn on_stop<T, K>(
    store: &Store<T, K>,
    listener: impl Fn(&LifecycleEvent<'_, T, K>) + 'static,
) -> ListenerHandle
where
    T: Clone + 'static,
    K: Clone + 'static,
{
    store.on_stop(listener)
}

/// Run every teardown whose delay has passed. Call once per host loop turn.
pub fn run_pending_teardowns() -> usize {
    scheduler::run_due()
}

/// Advance the manual clock, running teardowns that come due.
///
/// # Errors
///
/// Returns [`StashError::ClockNotManual`] on the system clock.
pub fn advance_time(by: Duration) -> Result<usize, StashError> {
    scheduler::advance(by)
}
