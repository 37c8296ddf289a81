#![forbid(unsafe_code)]

//! Change dispatch: Set interceptors, commit, Notify interceptors,
//! subscribers.
//!
//! One call to [`Store::dispatch`] is one pass:
//!
//! 1. Fresh [`SharedContext`] and [`AbortFlag`].
//! 2. Set listeners in registration order. The first `abort()` ends the pass:
//!    nothing is committed, no later Set listener and no Notify listener runs.
//! 3. Commit the new value and bump the version.
//! 4. Notify listeners in registration order, with the same shared context.
//!    `abort()` here keeps the write from reaching subscribers; the value
//!    stays committed.
//! 5. Subscribers, unless a Notify listener aborted.
//!
//! # Re-entrancy
//!
//! A listener may write to the same store. The nested write is an ordinary,
//! independent pass with its own context, and it completes before the outer
//! pass continues with its remaining listeners. No guard is imposed, so an
//! outer Notify pass can observe a value that a nested write already replaced.

use stash_core::{AbortFlag, Changed, SharedContext};
use tracing::debug;

use crate::events::{NotifyEvent, SetEvent};
use crate::store::Store;

impl<T: Clone + 'static, K: Clone + 'static> Store<T, K> {
    /// Replace the whole value. Returns `false` if a Set listener aborted.
    pub fn set(&self, value: T) -> bool {
        self.dispatch(Changed::Whole, value)
    }

    /// Edit a copy of the value and write it back through [`set`](Self::set).
    pub fn update(&self, f: impl FnOnce(&mut T)) -> bool {
        let mut next = self.get();
        f(&mut next);
        self.set(next)
    }

    /// Run one write pass tagged with `changed`. `new_value` is the full
    /// value the store holds afterwards.
    ///
    /// Returns whether the value was committed.
    pub fn dispatch(&self, changed: Changed<K>, new_value: T) -> bool {
        let shared = SharedContext::new();
        let abort = AbortFlag::new();

        let set_listeners = self.core.listeners.set.snapshot();
        for listener in &set_listeners {
            listener(&SetEvent {
                changed: &changed,
                new_value: &new_value,
                shared: &shared,
                abort: &abort,
                store: self,
            });
            if abort.is_aborted() {
                debug!(
                    context = shared.id(),
                    keyed = changed.key().is_some(),
                    "write aborted by set listener"
                );
                return false;
            }
        }

        let previous = self.core.value.replace(new_value);
        self.core.version.set(self.core.version.get() + 1);
        drop(previous);

        let notify_listeners = self.core.listeners.notify.snapshot();
        for listener in &notify_listeners {
            listener(&NotifyEvent {
                changed: &changed,
                shared: &shared,
                abort: &abort,
                store: self,
            });
        }

        if abort.is_aborted() {
            debug!(context = shared.id(), "subscriber delivery suppressed by notify listener");
        } else {
            self.emit(&changed);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{atom, map};
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    #[test]
    fn abort_above_threshold() {
        let store = atom(1);
        let notified = Rc::new(Cell::new(0u32));
        let n = Rc::clone(&notified);
        let _set = store.on_set(|e| {
            if *e.new_value() > 10 {
                e.abort();
            }
        });
        let _notify = store.on_notify(move |_| n.set(n.get() + 1));

        assert!(!store.set(20));
        assert_eq!(store.get(), 1);
        assert_eq!(notified.get(), 0);
        assert_eq!(store.version(), 0);

        assert!(store.set(5));
        assert_eq!(store.get(), 5);
        assert_eq!(notified.get(), 1);
    }

    #[test]
    fn abort_short_circuits_later_set_listeners() {
        let store = atom(0);
        let log = Rc::new(RefCell::new(Vec::new()));
        let (a, b) = (Rc::clone(&log), Rc::clone(&log));
        let _first = store.on_set(move |e| {
            a.borrow_mut().push("first");
            e.abort();
        });
        let _second = store.on_set(move |_| b.borrow_mut().push("second"));
        assert!(!store.set(1));
        assert_eq!(*log.borrow(), vec!["first"]);
    }

    #[test]
    fn set_and_notify_share_context() {
        let store = atom(0);
        let ids = Rc::new(RefCell::new(Vec::new()));
        let (i1, i2) = (Rc::clone(&ids), Rc::clone(&ids));
        let _set = store.on_set(move |e| {
            e.shared().insert("from_set", *e.new_value() * 2);
            i1.borrow_mut().push(e.shared().id());
        });
        let seen = Rc::new(Cell::new(0));
        let s = Rc::clone(&seen);
        let _notify = store.on_notify(move |e| {
            s.set(e.shared().get::<i32>("from_set").unwrap_or(-1));
            i2.borrow_mut().push(e.shared().id());
        });

        store.set(21);
        assert_eq!(seen.get(), 42);
        store.set(1);

        let ids = ids.borrow();
        assert_eq!(ids[0], ids[1]);
        assert_eq!(ids[2], ids[3]);
        assert_ne!(ids[0], ids[2]);
    }

    #[test]
    fn notify_abort_suppresses_subscribers_only() {
        let store = atom(0);
        let delivered = Rc::new(Cell::new(0u32));
        let later_notify = Rc::new(Cell::new(0u32));
        let d = Rc::clone(&delivered);
        let l = Rc::clone(&later_notify);
        let _sub = store.listen(move |_, _| d.set(d.get() + 1));
        let _quiet = store.on_notify(|e| e.abort());
        let _after = store.on_notify(move |e| {
            assert!(e.is_aborted());
            l.set(l.get() + 1);
        });

        assert!(store.set(3));
        assert_eq!(store.get(), 3);
        assert_eq!(delivered.get(), 0);
        assert_eq!(later_notify.get(), 1);
    }

    #[test]
    fn notify_runs_before_subscribers() {
        let store = atom(0);
        let log = Rc::new(RefCell::new(Vec::new()));
        let (a, b, c) = (Rc::clone(&log), Rc::clone(&log), Rc::clone(&log));
        let _sub = store.listen(move |v, _| a.borrow_mut().push(format!("sub {v}")));
        let _notify = store.on_notify(move |e| {
            b.borrow_mut().push(format!("notify {}", e.store().get()));
        });
        let _set = store.on_set(move |e| {
            c.borrow_mut().push(format!("set {} -> {}", e.store().get(), e.new_value()));
        });
        store.set(9);
        assert_eq!(
            *log.borrow(),
            vec!["set 0 -> 9", "notify 9", "sub 9"]
        );
    }

    #[test]
    fn keyed_changes_are_tagged() {
        let store = map([("count", 0)]);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        let _set = store.on_set(move |e| {
            s.borrow_mut()
                .push((e.changed().key().copied(), e.new_value().get("count").copied()));
        });
        store.set_key("count", 5);
        store.dispatch(Changed::Whole, Default::default());
        assert_eq!(*seen.borrow(), vec![(Some("count"), Some(5)), (None, None)]);
    }

    #[test]
    fn listener_removed_mid_pass_still_runs_this_pass() {
        let store = atom(0);
        let hits = Rc::new(Cell::new(0u32));
        let victim_slot: Rc<RefCell<Option<crate::ListenerHandle>>> = Rc::default();
        let slot = Rc::clone(&victim_slot);
        let _remover = store.on_set(move |_| {
            if let Some(h) = slot.borrow().as_ref() {
                h.remove();
            }
        });
        let h = Rc::clone(&hits);
        *victim_slot.borrow_mut() = Some(store.on_set(move |_| h.set(h.get() + 1)));

        store.set(1);
        assert_eq!(hits.get(), 1);
        store.set(2);
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn reentrant_set_is_independent_pass() {
        let store = atom(0);
        let contexts = Rc::new(RefCell::new(Vec::new()));
        let c = Rc::clone(&contexts);
        let _clamp = store.on_notify(move |e| {
            c.borrow_mut().push(e.shared().id());
            if e.store().get() > 100 {
                e.store().set(100);
            }
        });
        store.set(500);
        assert_eq!(store.get(), 100);
        assert_eq!(store.version(), 2);
        let contexts = contexts.borrow();
        assert_eq!(contexts.len(), 2);
        assert_ne!(contexts[0], contexts[1]);
    }

    #[test]
    #[should_panic(expected = "listener failure")]
    fn listener_panic_propagates() {
        let store = atom(0);
        let _boom = store.on_set(|_| panic!("listener failure"));
        store.set(1);
    }

    #[test]
    fn store_usable_after_listener_panic() {
        let store = atom(0);
        let boom = store.on_set(|e| {
            if *e.new_value() == 13 {
                panic!("unlucky");
            }
        });
        let s = store.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || s.set(13)));
        assert!(result.is_err());
        assert_eq!(store.get(), 0);
        boom.remove();
        assert!(store.set(13));
        assert_eq!(store.get(), 13);
    }
}
