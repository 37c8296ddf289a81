#![forbid(unsafe_code)]

//! Mount binding: one initializer per Start, its teardown per Stop.

use std::cell::RefCell;
use std::rc::Rc;

use smallvec::smallvec;

use crate::registry::{EventClass, ListenerHandle};
use crate::store::Store;

/// Cleanup returned by a mount initializer.
pub type Teardown = Box<dyn FnOnce()>;

impl<T: Clone + 'static, K: Clone + 'static> Store<T, K> {
    /// Run `init` every time the store starts and the teardown it returns
    /// every time the store stops.
    ///
    /// The returned handle removes both halves together.
    pub fn on_mount(&self, init: impl Fn(&Store<T, K>) -> Option<Teardown> + 'static) -> ListenerHandle {
        let slot: Rc<RefCell<Option<Teardown>>> = Rc::default();

        let start_slot = Rc::clone(&slot);
        let start = self.core.listeners.add_start(move |event| {
            let teardown = init(event.store());
            let stale = start_slot.replace(teardown);
            drop(stale);
        });

        let stop = self.core.listeners.add_stop(move |_| {
            let teardown = slot.borrow_mut().take();
            if let Some(teardown) = teardown {
                teardown();
            }
        });

        self.owned_handle(smallvec![(EventClass::Start, start), (EventClass::Stop, stop)])
    }

    /// Keep the store mounted for as long as it exists.
    pub fn keep_mount(&self) {
        self.listen(|_, _| {}).forget();
    }
}

/// Bind an initializer and its teardown to `store`'s lifecycle.
pub fn on_mount<T, K>(
    store: &Store<T, K>,
    init: impl Fn(&Store<T, K>) -> Option<Teardown> + 'static,
) -> ListenerHandle
where
    T: Clone + 'static,
    K: Clone + 'static,
{
    store.on_mount(init)
}

/// Mount `store` permanently.
pub fn keep_mount<T, K>(store: &Store<T, K>)
where
    T: Clone + 'static,
    K: Clone + 'static,
{
    store.keep_mount();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::{STORE_UNMOUNT_DELAY, advance_time};
    use crate::store::atom;
    use stash_core::ClockSource;
    use stash_core::scheduler;
    use std::cell::Cell;
    use std::time::Duration;

    fn manual_clock() {
        scheduler::reset();
        scheduler::set_clock(ClockSource::Manual);
    }

    #[test]
    fn teardown_runs_once_per_stop() {
        manual_clock();
        let store = atom(0);
        let inits = Rc::new(Cell::new(0u32));
        let teardowns = Rc::new(Cell::new(0u32));
        let (i, t) = (Rc::clone(&inits), Rc::clone(&teardowns));
        let _mount = store.on_mount(move |_| {
            i.set(i.get() + 1);
            let t = Rc::clone(&t);
            let teardown: Teardown = Box::new(move || t.set(t.get() + 1));
            Some(teardown)
        });

        for cycle in 1..=3 {
            drop(store.listen(|_, _| {}));
            advance_time(STORE_UNMOUNT_DELAY).unwrap();
            assert_eq!(inits.get(), cycle);
            assert_eq!(teardowns.get(), cycle);
        }
    }

    #[test]
    fn initializer_may_set_initial_value() {
        manual_clock();
        let store = atom(String::new());
        let _mount = store.on_mount(|s| {
            s.set("loaded".to_string());
            None
        });
        let seen = Rc::new(RefCell::new(String::new()));
        let s = Rc::clone(&seen);
        let _sub = store.subscribe(move |v, _| *s.borrow_mut() = v.clone());
        assert_eq!(&*seen.borrow(), "loaded");
    }

    #[test]
    fn no_teardown_when_initializer_returns_none() {
        manual_clock();
        let store = atom(0);
        let inits = Rc::new(Cell::new(0u32));
        let i = Rc::clone(&inits);
        let _mount = on_mount(&store, move |_| {
            i.set(i.get() + 1);
            None
        });
        drop(store.listen(|_, _| {}));
        assert_eq!(advance_time(STORE_UNMOUNT_DELAY).unwrap(), 1);
        assert_eq!(inits.get(), 1);
        assert!(!store.is_active());
    }

    #[test]
    fn remove_drops_both_halves() {
        manual_clock();
        let store = atom(0);
        let mount = store.on_mount(|_| None);
        assert_eq!(store.listener_count(EventClass::Start), 1);
        assert_eq!(store.listener_count(EventClass::Stop), 1);
        assert_eq!(mount.classes(), vec![EventClass::Start, EventClass::Stop]);
        mount.remove();
        assert_eq!(store.listener_count(EventClass::Start), 0);
        assert_eq!(store.listener_count(EventClass::Stop), 0);
    }

    #[test]
    fn resubscribe_in_window_keeps_mount() {
        manual_clock();
        let store = atom(0);
        let teardowns = Rc::new(Cell::new(0u32));
        let t = Rc::clone(&teardowns);
        let _mount = store.on_mount(move |_| {
            let t = Rc::clone(&t);
            let teardown: Teardown = Box::new(move || t.set(t.get() + 1));
            Some(teardown)
        });
        drop(store.listen(|_, _| {}));
        advance_time(Duration::from_millis(10)).unwrap();
        let _sub = store.listen(|_, _| {});
        advance_time(STORE_UNMOUNT_DELAY * 2).unwrap();
        assert_eq!(teardowns.get(), 0);
    }

    #[test]
    fn keep_mount_never_stops() {
        manual_clock();
        let store = atom(0);
        let stops = Rc::new(Cell::new(0u32));
        let s = Rc::clone(&stops);
        let _stop = store.on_stop(move |_| s.set(s.get() + 1));
        keep_mount(&store);
        let sub = store.listen(|_, _| {});
        drop(sub);
        advance_time(STORE_UNMOUNT_DELAY * 5).unwrap();
        assert_eq!(stops.get(), 0);
        assert!(store.is_active());
    }
}
