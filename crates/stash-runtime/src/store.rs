#![forbid(unsafe_code)]

//! Store cells: atoms and keyed maps.
//!
//! # Design
//!
//! [`Store<T, K>`] wraps a value in shared, reference-counted storage
//! (`Rc<StoreCore>`). Cloning a store hands out another handle to the same
//! cell. The key parameter `K` says what a write can be tagged with:
//!
//! - [`Atom<T>`] is `Store<T, Infallible>`: every write is `Changed::Whole`.
//! - [`MapStore<K, V>`] is `Store<BTreeMap<K, V>, K>`: writes are either the
//!   whole map or a single key.
//!
//! Listener signatures are the same for both kinds.
//!
//! # Performance
//!
//! | Operation     | Complexity                              |
//! |---------------|-----------------------------------------|
//! | `get()`       | O(clone of T)                           |
//! | `set()`       | O(L + S) listeners and subscribers      |
//! | `set_key()`   | O(clone of map + L + S)                 |
//! | `listen()`    | O(1) amortized, plus Start on 0 → 1     |
//!
//! # Failure Modes
//!
//! - **Panicking callback**: no borrow is held while user code runs, so the
//!   panic propagates to whoever called `set`/`subscribe`/`run_due` and the
//!   store stays usable.
//! - **Subscriber leak**: a [`Subscription`] that is never dropped keeps the
//!   store mounted forever. [`Subscription::forget`] does this on purpose.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt;
use std::rc::{Rc, Weak};

use stash_core::Changed;

use crate::lifecycle::LifecycleState;
use crate::registry::{EventClass, ListenerId, ListenerOwner, ListenerRegistry};

pub(crate) type SubscriberFn<T, K> = Rc<dyn Fn(&T, &Changed<K>)>;

/// Shared interior of a [`Store`].
pub(crate) struct StoreCore<T, K> {
    pub(crate) value: RefCell<T>,
    pub(crate) version: Cell<u64>,
    pub(crate) subscribers: RefCell<Vec<(u64, SubscriberFn<T, K>)>>,
    pub(crate) next_subscriber: Cell<u64>,
    pub(crate) listeners: ListenerRegistry<T, K>,
    pub(crate) lifecycle: RefCell<LifecycleState>,
}

impl<T, K> ListenerOwner for StoreCore<T, K> {
    fn remove_listener(&self, class: EventClass, id: ListenerId) -> bool {
        self.listeners.remove(class, id)
    }

    fn has_listener(&self, class: EventClass, id: ListenerId) -> bool {
        self.listeners.contains(class, id)
    }
}

/// An observable value cell with intercepted writes and a
/// subscriber-driven lifecycle.
///
/// # Invariants
///
/// 1. `version` increments by exactly 1 on each committed write.
/// 2. Set listeners, then commit, then Notify listeners, then subscribers.
/// 3. Subscribers are notified in registration order.
/// 4. Start runs on the 0 → 1 subscriber edge unless a pending teardown is
///    cancelled instead; Stop runs once the unmount delay passes at zero.
pub struct Store<T, K = Infallible> {
    pub(crate) core: Rc<StoreCore<T, K>>,
}

/// A store holding one undivided value.
pub type Atom<T> = Store<T, Infallible>;

/// A store holding a record, settable per key.
pub type MapStore<K, V> = Store<BTreeMap<K, V>, K>;

// Manual Clone: shares the same Rc.
impl<T, K> Clone for Store<T, K> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
        }
    }
}

impl<T: fmt::Debug, K> fmt::Debug for Store<T, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("value", &*self.core.value.borrow())
            .field("version", &self.core.version.get())
            .field("subscriber_count", &self.core.subscribers.borrow().len())
            .field("active", &self.core.lifecycle.borrow().active)
            .finish()
    }
}

/// Create an atom.
#[must_use]
pub fn atom<T: Clone + 'static>(value: T) -> Atom<T> {
    Atom::new(value)
}

/// Create a keyed map store.
#[must_use]
pub fn map<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> MapStore<K, V>
where
    K: Ord + Clone + 'static,
    V: Clone + 'static,
{
    MapStore::from_entries(entries)
}

impl<T: Clone + 'static> Store<T, Infallible> {
    /// Create an atom holding `value`. Version starts at 0 and the store is
    /// inactive until its first subscriber.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self::from_value(value)
    }
}

impl<T: Clone + 'static, K: Clone + 'static> Store<T, K> {
    pub(crate) fn from_value(value: T) -> Self {
        Self {
            core: Rc::new(StoreCore {
                value: RefCell::new(value),
                version: Cell::new(0),
                subscribers: RefCell::new(Vec::new()),
                next_subscriber: Cell::new(1),
                listeners: ListenerRegistry::new(),
                lifecycle: RefCell::new(LifecycleState::default()),
            }),
        }
    }

    /// Clone of the current value.
    #[must_use]
    pub fn get(&self) -> T {
        self.core.value.borrow().clone()
    }

    /// Read the current value by reference.
    ///
    /// The closure must not write to this store.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.core.value.borrow())
    }

    /// Number of committed writes so far.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.core.version.get()
    }

    /// Live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.core.subscribers.borrow().len()
    }

    /// Listeners registered for `class`. Always 0 for `Build`.
    #[must_use]
    pub fn listener_count(&self, class: EventClass) -> usize {
        self.core.listeners.len(class)
    }

    /// Whether Start has run and Stop has not run since.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.core.lifecycle.borrow().active
    }

    /// Register `callback` for future changes without calling it now.
    ///
    /// The first subscriber starts the store.
    pub fn listen(&self, callback: impl Fn(&T, &Changed<K>) + 'static) -> Subscription {
        self.attach(Rc::new(callback))
    }

    /// Register `callback` and call it once right away with the current
    /// value and `Changed::Whole`, after any Start listeners have run.
    pub fn subscribe(&self, callback: impl Fn(&T, &Changed<K>) + 'static) -> Subscription {
        let callback: SubscriberFn<T, K> = Rc::new(callback);
        let subscription = self.attach(Rc::clone(&callback));
        let value = self.get();
        callback(&value, &Changed::Whole);
        subscription
    }

    /// Weak handle that does not keep the store alive.
    #[must_use]
    pub fn downgrade(&self) -> WeakStore<T, K> {
        WeakStore {
            core: Rc::downgrade(&self.core),
        }
    }

    /// Whether both handles point at the same cell.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.core, &other.core)
    }

    /// Deliver the current value to every live subscriber.
    pub(crate) fn emit(&self, changed: &Changed<K>) {
        // Collect first so callbacks run outside the borrow.
        let callbacks: Vec<SubscriberFn<T, K>> = self
            .core
            .subscribers
            .borrow()
            .iter()
            .map(|(_, cb)| Rc::clone(cb))
            .collect();
        if callbacks.is_empty() {
            return;
        }
        let value = self.get();
        for cb in &callbacks {
            cb(&value, changed);
        }
    }

    /// Reset the store for test isolation: drop subscribers and listeners,
    /// cancel a pending teardown, and run Stop if the store was active.
    ///
    /// Outstanding [`Subscription`]s become inert.
    #[cfg(any(test, feature = "test-helpers"))]
    pub fn clean(&self) {
        let subscribers = std::mem::take(&mut *self.core.subscribers.borrow_mut());
        drop(subscribers);
        let pending = self.core.lifecycle.borrow_mut().pending_teardown.take();
        if let Some(handle) = pending {
            stash_core::scheduler::cancel(handle);
        }
        if self.is_active() {
            self.run_stop();
        }
        self.core.listeners.clear();
    }
}

impl<K, V> Store<BTreeMap<K, V>, K>
where
    K: Ord + Clone + 'static,
    V: Clone + 'static,
{
    /// Create a map store from key/value pairs.
    #[must_use]
    pub fn from_entries(entries: impl IntoIterator<Item = (K, V)>) -> Self {
        Self::from_value(entries.into_iter().collect())
    }

    /// Clone of the value under `key`.
    #[must_use]
    pub fn get_key(&self, key: &K) -> Option<V> {
        self.core.value.borrow().get(key).cloned()
    }

    /// Write one key. Dispatches with `Changed::Key(key)`; the Set listeners
    /// see the whole map as it would be after the write.
    pub fn set_key(&self, key: K, value: V) -> bool {
        let mut next = self.get();
        next.insert(key.clone(), value);
        self.dispatch(Changed::Key(key), next)
    }

    /// Remove one key. Dispatches even if the key was absent.
    pub fn delete_key(&self, key: K) -> bool {
        let mut next = self.get();
        next.remove(&key);
        self.dispatch(Changed::Key(key), next)
    }

    /// Like [`listen`](Store::listen), but only for writes to one of `keys`.
    pub fn listen_keys(
        &self,
        keys: impl IntoIterator<Item = K>,
        callback: impl Fn(&BTreeMap<K, V>, &Changed<K>) + 'static,
    ) -> Subscription {
        let keys: Vec<K> = keys.into_iter().collect();
        self.listen(move |value, changed| {
            if changed.matches_any(&keys) {
                callback(value, changed);
            }
        })
    }

    /// Like [`subscribe`](Store::subscribe), but later calls only for writes
    /// to one of `keys`. The initial call always happens.
    pub fn subscribe_keys(
        &self,
        keys: impl IntoIterator<Item = K>,
        callback: impl Fn(&BTreeMap<K, V>, &Changed<K>) + 'static,
    ) -> Subscription {
        let callback = Rc::new(callback);
        let initial = Rc::clone(&callback);
        let subscription = self.listen_keys(keys, move |value, changed| callback(value, changed));
        let value = self.get();
        initial(&value, &Changed::Whole);
        subscription
    }
}

/// Non-owning handle to a [`Store`].
pub struct WeakStore<T, K = Infallible> {
    core: Weak<StoreCore<T, K>>,
}

impl<T, K> WeakStore<T, K> {
    /// The store, if any strong handle is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<Store<T, K>> {
        self.core.upgrade().map(|core| Store { core })
    }
}

impl<T, K> Clone for WeakStore<T, K> {
    fn clone(&self) -> Self {
        Self {
            core: Weak::clone(&self.core),
        }
    }
}

impl<T, K> fmt::Debug for WeakStore<T, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakStore")
            .field("alive", &(self.core.strong_count() > 0))
            .finish()
    }
}

/// RAII guard for a subscriber.
///
/// Dropping the guard, or calling [`unsubscribe`](Self::unsubscribe),
/// removes the callback. The last removal schedules the store's teardown.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub(crate) fn new(unsubscribe: impl FnOnce() + 'static) -> Self {
        Self {
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    /// Remove the callback now. Later calls do nothing.
    pub fn unsubscribe(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }

    /// Whether the callback is still registered through this guard.
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.unsubscribe.is_some()
    }

    /// Keep the callback registered for the life of the store.
    pub fn forget(mut self) {
        self.unsubscribe = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("subscribed", &self.is_subscribed())
            .finish()
    }
}
