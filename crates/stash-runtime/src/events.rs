#![forbid(unsafe_code)]

//! Payloads handed to listeners.
//!
//! All payloads borrow from the pass that created them; nothing here
//! outlives a single listener call.

use stash_core::{AbortFlag, Changed, SharedContext};

use crate::store::Store;

/// Payload of a Set interceptor, before the write is committed.
pub struct SetEvent<'a, T, K> {
    pub(crate) changed: &'a Changed<K>,
    pub(crate) new_value: &'a T,
    pub(crate) shared: &'a SharedContext,
    pub(crate) abort: &'a AbortFlag,
    pub(crate) store: &'a Store<T, K>,
}

impl<'a, T, K> SetEvent<'a, T, K> {
    /// Which part of the value is being written.
    #[must_use]
    pub fn changed(&self) -> &'a Changed<K> {
        self.changed
    }

    /// The full value the store will hold if the write goes through.
    #[must_use]
    pub fn new_value(&self) -> &'a T {
        self.new_value
    }

    /// Context shared with every other listener of this write.
    #[must_use]
    pub fn shared(&self) -> &'a SharedContext {
        self.shared
    }

    /// The store being written.
    #[must_use]
    pub fn store(&self) -> &'a Store<T, K> {
        self.store
    }

    /// Cancel the write. Later Set listeners and all Notify listeners are
    /// skipped and the store keeps its current value.
    pub fn abort(&self) {
        self.abort.abort();
    }

    /// Whether this write has been aborted.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.abort.is_aborted()
    }
}

/// Payload of a Notify interceptor, after the write is committed.
pub struct NotifyEvent<'a, T, K> {
    pub(crate) changed: &'a Changed<K>,
    pub(crate) shared: &'a SharedContext,
    pub(crate) abort: &'a AbortFlag,
    pub(crate) store: &'a Store<T, K>,
}

impl<'a, T, K> NotifyEvent<'a, T, K> {
    /// Which part of the value was written.
    #[must_use]
    pub fn changed(&self) -> &'a Changed<K> {
        self.changed
    }

    /// Same context the Set listeners of this write saw.
    #[must_use]
    pub fn shared(&self) -> &'a SharedContext {
        self.shared
    }

    /// The store that was written.
    #[must_use]
    pub fn store(&self) -> &'a Store<T, K> {
        self.store
    }

    /// Keep this write from reaching the store's subscribers. The committed
    /// value is not reverted and remaining Notify listeners still run.
    pub fn abort(&self) {
        self.abort.abort();
    }

    /// Whether subscriber delivery has been suppressed.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.abort.is_aborted()
    }
}

/// Payload of Start and Stop listeners.
pub struct LifecycleEvent<'a, T, K> {
    pub(crate) shared: &'a SharedContext,
    pub(crate) store: &'a Store<T, K>,
}

impl<'a, T, K> LifecycleEvent<'a, T, K> {
    /// Context shared across this Start (or Stop) pass.
    #[must_use]
    pub fn shared(&self) -> &'a SharedContext {
        self.shared
    }

    /// The store starting or stopping.
    #[must_use]
    pub fn store(&self) -> &'a Store<T, K> {
        self.store
    }
}

/// Payload of a template Build listener.
pub struct BuildEvent<'a, T, K> {
    pub(crate) shared: &'a SharedContext,
    pub(crate) store: &'a Store<T, K>,
    pub(crate) id: &'a str,
}

impl<'a, T, K> BuildEvent<'a, T, K> {
    /// Context for this build only, unrelated to later writes.
    #[must_use]
    pub fn shared(&self) -> &'a SharedContext {
        self.shared
    }

    /// The freshly built instance.
    #[must_use]
    pub fn store(&self) -> &'a Store<T, K> {
        self.store
    }

    /// Cache id the instance was built for.
    #[must_use]
    pub fn id(&self) -> &'a str {
        self.id
    }
}
