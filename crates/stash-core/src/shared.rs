#![forbid(unsafe_code)]

//! Per-pass shared context.
//!
//! A [`SharedContext`] is created at the start of a dispatch (or a Start,
//! Stop, or Build pass) and dropped at its end. Every listener in that pass
//! receives the same `&SharedContext`, which is how a Set interceptor can
//! leave a note for a Notify interceptor of the same write.
//!
//! # Invariants
//!
//! 1. Each context gets a process-unique [`id`](SharedContext::id).
//! 2. No borrow of the inner map outlives a single method call, so listeners
//!    may freely read and write from nested calls.
//!
//! The context is `!Send`. A multi-threaded engine would need one context per
//! dispatch behind its own lock and must never hand one dispatch's context to
//! another.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Mutable name-to-value bag scoped to one listener pass.
pub struct SharedContext {
    id: u64,
    entries: RefCell<HashMap<String, Box<dyn Any>>>,
}

impl SharedContext {
    /// A fresh, empty context with a new id.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            entries: RefCell::new(HashMap::new()),
        }
    }

    /// Process-unique identity of this context.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Store `value` under `key`, returning whether a previous entry was
    /// replaced.
    pub fn insert<V: Any>(&self, key: impl Into<String>, value: V) -> bool {
        self.entries
            .borrow_mut()
            .insert(key.into(), Box::new(value))
            .is_some()
    }

    /// Clone out the value under `key` if present and of type `V`.
    #[must_use]
    pub fn get<V: Any + Clone>(&self, key: &str) -> Option<V> {
        self.entries
            .borrow()
            .get(key)
            .and_then(|v| v.downcast_ref::<V>())
            .cloned()
    }

    /// Run `f` against the value under `key` without cloning it.
    ///
    /// The closure must not touch this context again.
    pub fn with<V: Any, R>(&self, key: &str, f: impl FnOnce(Option<&V>) -> R) -> R {
        let entries = self.entries.borrow();
        f(entries.get(key).and_then(|v| v.downcast_ref::<V>()))
    }

    /// Mutate the value under `key` in place, inserting `V::default()` first
    /// when absent or of a different type.
    pub fn update<V: Any + Default, R>(&self, key: &str, f: impl FnOnce(&mut V) -> R) -> R {
        let mut entries = self.entries.borrow_mut();
        let mut value: Box<V> = entries
            .remove(key)
            .and_then(|v| v.downcast::<V>().ok())
            .unwrap_or_default();
        let out = f(&mut value);
        entries.insert(key.to_owned(), value);
        out
    }

    /// Whether an entry exists under `key`, of any type.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.borrow().contains_key(key)
    }

    /// Remove the entry under `key`, returning whether one existed.
    pub fn remove(&self, key: &str) -> bool {
        self.entries.borrow_mut().remove(key).is_some()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Whether the context holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl Default for SharedContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SharedContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries.borrow();
        let mut keys: Vec<&String> = entries.keys().collect();
        keys.sort();
        f.debug_struct("SharedContext")
            .field("id", &self.id)
            .field("keys", &keys)
            .finish()
    }
}
