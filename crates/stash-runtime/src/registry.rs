#![forbid(unsafe_code)]

//! Per-store listener registry.
//!
//! Each store owns one [`ListenerRegistry`] with an ordered list per
//! [`EventClass`]. Templates own a separate list for `Build`.
//!
//! # Invariants
//!
//! 1. Listeners within a class run in registration order. Re-adding a removed
//!    callback appends it to the end.
//! 2. Dispatch iterates a [`snapshot`](ListenerList::snapshot): removing or
//!    adding listeners mid-pass does not change who runs in that pass.
//! 3. The registry is the only strong owner of listener closures. Closures are
//!    dropped outside the list borrow, so a closure whose captures touch the
//!    registry on drop cannot hit a held `RefCell`.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use smallvec::SmallVec;

use crate::events::{LifecycleEvent, NotifyEvent, SetEvent};

/// Listener classes a store or template can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventClass {
    /// Runs before a write is committed; may abort it.
    Set,
    /// Runs after a write is committed, before subscribers are told.
    Notify,
    /// Runs when the first subscriber arrives.
    Start,
    /// Runs once the unmount delay passes with no subscribers.
    Stop,
    /// Runs once per store built from a template.
    Build,
}

/// Registration id, unique within one owner.
pub(crate) type ListenerId = u64;

pub(crate) type SetFn<T, K> = dyn Fn(&SetEvent<'_, T, K>);
pub(crate) type NotifyFn<T, K> = dyn Fn(&NotifyEvent<'_, T, K>);
pub(crate) type LifecycleFn<T, K> = dyn Fn(&LifecycleEvent<'_, T, K>);

/// Ordered list of callbacks for one class.
pub(crate) struct ListenerList<F: ?Sized> {
    entries: RefCell<Vec<(ListenerId, Rc<F>)>>,
}

impl<F: ?Sized> ListenerList<F> {
    pub(crate) fn new() -> Self {
        Self {
            entries: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn push(&self, id: ListenerId, callback: Rc<F>) {
        self.entries.borrow_mut().push((id, callback));
    }

    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        let removed = {
            let mut entries = self.entries.borrow_mut();
            entries
                .iter()
                .position(|(eid, _)| *eid == id)
                .map(|i| entries.remove(i))
        };
        removed.is_some()
    }

    /// Point-in-time copy, in registration order.
    pub(crate) fn snapshot(&self) -> Vec<Rc<F>> {
        self.entries
            .borrow()
            .iter()
            .map(|(_, cb)| Rc::clone(cb))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub(crate) fn contains(&self, id: ListenerId) -> bool {
        self.entries.borrow().iter().any(|(eid, _)| *eid == id)
    }

    pub(crate) fn clear(&self) {
        let drained = std::mem::take(&mut *self.entries.borrow_mut());
        drop(drained);
    }
}

/// Something that owns listener registrations and can drop one by id.
pub(crate) trait ListenerOwner {
    fn remove_listener(&self, class: EventClass, id: ListenerId) -> bool;

    fn has_listener(&self, class: EventClass, id: ListenerId) -> bool;
}

/// The four instance-scoped listener lists of one store.
pub(crate) struct ListenerRegistry<T, K> {
    next_id: Cell<ListenerId>,
    pub(crate) set: ListenerList<SetFn<T, K>>,
    pub(crate) notify: ListenerList<NotifyFn<T, K>>,
    pub(crate) start: ListenerList<LifecycleFn<T, K>>,
    pub(crate) stop: ListenerList<LifecycleFn<T, K>>,
}

impl<T, K> ListenerRegistry<T, K> {
    pub(crate) fn new() -> Self {
        Self {
            next_id: Cell::new(1),
            set: ListenerList::new(),
            notify: ListenerList::new(),
            start: ListenerList::new(),
            stop: ListenerList::new(),
        }
    }

    fn next_id(&self) -> ListenerId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    pub(crate) fn add_set(&self, f: impl Fn(&SetEvent<'_, T, K>) + 'static) -> ListenerId {
        let id = self.next_id();
        self.set.push(id, Rc::new(f));
        id
    }

    pub(crate) fn add_notify(&self, f: impl Fn(&NotifyEvent<'_, T, K>) + 'static) -> ListenerId {
        let id = self.next_id();
        self.notify.push(id, Rc::new(f));
        id
    }

    pub(crate) fn add_start(
        &self,
        f: impl Fn(&LifecycleEvent<'_, T, K>) + 'static,
    ) -> ListenerId {
        let id = self.next_id();
        self.start.push(id, Rc::new(f));
        id
    }

    pub(crate) fn add_stop(&self, f: impl Fn(&LifecycleEvent<'_, T, K>) + 'static) -> ListenerId {
        let id = self.next_id();
        self.stop.push(id, Rc::new(f));
        id
    }

    pub(crate) fn remove(&self, class: EventClass, id: ListenerId) -> bool {
        match class {
            EventClass::Set => self.set.remove(id),
            EventClass::Notify => self.notify.remove(id),
            EventClass::Start => self.start.remove(id),
            EventClass::Stop => self.stop.remove(id),
            EventClass::Build => false,
        }
    }

    pub(crate) fn contains(&self, class: EventClass, id: ListenerId) -> bool {
        match class {
            EventClass::Set => self.set.contains(id),
            EventClass::Notify => self.notify.contains(id),
            EventClass::Start => self.start.contains(id),
            EventClass::Stop => self.stop.contains(id),
            EventClass::Build => false,
        }
    }

    pub(crate) fn len(&self, class: EventClass) -> usize {
        match class {
            EventClass::Set => self.set.len(),
            EventClass::Notify => self.notify.len(),
            EventClass::Start => self.start.len(),
            EventClass::Stop => self.stop.len(),
            EventClass::Build => 0,
        }
    }

    pub(crate) fn clear(&self) {
        self.set.clear();
        self.notify.clear();
        self.start.clear();
        self.stop.clear();
    }
}

/// Removal token returned by every `on_*` registration.
///
/// Holds only a weak reference to the owning store or template, so keeping a
/// handle around does not keep the store alive. [`remove`](Self::remove) is
/// idempotent. Dropping the handle leaves the registration in place.
pub struct ListenerHandle {
    owner: Weak<dyn ListenerOwner>,
    entries: RefCell<SmallVec<[(EventClass, ListenerId); 2]>>,
}

impl ListenerHandle {
    pub(crate) fn new(
        owner: Weak<dyn ListenerOwner>,
        entries: SmallVec<[(EventClass, ListenerId); 2]>,
    ) -> Self {
        Self {
            owner,
            entries: RefCell::new(entries),
        }
    }

    /// Unregister every listener this handle covers. Calling it again, or
    /// after the owner is gone, does nothing.
    pub fn remove(&self) {
        let entries = std::mem::take(&mut *self.entries.borrow_mut());
        if let Some(owner) = self.owner.upgrade() {
            for (class, id) in entries {
                owner.remove_listener(class, id);
            }
        }
    }

    /// Whether any listener this handle covers is still registered with a
    /// live owner. `false` after [`remove`](Self::remove), after the owner is
    /// dropped, or after the owner cleared its listeners.
    #[must_use]
    pub fn is_registered(&self) -> bool {
        let Some(owner) = self.owner.upgrade() else {
            return false;
        };
        self.entries
            .borrow()
            .iter()
            .any(|&(class, id)| owner.has_listener(class, id))
    }

    /// Classes this handle covers, in registration order.
    #[must_use]
    pub fn classes(&self) -> Vec<EventClass> {
        self.entries.borrow().iter().map(|(c, _)| *c).collect()
    }
}

impl fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("classes", &self.classes())
            .field("owner_alive", &(self.owner.strong_count() > 0))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_preserves_order() {
        let list: ListenerList<dyn Fn() -> u8> = ListenerList::new();
        list.push(1, Rc::new(|| 1));
        list.push(2, Rc::new(|| 2));
        list.push(3, Rc::new(|| 3));
        let seen: Vec<u8> = list.snapshot().iter().map(|f| f()).collect();
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[test]
    fn snapshot_is_frozen() {
        let list: ListenerList<dyn Fn() -> u8> = ListenerList::new();
        list.push(1, Rc::new(|| 1));
        list.push(2, Rc::new(|| 2));
        let snap = list.snapshot();
        assert!(list.remove(1));
        list.push(3, Rc::new(|| 3));
        let seen: Vec<u8> = snap.iter().map(|f| f()).collect();
        assert_eq!(seen, vec![1, 2]);
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn remove_twice_is_noop() {
        let list: ListenerList<dyn Fn()> = ListenerList::new();
        list.push(7, Rc::new(|| {}));
        assert!(list.remove(7));
        assert!(!list.remove(7));
        assert_eq!(list.len(), 0);
    }

    #[test]
    fn readd_goes_to_end() {
        let list: ListenerList<dyn Fn() -> u8> = ListenerList::new();
        let a: Rc<dyn Fn() -> u8> = Rc::new(|| b'a');
        list.push(1, Rc::clone(&a));
        list.push(2, Rc::new(|| b'b'));
        list.remove(1);
        list.push(3, a);
        let seen: Vec<u8> = list.snapshot().iter().map(|f| f()).collect();
        assert_eq!(seen, b"ba".to_vec());
    }

    #[test]
    fn registry_ids_are_distinct_across_classes() {
        let reg: ListenerRegistry<i32, std::convert::Infallible> = ListenerRegistry::new();
        let a = reg.add_set(|_| {});
        let b = reg.add_notify(|_| {});
        let c = reg.add_start(|_| {});
        let d = reg.add_stop(|_| {});
        assert_eq!(vec![a, b, c, d], vec![1, 2, 3, 4]);
        assert_eq!(reg.len(EventClass::Set), 1);
        assert!(!reg.remove(EventClass::Set, b));
        assert!(reg.remove(EventClass::Notify, b));
        reg.clear();
        assert_eq!(reg.len(EventClass::Stop), 0);
    }
}
