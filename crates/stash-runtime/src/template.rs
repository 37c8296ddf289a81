#![forbid(unsafe_code)]

//! Map templates: factories that build and cache keyed-map instances by id.
//!
//! `build(id)` returns the live instance cached under `id`, or constructs a
//! new one. Construction registers the template's initializer as a mount
//! binding on the instance, caches it, then fires Build listeners with a
//! fresh shared context. When an instance stops, it leaves the cache, so the
//! next `build(id)` constructs (and fires Build) again.
//!
//! Build listeners belong to the template, never to an instance, and do not
//! fire on resubscribe.
//!
//! The cache holds instances strongly. Instances hold the template weakly.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::{Rc, Weak};

use smallvec::smallvec;
use stash_core::SharedContext;
use tracing::debug;

use crate::events::BuildEvent;
use crate::mount::Teardown;
use crate::registry::{EventClass, ListenerHandle, ListenerId, ListenerList, ListenerOwner};
use crate::store::{MapStore, WeakStore};

type InitFn<K, V> = dyn Fn(&MapStore<K, V>, &str) -> Option<Teardown>;
type BuildFn<K, V> = dyn Fn(&BuildEvent<'_, BTreeMap<K, V>, K>);

struct TemplateInner<K, V> {
    init: Option<Box<InitFn<K, V>>>,
    cache: RefCell<HashMap<String, MapStore<K, V>>>,
    build: ListenerList<BuildFn<K, V>>,
    next_listener: Cell<ListenerId>,
}

impl<K: Ord + Clone + 'static, V: Clone + 'static> TemplateInner<K, V> {
    fn evict(&self, id: &str, store: &WeakStore<BTreeMap<K, V>, K>) {
        let removed = {
            let mut cache = self.cache.borrow_mut();
            let same = match (cache.get(id), store.upgrade()) {
                (Some(cached), Some(store)) => cached.ptr_eq(&store),
                _ => false,
            };
            if same { cache.remove(id) } else { None }
        };
        if removed.is_some() {
            debug!(id, "template instance evicted");
        }
    }
}

impl<K, V> ListenerOwner for TemplateInner<K, V> {
    fn remove_listener(&self, class: EventClass, id: ListenerId) -> bool {
        match class {
            EventClass::Build => self.build.remove(id),
            _ => false,
        }
    }

    fn has_listener(&self, class: EventClass, id: ListenerId) -> bool {
        class == EventClass::Build && self.build.contains(id)
    }
}

/// Factory for keyed-map instances, cached by id.
pub struct MapTemplate<K, V> {
    inner: Rc<TemplateInner<K, V>>,
}

impl<K, V> Clone for MapTemplate<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<K, V> fmt::Debug for MapTemplate<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<String> = self.inner.cache.borrow().keys().cloned().collect();
        ids.sort();
        f.debug_struct("MapTemplate")
            .field("cached", &ids)
            .field("build_listeners", &self.inner.build.len())
            .finish()
    }
}

impl<K: Ord + Clone + 'static, V: Clone + 'static> MapTemplate<K, V> {
    /// Template whose instances run `init` on every Start and its teardown
    /// on every Stop.
    #[must_use]
    pub fn new(init: impl Fn(&MapStore<K, V>, &str) -> Option<Teardown> + 'static) -> Self {
        Self::with_init(Some(Box::new(init)))
    }

    /// Template whose instances start empty and have no initializer.
    #[must_use]
    pub fn empty() -> Self {
        Self::with_init(None)
    }

    fn with_init(init: Option<Box<InitFn<K, V>>>) -> Self {
        Self {
            inner: Rc::new(TemplateInner {
                init,
                cache: RefCell::new(HashMap::new()),
                build: ListenerList::new(),
                next_listener: Cell::new(1),
            }),
        }
    }

    /// The cached instance for `id`, building it first if needed.
    pub fn build(&self, id: &str) -> MapStore<K, V> {
        let cached = self.inner.cache.borrow().get(id).cloned();
        if let Some(store) = cached {
            return store;
        }

        let store: MapStore<K, V> = MapStore::from_entries(std::iter::empty());
        let template = Rc::downgrade(&self.inner);
        let owned_id = id.to_owned();
        let _mount = store.on_mount(move |instance| {
            let inner = template.upgrade()?;
            let destroy = inner.init.as_ref().and_then(|init| init(instance, &owned_id));
            let template = Weak::clone(&template);
            let id = owned_id.clone();
            let weak = instance.downgrade();
            let teardown: Teardown = Box::new(move || {
                if let Some(inner) = template.upgrade() {
                    inner.evict(&id, &weak);
                }
                if let Some(destroy) = destroy {
                    destroy();
                }
            });
            Some(teardown)
        });

        self.inner
            .cache
            .borrow_mut()
            .insert(id.to_owned(), store.clone());

        let listeners = self.inner.build.snapshot();
        debug!(id, listeners = listeners.len(), "template instance built");
        let shared = SharedContext::new();
        let event = BuildEvent {
            shared: &shared,
            store: &store,
            id,
        };
        for listener in &listeners {
            listener(&event);
        }
        store
    }

    /// The cached instance for `id`, without building.
    #[must_use]
    pub fn cached(&self, id: &str) -> Option<MapStore<K, V>> {
        self.inner.cache.borrow().get(id).cloned()
    }

    /// Number of cached instances.
    #[must_use]
    pub fn cached_count(&self) -> usize {
        self.inner.cache.borrow().len()
    }

    /// Run `listener` once for every instance this template builds from now
    /// on.
    pub fn on_build(
        &self,
        listener: impl Fn(&BuildEvent<'_, BTreeMap<K, V>, K>) + 'static,
    ) -> ListenerHandle {
        let id = self.inner.next_listener.get();
        self.inner.next_listener.set(id + 1);
        self.inner.build.push(id, Rc::new(listener));
        let owner: Weak<dyn ListenerOwner> = Rc::downgrade(&self.inner) as Weak<dyn ListenerOwner>;
        ListenerHandle::new(owner, smallvec![(EventClass::Build, id)])
    }
}

/// Register a Build listener on `template`.
pub fn on_build<K, V>(
    template: &MapTemplate<K, V>,
    listener: impl Fn(&BuildEvent<'_, BTreeMap<K, V>, K>) + 'static,
) -> ListenerHandle
where
    K: Ord + Clone + 'static,
    V: Clone + 'static,
{
    template.on_build(listener)
}
