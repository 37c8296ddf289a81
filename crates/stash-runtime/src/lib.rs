#![forbid(unsafe_code)]

//! Store lifecycle and change-interception engine.
//!
//! # Role in Stash
//! `stash-runtime` owns the stores. It builds on the primitives in
//! `stash-core` (change tags, shared context, abort flag, timers).
//!
//! # Primary responsibilities
//! - **Store**: atoms and keyed maps with `get`, `set`, `listen`, `subscribe`.
//! - **Change dispatch**: Set interceptors may abort a write; Notify
//!   interceptors see the committed write before subscribers do.
//! - **Lifecycle**: Start on the first subscriber, Stop once
//!   [`STORE_UNMOUNT_DELAY`] passes after the last one leaves.
//! - **Mount**: initializer/teardown pairs bound to Start and Stop.
//! - **Templates**: map factories with Build listeners per instance.
//!
//! # Execution model
//! Everything runs synchronously on the calling thread. The only deferred
//! work is the teardown timer, which runs when the host services the
//! scheduler with [`run_pending_teardowns`] (or `advance_time` on a manual
//! clock).
//!
//! ```ignore
//! use stash_runtime::atom;
//!
//! let count = atom(1);
//! count.on_set(|e| {
//!     if *e.new_value() > 10 {
//!         e.abort();
//!     }
//! });
//! assert!(!count.set(20));
//! assert!(count.set(5));
//! ```

mod dispatch;
pub mod events;
pub mod lifecycle;
pub mod mount;
pub mod registry;
pub mod store;
pub mod template;

pub use events::{BuildEvent, LifecycleEvent, NotifyEvent, SetEvent};
pub use lifecycle::{
    STORE_UNMOUNT_DELAY, advance_time, on_notify, on_set, on_start, on_stop,
    run_pending_teardowns,
};
pub use mount::{Teardown, keep_mount, on_mount};
pub use registry::{EventClass, ListenerHandle};
pub use store::{Atom, MapStore, Store, Subscription, WeakStore, atom, map};
pub use template::{MapTemplate, on_build};

pub use stash_core::{Changed, SharedContext};
