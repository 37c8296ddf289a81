#![forbid(unsafe_code)]

//! Core: change tags, per-dispatch context, and cooperative timers.
//!
//! # Role in Stash
//! `stash-core` holds the leaf primitives that the store engine
//! (`stash-runtime`) is built from. Nothing here knows what a store is.
//!
//! # Primary responsibilities
//! - **Changed**: tags a write as either a whole-value or a single-key change.
//! - **SharedContext**: mutable bag handed to every listener of one pass.
//! - **AbortFlag**: the cancellation capability exposed to interceptors.
//! - **Scheduler**: thread-local, cancellable timers on a swappable clock.
//!
//! # How it fits in the system
//! The runtime creates one `SharedContext` and one `AbortFlag` per write and
//! uses the scheduler to debounce store teardown after the last subscriber
//! leaves.

pub mod abort;
pub mod changed;
pub mod error;
pub mod logging;
pub mod scheduler;
pub mod shared;

pub use abort::AbortFlag;
pub use changed::Changed;
pub use error::StashError;
pub use scheduler::{ClockSource, TimerHandle};
pub use shared::SharedContext;
