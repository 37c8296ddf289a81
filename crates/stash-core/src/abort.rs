#![forbid(unsafe_code)]

//! Cooperative abort flag for a single dispatch.

use std::cell::Cell;

/// Set-once flag handed to interceptors.
///
/// Calling [`AbortFlag::abort`] more than once is harmless. The flag is never
/// cleared; a new one is created for every dispatch.
#[derive(Debug, Default)]
pub struct AbortFlag {
    aborted: Cell<bool>,
}

impl AbortFlag {
    /// A fresh, un-aborted flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that the current pass stop.
    pub fn abort(&self) {
        self.aborted.set(true);
    }

    /// Whether [`abort`](Self::abort) has been called.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.aborted.get()
    }
}
