#![forbid(unsafe_code)]

//! Errors from Stash setup operations.
//!
//! Store writes, subscriptions, and listener registration never fail. The
//! only fallible calls are clock manipulation and logging setup.

use std::fmt;

/// Errors from scheduler and logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StashError {
    /// `advance` was called while the system clock is active.
    ClockNotManual,
    /// A log filter directive could not be parsed.
    InvalidLogFilter(String),
}

impl fmt::Display for StashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClockNotManual => f.write_str("clock is not manual; cannot advance time"),
            Self::InvalidLogFilter(msg) => write!(f, "invalid log filter: {msg}"),
        }
    }
}

impl std::error::Error for StashError {}
