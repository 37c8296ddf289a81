#![forbid(unsafe_code)]

//! Logging setup.
//!
//! Stash emits `tracing` events at `trace` and `debug` level for lifecycle
//! transitions and aborted writes. Hosts that already install a subscriber
//! need nothing from this module. With the `tracing-json` feature,
//! [`init_json_logging`] installs a JSON subscriber filtered by `STASH_LOG`.

/// Environment variable read for the default filter.
pub const LOG_ENV_VAR: &str = "STASH_LOG";

/// Filter used when neither an explicit filter nor `STASH_LOG` is set.
pub const DEFAULT_FILTER: &str = "warn";

/// Resolve the filter directive: explicit argument, then `STASH_LOG`, then
/// [`DEFAULT_FILTER`]. Blank values are skipped.
#[must_use]
pub fn resolve_filter(explicit: Option<&str>) -> String {
    resolve_filter_with(explicit, |key| std::env::var(key).ok())
}

fn resolve_filter_with<F>(explicit: Option<&str>, get_env: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let non_blank = |s: &str| {
        let s = s.trim();
        (!s.is_empty()).then(|| s.to_owned())
    };
    explicit
        .and_then(non_blank)
        .or_else(|| get_env(LOG_ENV_VAR).as_deref().and_then(non_blank))
        .unwrap_or_else(|| DEFAULT_FILTER.to_owned())
}

/// Install a global JSON `tracing` subscriber.
///
/// Returns `Ok(false)` if another global subscriber was already installed.
///
/// # Errors
///
/// Returns [`StashError::InvalidLogFilter`](crate::StashError::InvalidLogFilter)
/// when the resolved filter does not parse.
#[cfg(feature = "tracing-json")]
pub fn init_json_logging(filter: Option<&str>) -> Result<bool, crate::StashError> {
    use tracing_subscriber::EnvFilter;

    let directive = resolve_filter(filter);
    let env_filter = EnvFilter::try_new(&directive)
        .map_err(|e| crate::StashError::InvalidLogFilter(format!("{directive}: {e}")))?;
    Ok(tracing_subscriber::fmt()
        .json()
        .with_env_filter(env_filter)
        .try_init()
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_wins() {
        let f = resolve_filter_with(Some("debug"), |_| Some("trace".into()));
        assert_eq!(f, "debug");
    }

    #[test]
    fn env_then_default() {
        assert_eq!(
            resolve_filter_with(None, |_| Some(" stash_runtime=trace ".into())),
            "stash_runtime=trace"
        );
        assert_eq!(resolve_filter_with(None, |_| None), DEFAULT_FILTER);
        assert_eq!(resolve_filter_with(None, |_| Some("  ".into())), DEFAULT_FILTER);
    }

    #[test]
    fn blank_explicit_falls_through_to_env() {
        assert_eq!(
            resolve_filter_with(Some("  "), |_| Some("stash_runtime=debug".into())),
            "stash_runtime=debug"
        );
        assert_eq!(resolve_filter_with(Some(""), |_| None), DEFAULT_FILTER);
    }

    #[cfg(feature = "tracing-json")]
    #[test]
    fn bad_filter_is_rejected() {
        let err = init_json_logging(Some("stash=notalevel")).unwrap_err();
        assert!(matches!(err, crate::StashError::InvalidLogFilter(_)));
    }
}
