#![forbid(unsafe_code)]

//! Change tags for store writes.
//!
//! Every write carries a [`Changed`] tag so interceptors share one signature
//! regardless of store kind. Atoms use `Changed<Infallible>`, which makes
//! [`Changed::Key`] unrepresentable for them.

use std::fmt;

/// What part of a store a write touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Changed<K> {
    /// The whole value was replaced.
    #[default]
    Whole,
    /// A single key of a keyed store was written or deleted.
    Key(K),
}

impl<K> Changed<K> {
    /// Whether this is a whole-value change.
    #[must_use]
    pub const fn is_whole(&self) -> bool {
        matches!(self, Self::Whole)
    }

    /// The changed key, if any.
    #[must_use]
    pub const fn key(&self) -> Option<&K> {
        match self {
            Self::Whole => None,
            Self::Key(k) => Some(k),
        }
    }

    /// Borrowing view of the tag.
    #[must_use]
    pub const fn as_ref(&self) -> Changed<&K> {
        match self {
            Self::Whole => Changed::Whole,
            Self::Key(k) => Changed::Key(k),
        }
    }
}

impl<K: PartialEq> Changed<K> {
    /// True when the change is keyed and the key is one of `keys`.
    ///
    /// A whole-value change matches nothing here: listeners filtered by key
    /// only care about individual keys.
    #[must_use]
    pub fn matches_any(&self, keys: &[K]) -> bool {
        match self {
            Self::Whole => false,
            Self::Key(k) => keys.contains(k),
        }
    }
}

impl<K: fmt::Display> fmt::Display for Changed<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Whole => f.write_str("<whole>"),
            Self::Key(k) => write!(f, "{k}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    #[test]
    fn whole_has_no_key() {
        let c: Changed<Infallible> = Changed::Whole;
        assert!(c.is_whole());
        assert!(c.key().is_none());
    }

    #[test]
    fn key_accessor() {
        let c = Changed::Key("name");
        assert!(!c.is_whole());
        assert_eq!(c.key(), Some(&"name"));
        assert_eq!(c.as_ref(), Changed::Key(&"name"));
    }

    #[test]
    fn matches_any_only_keys() {
        let keys = ["a", "b"];
        assert!(Changed::Key("a").matches_any(&keys));
        assert!(!Changed::Key("c").matches_any(&keys));
        assert!(!Changed::<&str>::Whole.matches_any(&keys));
    }

    #[test]
    fn display() {
        assert_eq!(Changed::<&str>::Whole.to_string(), "<whole>");
        assert_eq!(Changed::Key("title").to_string(), "title");
    }
}
