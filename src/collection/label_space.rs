//! Label-space: `(label -> int)` bindings keying collection entries.

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Sorted set of label bindings.
///
/// A *full* label-space binds every label declared on a collection; a
/// *query* binds any subset. An entry matches a query iff the two agree on
/// every label present in the query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LabelSpace(BTreeMap<String, i32>);

impl LabelSpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, label: impl Into<String>, value: i32) -> Self {
        self.insert(label, value);
        self
    }

    /// Returns the previous value bound to `label`.
    pub fn insert(&mut self, label: impl Into<String>, value: i32) -> Option<i32> {
        self.0.insert(label.into(), value)
    }

    pub fn get(&self, label: &str) -> Option<i32> {
        self.0.get(label).copied()
    }

    pub fn contains(&self, label: &str) -> bool {
        self.0.contains_key(label)
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i32)> {
        self.0.iter().map(|(k, &v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether `self` agrees with every binding of `query`.
    pub fn matches(&self, query: &LabelSpace) -> bool {
        query.iter().all(|(k, v)| self.get(k) == Some(v))
    }
}

impl fmt::Display for LabelSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.iter().map(|(k, v)| format!("{k}: {v}")).join(", "))
    }
}

impl<K: Into<String>> FromIterator<(K, i32)> for LabelSpace {
    fn from_iter<I: IntoIterator<Item = (K, i32)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl<K: Into<String>, const N: usize> From<[(K, i32); N]> for LabelSpace {
    fn from(pairs: [(K, i32); N]) -> Self {
        pairs.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_space_matching() {
        let entry = LabelSpace::from([("body", 1), ("time", 3)]);
        assert!(entry.matches(&LabelSpace::from([("time", 3)])));
        assert!(entry.matches(&LabelSpace::new()));
        assert!(!entry.matches(&LabelSpace::from([("time", 1)])));
        assert!(!entry.matches(&LabelSpace::from([("zone", 1)])));
    }

    #[test]
    fn display_is_sorted() {
        let ls = LabelSpace::from([("time", 2), ("body", 1)]);
        assert_eq!(ls.to_string(), "{body: 1, time: 2}");
    }
}
