//! Keyed diffs of lists and maps.

use std::collections::BTreeMap;
use std::hash::Hash;

use indexmap::IndexMap;

/// The result of [`diff_lists`].
///
/// Entries keep the order of the list they came from; callers that need
/// stack order re-sort them.
#[derive(Clone, Debug, PartialEq)]
pub struct ListDiff<T> {
    /// Items whose key only appears in the base list.
    pub removed_from_base: Vec<T>,
    /// Items whose key only appears in the other list.
    pub added_in_other: Vec<T>,
    /// `(base, other)` pairs sharing a key.
    pub common: Vec<(T, T)>,
}

impl<T> Default for ListDiff<T> {
    fn default() -> Self {
        Self {
            removed_from_base: Vec::new(),
            added_in_other: Vec::new(),
            common: Vec::new(),
        }
    }
}

/// Matches the items of two lists by key. When several items share a key
/// the last one wins.
pub fn diff_lists<T, K, F>(
    base: impl IntoIterator<Item = T>,
    other: impl IntoIterator<Item = T>,
    key: F,
) -> ListDiff<T>
where
    K: Hash + Eq,
    F: Fn(&T) -> K,
{
    let base: IndexMap<K, T> = base.into_iter().map(|item| (key(&item), item)).collect();
    let mut other: IndexMap<K, T> = other.into_iter().map(|item| (key(&item), item)).collect();

    let mut diff = ListDiff::default();
    for (k, b) in base {
        match other.shift_remove(&k) {
            Some(o) => diff.common.push((b, o)),
            None => diff.removed_from_base.push(b),
        }
    }
    diff.added_in_other = other.into_values().collect();
    diff
}

/// The result of [`diff_maps`].
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct MapDiff<K: Ord, V> {
    /// Keys only in the base map.
    pub removed: Vec<K>,
    /// Entries only in the other map.
    pub added: BTreeMap<K, V>,
    /// Entries in both maps whose values differ, with the other map's value.
    pub modified: BTreeMap<K, V>,
}

impl<K: Ord, V> MapDiff<K, V> {
    /// Whether the maps were equal.
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty() && self.modified.is_empty()
    }
}

/// Diffs two ordered maps.
pub fn diff_maps<K: Ord + Clone, V: PartialEq + Clone>(
    base: &BTreeMap<K, V>,
    other: &BTreeMap<K, V>,
) -> MapDiff<K, V> {
    let removed = base
        .keys()
        .filter(|k| !other.contains_key(*k))
        .cloned()
        .collect();
    let mut added = BTreeMap::new();
    let mut modified = BTreeMap::new();
    for (k, v) in other {
        match base.get(k) {
            None => {
                added.insert(k.clone(), v.clone());
            }
            Some(b) if b != v => {
                modified.insert(k.clone(), v.clone());
            }
            Some(_) => {}
        }
    }
    MapDiff {
        removed,
        added,
        modified,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn lists_are_matched_by_key() {
        let base = [(1, "a"), (2, "b"), (3, "c")];
        let other = [(3, "C"), (4, "d"), (1, "a")];
        let diff = diff_lists(base, other, |(k, _)| *k);
        assert_eq!(diff.removed_from_base, vec![(2, "b")]);
        assert_eq!(diff.added_in_other, vec![(4, "d")]);
        assert_eq!(diff.common, vec![((1, "a"), (1, "a")), ((3, "c"), (3, "C"))]);
    }

    #[test]
    fn empty_lists() {
        let diff = diff_lists(Vec::<u8>::new(), vec![], |x| *x);
        assert_eq!(diff, ListDiff::default());
    }

    #[test]
    fn maps() {
        let base = BTreeMap::from([("a", 1), ("b", 2), ("c", 3)]);
        let other = BTreeMap::from([("b", 2), ("c", 4), ("d", 5)]);
        let diff = diff_maps(&base, &other);
        assert_eq!(diff.removed, vec!["a"]);
        assert_eq!(diff.added, BTreeMap::from([("d", 5)]));
        assert_eq!(diff.modified, BTreeMap::from([("c", 4)]));
        assert!(diff_maps(&base, &base).is_empty());
    }
}
