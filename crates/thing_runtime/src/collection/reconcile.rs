//! Membership reconciliation between a collection and a proposed member list

use std::collections::HashSet;
use std::hash::Hash;

/// Members to add and remove to turn `current` into `proposed`
#[derive(Debug, Clone, PartialEq)]
pub struct Delta<T> {
    /// In arrival order within `proposed`
    pub add: Vec<T>,
    /// In `current` order
    pub remove: Vec<T>,
}

impl<T> Delta<T> {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

/// Diff `current` against `proposed` by key
///
/// Duplicates in `proposed` are added once.
pub fn reconcile<T, K, F>(current: &[T], proposed: &[T], key: F) -> Delta<T>
where
    T: Clone,
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let current_keys: HashSet<K> = current.iter().map(&key).collect();
    let mut confirmed: HashSet<K> = HashSet::new();
    let mut add = Vec::new();

    for item in proposed {
        let k = key(item);
        if confirmed.contains(&k) {
            continue;
        }
        if !current_keys.contains(&k) {
            add.push(item.clone());
        }
        confirmed.insert(k);
    }

    let remove = current
        .iter()
        .filter(|item| !confirmed.contains(&key(*item)))
        .cloned()
        .collect();

    Delta { add, remove }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(items: &[&'static str]) -> Vec<&'static str> {
        items.to_vec()
    }

    #[test]
    fn test_reconcile_identical_is_empty() {
        let a = ids(&["x", "y", "z"]);
        let delta = reconcile(&a, &a, |s| *s);
        assert!(delta.is_empty());
    }

    #[test]
    fn test_reconcile_add_and_remove() {
        let current = ids(&["a", "b", "c"]);
        let proposed = ids(&["c", "d", "a", "e"]);
        let delta = reconcile(&current, &proposed, |s| *s);
        assert_eq!(delta.add, vec!["d", "e"]);
        assert_eq!(delta.remove, vec!["b"]);
    }

    #[test]
    fn test_reconcile_duplicates_added_once() {
        let delta = reconcile(&[], &ids(&["a", "a", "b"]), |s: &&str| *s);
        assert_eq!(delta.add, vec!["a", "b"]);
        assert!(delta.remove.is_empty());
    }

    #[test]
    fn test_reconcile_to_empty() {
        let delta = reconcile(&ids(&["a", "b"]), &[], |s: &&str| *s);
        assert!(delta.add.is_empty());
        assert_eq!(delta.remove, vec!["a", "b"]);
    }
}
