//! Reconciliation diff helpers
//!
//! Compute which remote items to add, remove or update so that a remote
//! collection (hosts, users, databases, shards) converges on the desired
//! configuration. Everything here is pure: callers issue the remote calls.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;

/// Three-way diff between a current and a desired list
#[derive(Debug, Clone, PartialEq)]
pub struct Diff<K, T> {
    /// Desired items with no current counterpart, in desired order
    pub to_add: Vec<T>,

    /// Keys of current items with no desired counterpart, in current order
    pub to_remove: Vec<K>,

    /// Matched keys whose attributes differ, with the desired item
    pub to_update: Vec<(K, T)>,

    /// Matched keys that need no change
    pub unchanged: Vec<K>,
}

impl<K, T> Default for Diff<K, T> {
    fn default() -> Self {
        Self {
            to_add: Vec::new(),
            to_remove: Vec::new(),
            to_update: Vec::new(),
            unchanged: Vec::new(),
        }
    }
}

impl<K, T> Diff<K, T> {
    /// Whether applying the diff would change anything
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty() && self.to_update.is_empty()
    }

    /// All keys present on both sides
    pub fn matched_keys(&self) -> impl Iterator<Item = &K> {
        self.to_update.iter().map(|(k, _)| k).chain(self.unchanged.iter())
    }

    pub fn summary(&self) -> DiffSummary {
        DiffSummary {
            add: self.to_add.len(),
            update: self.to_update.len(),
            remove: self.to_remove.len(),
            unchanged: self.unchanged.len(),
        }
    }
}

/// Counts of a diff, for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiffSummary {
    pub add: usize,
    pub update: usize,
    pub remove: usize,
    pub unchanged: usize,
}

impl std::fmt::Display for DiffSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to add, {} to update, {} to remove, {} unchanged",
            self.add, self.update, self.remove, self.unchanged
        )
    }
}

/// Diff two lists whose items carry a unique natural key.
///
/// `equal` compares the mutable attributes of a matched pair
/// `(current, desired)`. Duplicate keys within one list are not supported;
/// which duplicate gets matched is unspecified.
pub fn diff_by_key<T, K, F, E>(current: &[T], desired: &[T], key: F, equal: E) -> Diff<K, T>
where
    T: Clone,
    K: Eq + Hash + Clone,
    F: Fn(&T) -> K,
    E: Fn(&T, &T) -> bool,
{
    let mut unmatched: HashMap<K, &T> = current.iter().map(|item| (key(item), item)).collect();
    let mut diff = Diff::default();

    for wanted in desired {
        let k = key(wanted);
        match unmatched.remove(&k) {
            Some(existing) if equal(existing, wanted) => diff.unchanged.push(k),
            Some(_) => diff.to_update.push((k, wanted.clone())),
            None => diff.to_add.push(wanted.clone()),
        }
    }

    for item in current {
        let k = key(item);
        if unmatched.remove(&k).is_some() {
            diff.to_remove.push(k);
        }
    }

    diff
}

/// Diff two lists that only differ by membership (no mutable attributes).
pub fn diff_keys<T, K, F>(current: &[T], desired: &[T], key: F) -> Diff<K, T>
where
    T: Clone,
    K: Eq + Hash + Clone,
    F: Fn(&T) -> K,
{
    diff_by_key(current, desired, key, |_, _| true)
}

/// Pairing of two lists whose natural key may repeat
#[derive(Debug, Clone, PartialEq)]
pub struct Matching<'a, T> {
    /// Matched `(current, desired)` pairs, in current order
    pub matched: Vec<(&'a T, &'a T)>,

    /// Current items left without a desired counterpart, in current order
    pub unmatched_current: Vec<&'a T>,

    /// Desired items left without a current counterpart, in desired order
    pub unmatched_desired: Vec<&'a T>,
}

/// Match items sharing a non-unique key, one to one.
///
/// Items with equal keys form a group (for hosts: every host in one zone and
/// shard). Within a group, pairs that are already `equal` are matched first so
/// that no update is issued for them; the rest are paired in list order.
pub fn match_by_key<'a, T, K, F, E>(
    current: &'a [T],
    desired: &'a [T],
    key: F,
    equal: E,
) -> Matching<'a, T>
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
    E: Fn(&T, &T) -> bool,
{
    let mut groups: HashMap<K, VecDeque<usize>> = HashMap::new();
    for (idx, item) in desired.iter().enumerate() {
        groups.entry(key(item)).or_default().push_back(idx);
    }

    let mut pairs: Vec<Option<usize>> = vec![None; current.len()];
    let mut used: HashSet<usize> = HashSet::new();

    // Exact matches first.
    for (ci, item) in current.iter().enumerate() {
        if let Some(group) = groups.get_mut(&key(item)) {
            if let Some(pos) = group.iter().position(|&di| equal(item, &desired[di])) {
                if let Some(di) = group.remove(pos) {
                    pairs[ci] = Some(di);
                    used.insert(di);
                }
            }
        }
    }

    for (ci, item) in current.iter().enumerate() {
        if pairs[ci].is_some() {
            continue;
        }
        if let Some(di) = groups.get_mut(&key(item)).and_then(VecDeque::pop_front) {
            pairs[ci] = Some(di);
            used.insert(di);
        }
    }

    let mut matching = Matching {
        matched: Vec::new(),
        unmatched_current: Vec::new(),
        unmatched_desired: Vec::new(),
    };

    for (ci, pair) in pairs.into_iter().enumerate() {
        match pair {
            Some(di) => matching.matched.push((&current[ci], &desired[di])),
            None => matching.unmatched_current.push(&current[ci]),
        }
    }

    matching.unmatched_desired = desired
        .iter()
        .enumerate()
        .filter(|(idx, _)| !used.contains(idx))
        .map(|(_, item)| item)
        .collect();

    matching
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct User {
        name: &'static str,
        conn_limit: u32,
    }

    fn user(name: &'static str, conn_limit: u32) -> User {
        User { name, conn_limit }
    }

    fn diff_users(current: &[User], desired: &[User]) -> Diff<&'static str, User> {
        diff_by_key(current, desired, |u| u.name, |a, b| a.conn_limit == b.conn_limit)
    }

    #[test]
    fn test_partition_of_keys() {
        let current = vec![user("alice", 10), user("bob", 10), user("carol", 5)];
        let desired = vec![user("bob", 20), user("dave", 1), user("carol", 5)];

        let diff = diff_users(&current, &desired);

        let added: HashSet<_> = diff.to_add.iter().map(|u| u.name).collect();
        let removed: HashSet<_> = diff.to_remove.iter().copied().collect();
        let matched: HashSet<_> = diff.matched_keys().copied().collect();

        assert!(added.is_disjoint(&removed));
        assert!(added.is_disjoint(&matched));
        assert!(removed.is_disjoint(&matched));

        let all: HashSet<_> = added.union(&removed).chain(matched.iter()).copied().collect();
        let expected: HashSet<_> = current.iter().chain(desired.iter()).map(|u| u.name).collect();
        assert_eq!(all, expected);

        assert_eq!(diff.to_update, vec![("bob", user("bob", 20))]);
        assert_eq!(diff.unchanged, vec!["carol"]);
        assert_eq!(diff.to_remove, vec!["alice"]);
    }

    #[test]
    fn test_identical_lists_produce_no_changes() {
        let items = vec![user("alice", 10), user("bob", 3)];
        let diff = diff_users(&items, &items);

        assert!(diff.is_empty());
        assert_eq!(diff.unchanged.len(), 2);
    }

    #[test]
    fn test_empty_current_adds_everything_in_order() {
        let desired = vec![user("zed", 1), user("amy", 2), user("kim", 3)];
        let diff = diff_users(&[], &desired);

        assert_eq!(diff.to_add, desired);
        assert!(diff.to_remove.is_empty());
        assert!(diff.to_update.is_empty());
    }

    #[test]
    fn test_empty_desired_removes_everything() {
        let current = vec![user("zed", 1), user("amy", 2)];
        let diff = diff_users(&current, &[]);

        assert_eq!(diff.to_remove, vec!["zed", "amy"]);
        assert!(diff.to_add.is_empty());
    }

    #[test]
    fn test_diff_keys_ignores_attributes() {
        let current = vec![user("db1", 1)];
        let desired = vec![user("db1", 99), user("db2", 0)];
        let diff = diff_keys(&current, &desired, |u| u.name);

        assert_eq!(diff.unchanged, vec!["db1"]);
        assert_eq!(diff.to_add, vec![user("db2", 0)]);
        assert_eq!(diff.summary().to_string(), "1 to add, 0 to update, 0 to remove, 1 unchanged");
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Host {
        zone: &'static str,
        public_ip: bool,
    }

    #[test]
    fn test_match_prefers_equal_pairs_within_group() {
        let current = vec![
            Host { zone: "a", public_ip: false },
            Host { zone: "a", public_ip: true },
        ];
        let desired = vec![
            Host { zone: "a", public_ip: true },
            Host { zone: "a", public_ip: false },
        ];

        let m = match_by_key(&current, &desired, |h| h.zone, |a, b| a == b);

        assert_eq!(m.matched.len(), 2);
        assert!(m.matched.iter().all(|(c, d)| c == d));
        assert!(m.unmatched_current.is_empty());
        assert!(m.unmatched_desired.is_empty());
    }

    #[test]
    fn test_match_leftovers_by_count() {
        let current = vec![
            Host { zone: "a", public_ip: false },
            Host { zone: "a", public_ip: false },
            Host { zone: "b", public_ip: false },
        ];
        let desired = vec![
            Host { zone: "a", public_ip: false },
            Host { zone: "c", public_ip: false },
        ];

        let m = match_by_key(&current, &desired, |h| h.zone, |a, b| a == b);

        assert_eq!(m.matched.len(), 1);
        assert_eq!(m.unmatched_current.len(), 2);
        assert_eq!(m.unmatched_current[1].zone, "b");
        assert_eq!(m.unmatched_desired, vec![&desired[1]]);
    }
}
