//! Digest-keyed hash index from component values to entity ids.
//!
//! A [`ValueIndex`] answers "which entities hold a value equal to X" without
//! scanning every entity. Buckets are keyed by [`Hashable::digest`], not by
//! deep equality.

use std::collections::{HashMap, HashSet};

use crate::entity::EntityId;
use crate::hashable::Hashable;

/// Maps a digest string to the set of entity ids whose value hashes to it.
///
/// Invariant: no bucket is ever empty. A bucket is deleted as soon as its
/// last id is removed, so [`has`](Self::has) and
/// [`count_keys`](Self::count_keys) stay exact.
#[derive(Debug, Clone, Default)]
pub struct ValueIndex {
    buckets: HashMap<String, HashSet<EntityId>>,
    /// Total ids across all buckets.
    len: usize,
}

impl ValueIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `id` into the bucket for `key`. Idempotent.
    pub fn add<K: Hashable + ?Sized>(&mut self, key: &K, id: EntityId) {
        self.add_digest(key.digest(), id);
    }

    /// Insert `id` under a precomputed digest.
    pub(crate) fn add_digest(&mut self, digest: String, id: EntityId) {
        if self.buckets.entry(digest).or_default().insert(id) {
            self.len += 1;
        }
    }

    /// Remove `id` from the bucket for `key`.
    ///
    /// Returns `false` if the digest has no bucket or `id` was not in it.
    pub fn remove<K: Hashable + ?Sized>(&mut self, key: &K, id: EntityId) -> bool {
        self.remove_digest(&key.digest(), id)
    }

    pub(crate) fn remove_digest(&mut self, digest: &str, id: EntityId) -> bool {
        let Some(bucket) = self.buckets.get_mut(digest) else {
            return false;
        };
        if !bucket.remove(&id) {
            return false;
        }
        self.len -= 1;
        if bucket.is_empty() {
            self.buckets.remove(digest);
        }
        true
    }

    /// Ids in the bucket for `key`, in no particular order. Empty if unknown.
    pub fn get<K: Hashable + ?Sized>(&self, key: &K) -> Vec<EntityId> {
        self.buckets
            .get(&key.digest())
            .map(|bucket| bucket.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Whether any id is currently stored under `key`'s digest.
    pub fn has<K: Hashable + ?Sized>(&self, key: &K) -> bool {
        self.buckets.contains_key(&key.digest())
    }

    /// Whether `id` is currently in `key`'s bucket.
    pub fn has_value<K: Hashable + ?Sized>(&self, key: &K, id: EntityId) -> bool {
        self.buckets
            .get(&key.digest())
            .is_some_and(|bucket| bucket.contains(&id))
    }

    /// Cardinality of `key`'s bucket, 0 if absent.
    pub fn count<K: Hashable + ?Sized>(&self, key: &K) -> usize {
        self.buckets.get(&key.digest()).map_or(0, HashSet::len)
    }

    /// Number of distinct digests tracked.
    pub fn count_keys(&self) -> usize {
        self.buckets.len()
    }

    /// Total number of ids across all buckets.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the index holds no ids.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Drop every bucket.
    pub fn clear(&mut self) {
        self.buckets.clear();
        self.len = 0;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: u64) -> EntityId {
        EntityId::from_raw(raw)
    }

    #[test]
    fn add_and_get() {
        let mut index = ValueIndex::new();
        index.add("red", id(1));
        index.add("red", id(2));
        index.add("blue", id(3));

        let mut red = index.get("red");
        red.sort();
        assert_eq!(red, vec![id(1), id(2)]);
        assert_eq!(index.get("blue"), vec![id(3)]);
        assert_eq!(index.count_keys(), 2);
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn add_is_idempotent() {
        let mut index = ValueIndex::new();
        index.add("red", id(1));
        index.add("red", id(1));
        assert_eq!(index.count("red"), 1);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn get_unknown_key_is_empty() {
        let index = ValueIndex::new();
        assert!(index.get("missing").is_empty());
        assert!(!index.has("missing"));
        assert_eq!(index.count("missing"), 0);
    }

    #[test]
    fn remove_unknown_digest_reports_failure() {
        let mut index = ValueIndex::new();
        assert!(!index.remove("missing", id(1)));
        index.add("red", id(1));
        assert!(!index.remove("red", id(2)));
    }

    #[test]
    fn emptied_bucket_is_deleted() {
        let mut index = ValueIndex::new();
        index.add("red", id(1));
        index.add("blue", id(2));
        assert!(index.remove("red", id(1)));

        assert!(!index.has("red"));
        assert_eq!(index.count_keys(), 1);
        assert!(index.has("blue"));
    }

    #[test]
    fn has_value_tracks_membership() {
        let mut index = ValueIndex::new();
        index.add(&7u32, id(1));
        assert!(index.has_value(&7u32, id(1)));
        assert!(!index.has_value(&7u32, id(2)));
        assert!(!index.has_value(&8u32, id(1)));
    }

    #[test]
    fn clear_drops_everything() {
        let mut index = ValueIndex::new();
        index.add("a", id(1));
        index.add("b", id(2));
        index.clear();
        assert!(index.is_empty());
        assert_eq!(index.count_keys(), 0);
    }
}
