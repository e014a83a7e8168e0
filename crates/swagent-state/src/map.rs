//! Ordered, structurally shared map used for every keyed collection.

use crate::node::NodeFields;
use serde::{Deserialize, Serialize};
use std::collections::btree_map;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Ordered map `K -> Arc<V>`.
///
/// Cloning copies only the `Arc` pointers, so two versions of a collection
/// share every entry neither of them changed. Entries are replaced on write
/// through [`get_mut`](NodeMap::get_mut), which clones a value only if another
/// version still holds it.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
#[serde(bound(
    serialize = "K: Serialize + Ord, V: Serialize",
    deserialize = "K: Deserialize<'de> + Ord, V: Deserialize<'de>"
))]
pub struct NodeMap<K, V> {
    entries: BTreeMap<K, Arc<V>>,
}

impl<K: Ord, V> NodeMap<K, V> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key).map(Arc::as_ref)
    }

    pub(crate) fn get_arc(&self, key: &K) -> Option<&Arc<V>> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Inserts or replaces an entry, returning the previous value.
    pub fn insert(&mut self, key: K, value: V) -> Option<Arc<V>> {
        self.entries.insert(key, Arc::new(value))
    }

    pub(crate) fn insert_arc(&mut self, key: K, value: Arc<V>) -> Option<Arc<V>> {
        self.entries.insert(key, value)
    }

    pub fn remove(&mut self, key: &K) -> Option<Arc<V>> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.values().map(Arc::as_ref)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries.iter().map(|(k, v)| (k, v.as_ref()))
    }

    pub(crate) fn arc_iter(&self) -> btree_map::Iter<'_, K, Arc<V>> {
        self.entries.iter()
    }

    /// Keeps only the entries for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(&K, &V) -> bool) {
        self.entries.retain(|k, v| keep(k, v));
    }
}

impl<K: Ord, V: Clone> NodeMap<K, V> {
    /// Mutable access to one entry, cloning it if another version shares it.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.entries.get_mut(key).map(Arc::make_mut)
    }
}

impl<K, V> Clone for NodeMap<K, V>
where
    K: Clone,
{
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<K: Ord, V> Default for NodeMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Clone, V> NodeFields for NodeMap<K, V> {}

impl<K: Ord, V> FromIterator<(K, V)> for NodeMap<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, v)| (k, Arc::new(v))).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_clone_shares_entries() {
        let mut map: NodeMap<u32, String> = NodeMap::new();
        map.insert(1, "one".to_string());
        map.insert(2, "two".to_string());

        let copy = map.clone();
        assert!(Arc::ptr_eq(
            map.get_arc(&1).unwrap(),
            copy.get_arc(&1).unwrap()
        ));
    }

    #[test]
    fn test_get_mut_clones_shared_entry_only() {
        let mut map: NodeMap<u32, String> = NodeMap::new();
        map.insert(1, "one".to_string());
        map.insert(2, "two".to_string());
        let copy = map.clone();

        map.get_mut(&1).unwrap().push('!');

        assert_eq!(map.get(&1).unwrap(), "one!");
        assert_eq!(copy.get(&1).unwrap(), "one");
        assert!(Arc::ptr_eq(
            map.get_arc(&2).unwrap(),
            copy.get_arc(&2).unwrap()
        ));
    }

    #[test]
    fn test_missing_key_is_not_created() {
        let mut map: NodeMap<u32, String> = NodeMap::new();
        assert!(map.get_mut(&7).is_none());
        assert!(map.is_empty());
    }

    #[test]
    fn test_iteration_in_key_order() {
        let map: NodeMap<u32, &str> = [(3, "c"), (1, "a"), (2, "b")].into_iter().collect();
        let keys: Vec<_> = map.keys().copied().collect();
        assert_eq!(keys, vec![1, 2, 3]);
    }
}
