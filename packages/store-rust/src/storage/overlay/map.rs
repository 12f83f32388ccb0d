//! Fixed-capacity, touch-ordered map of overlay entries.
//!
//! Each entry carries a touch stamp taken from a map-wide clock. Lookups
//! refresh the stamp through `&self`, so hits only need the overlay's read
//! lock. Admitting a new key into a full map evicts the entry with the
//! smallest stamp (least recently touched); the caller's write-back callback
//! sees the victim before it is dropped.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// One overlay slot. `value == None` marks a pending deletion.
#[derive(Debug)]
pub(crate) struct CacheEntry<V> {
    value: Option<V>,
    dirty: AtomicBool,
    touched: AtomicU64,
}

impl<V> CacheEntry<V> {
    fn new(value: Option<V>, dirty: bool, stamp: u64) -> Self {
        Self {
            value,
            dirty: AtomicBool::new(dirty),
            touched: AtomicU64::new(stamp),
        }
    }

    pub(crate) fn value(&self) -> Option<&V> {
        self.value.as_ref()
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Clears the dirty flag; `true` if this call was the one that cleared it.
    ///
    /// Eviction and flush both write back through this, so an entry is never
    /// written back twice for the same mutation.
    pub(crate) fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }

    fn stamp(&self) -> u64 {
        self.touched.load(Ordering::Relaxed)
    }
}

pub(crate) struct OverlayMap<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    capacity: usize,
    clock: AtomicU64,
}

impl<K, V> OverlayMap<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Creates an empty map holding at most `capacity` entries (at least one).
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: HashMap::with_capacity(capacity),
            capacity,
            clock: AtomicU64::new(0),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Returns the entry for `key` and marks it most recently used.
    pub(crate) fn lookup(&self, key: &K) -> Option<&CacheEntry<V>> {
        let entry = self.entries.get(key)?;
        entry.touched.store(self.tick(), Ordering::Relaxed);
        Some(entry)
    }

    /// Returns the entry for `key` without touching it.
    #[cfg(test)]
    pub(crate) fn peek(&self, key: &K) -> Option<&CacheEntry<V>> {
        self.entries.get(key)
    }

    /// Stores `value` under `key` as the most recently used entry.
    ///
    /// Replacing an existing key keeps it dirty if it already was. Admitting
    /// a new key into a full map first evicts the least recently used entry:
    /// `write_back` is called with it, then it is dropped and its key
    /// returned.
    pub(crate) fn insert(
        &mut self,
        key: K,
        value: Option<V>,
        dirty: bool,
        write_back: impl FnOnce(&K, &CacheEntry<V>),
    ) -> Option<K> {
        let stamp = self.tick();
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.value = value;
            if dirty {
                entry.dirty.store(true, Ordering::Release);
            }
            entry.touched.store(stamp, Ordering::Relaxed);
            return None;
        }

        let evicted = if self.entries.len() >= self.capacity {
            self.evict_least_recent(write_back)
        } else {
            None
        };
        self.entries.insert(key, CacheEntry::new(value, dirty, stamp));
        evicted
    }

    /// Drops `key` without writing it back.
    #[cfg(test)]
    pub(crate) fn remove(&mut self, key: &K) -> Option<CacheEntry<V>> {
        self.entries.remove(key)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&K, &CacheEntry<V>)> {
        self.entries.iter()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    /// The key that the next eviction would drop.
    pub(crate) fn least_recent(&self) -> Option<&K> {
        self.entries
            .iter()
            .min_by_key(|(_, entry)| entry.stamp())
            .map(|(key, _)| key)
    }

    fn evict_least_recent(&mut self, write_back: impl FnOnce(&K, &CacheEntry<V>)) -> Option<K> {
        let victim = self.least_recent()?.clone();
        let entry = self.entries.remove(&victim)?;
        write_back(&victim, &entry);
        Some(victim)
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use proptest::prelude::*;

    use super::*;

    fn no_write_back(_: &u32, _: &CacheEntry<u32>) {
        panic!("unexpected eviction");
    }

    #[test]
    fn insert_and_lookup() {
        let mut map = OverlayMap::new(2);
        map.insert(1, Some(10), true, no_write_back);

        let entry = map.lookup(&1).unwrap();
        assert_eq!(entry.value(), Some(&10));
        assert!(entry.is_dirty());
        assert_eq!(map.len(), 1);
        assert!(map.lookup(&2).is_none());
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let map: OverlayMap<u32, u32> = OverlayMap::new(0);
        assert_eq!(map.capacity(), 1);
    }

    #[test]
    fn full_map_evicts_least_recently_touched() {
        let mut map = OverlayMap::new(2);
        map.insert(1, Some(10), true, no_write_back);
        map.insert(2, Some(20), true, no_write_back);
        map.lookup(&1);

        let mut written = Vec::new();
        let evicted = map.insert(3, Some(30), true, |key, entry| {
            written.push((*key, entry.value().copied(), entry.take_dirty()));
        });

        assert_eq!(evicted, Some(2));
        assert_eq!(written, vec![(2, Some(20), true)]);
        assert!(map.contains_key(&1));
        assert!(map.contains_key(&3));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn reinserting_an_existing_key_refreshes_it_without_evicting() {
        let mut map = OverlayMap::new(2);
        map.insert(1, Some(10), true, no_write_back);
        map.insert(2, Some(20), true, no_write_back);
        assert_eq!(map.least_recent(), Some(&1));

        assert_eq!(map.insert(1, Some(11), false, no_write_back), None);
        assert_eq!(map.least_recent(), Some(&2));

        let entry = map.peek(&1).unwrap();
        assert_eq!(entry.value(), Some(&11));
        assert!(entry.is_dirty(), "a clean re-insert keeps the dirty flag");
    }

    #[test]
    fn peek_does_not_refresh() {
        let mut map = OverlayMap::new(2);
        map.insert(1, Some(10), false, no_write_back);
        map.insert(2, Some(20), false, no_write_back);
        map.peek(&1);
        assert_eq!(map.least_recent(), Some(&1));
    }

    #[test]
    fn take_dirty_clears_exactly_once() {
        let mut map = OverlayMap::new(1);
        map.insert(1, None, true, no_write_back);
        let entry = map.peek(&1).unwrap();

        assert!(entry.take_dirty());
        assert!(!entry.take_dirty());
        assert!(!entry.is_dirty());
        assert_eq!(entry.value(), None);
    }

    #[test]
    fn remove_and_clear() {
        let mut map = OverlayMap::new(3);
        map.insert(1, Some(10), false, no_write_back);
        map.insert(2, Some(20), false, no_write_back);

        assert!(map.remove(&1).is_some());
        assert!(!map.contains_key(&1));

        map.clear();
        assert!(map.is_empty());
        assert_eq!(map.least_recent(), None);
        assert_eq!(map.iter().count(), 0);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Insert(u8),
        Lookup(u8),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![(0_u8..12).prop_map(Op::Insert), (0_u8..12).prop_map(Op::Lookup)]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// The map agrees with a plain LRU list: same residents, same victims.
        #[test]
        fn behaves_like_an_lru_list(
            capacity in 1_usize..6,
            ops in proptest::collection::vec(op(), 1..120),
        ) {
            let mut map: OverlayMap<u8, u8> = OverlayMap::new(capacity);
            // Front is least recently used.
            let mut model: VecDeque<u8> = VecDeque::new();

            for op in ops {
                match op {
                    Op::Insert(key) => {
                        let mut written = Vec::new();
                        let evicted = map.insert(key, Some(key), true, |k, _| written.push(*k));

                        let expected = if let Some(pos) = model.iter().position(|k| *k == key) {
                            model.remove(pos);
                            None
                        } else if model.len() == capacity {
                            model.pop_front()
                        } else {
                            None
                        };
                        model.push_back(key);

                        prop_assert_eq!(evicted, expected);
                        prop_assert_eq!(written, expected.into_iter().collect::<Vec<_>>());
                    }
                    Op::Lookup(key) => {
                        let found = map.lookup(&key).is_some();
                        let pos = model.iter().position(|k| *k == key);
                        prop_assert_eq!(found, pos.is_some());
                        if let Some(pos) = pos {
                            model.remove(pos);
                            model.push_back(key);
                        }
                    }
                }

                prop_assert!(map.len() <= capacity);
                prop_assert_eq!(map.len(), model.len());
                prop_assert_eq!(map.least_recent(), model.front());
            }
        }
    }
}
