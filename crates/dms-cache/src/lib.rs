//! # dms-cache
//!
//! Size-aware random-replacement cache.
//!
//! [`ReplacementCache`] bounds the total *size* of its entries (not their
//! count). Each entry carries a caller-supplied size; when an insertion pushes
//! the total over capacity, uniformly random resident entries are evicted
//! until it fits again. No recency or frequency metadata is kept, so both
//! admission and eviction are O(1) amortized.
//!
//! All operations take a single mutex scoped to the cache instance. The lock
//! only covers in-memory bookkeeping; values are cloned out before it is
//! released.

use std::collections::HashMap;
use std::hash::Hash;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use serde::Serialize;

struct Entry<V> {
    value: V,
    size: u64,
}

struct State<K, V> {
    table: HashMap<K, Entry<V>>,
    /// Live keys, sampled uniformly for eviction.
    keys: Vec<K>,
    /// Wide enough that a replacement landing on top of a near-full cache
    /// cannot wrap before eviction brings it back under capacity.
    size: u128,
    rng: Box<dyn RngCore + Send>,
}

/// Capacity-bounded cache with uniformly random eviction.
pub struct ReplacementCache<K, V> {
    capacity: u64,
    state: Mutex<State<K, V>>,
}

/// Point-in-time copy of a cache's contents, for persistence or inspection.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot<K, V> {
    pub capacity: u64,
    pub size: u64,
    /// Unordered.
    pub items: Vec<(K, V)>,
}

impl<K, V> ReplacementCache<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Create a cache holding at most `capacity` size units, evicting with an
    /// entropy-seeded RNG.
    pub fn new(capacity: u64) -> Self {
        Self::with_rng(capacity, StdRng::from_entropy())
    }

    /// Create a cache that samples eviction victims from `rng`.
    ///
    /// Pass a seeded generator to make eviction reproducible.
    pub fn with_rng(capacity: u64, rng: impl RngCore + Send + 'static) -> Self {
        Self {
            capacity,
            state: Mutex::new(State {
                table: HashMap::new(),
                keys: Vec::new(),
                size: 0,
                rng: Box::new(rng),
            }),
        }
    }

    /// Insert or replace `key`.
    ///
    /// Returns `false` without touching the cache when `size` exceeds the
    /// capacity. Otherwise the entry is stored and random entries (possibly
    /// including this one) are evicted until the total fits.
    pub fn set(&self, key: K, value: V, size: u64) -> bool {
        if size > self.capacity {
            tracing::trace!(size, capacity = self.capacity, "cache rejected oversize entry");
            return false;
        }

        let capacity = u128::from(self.capacity);
        let mut state = self.state.lock();
        let state = &mut *state;

        match state.table.get_mut(&key) {
            Some(entry) => {
                // Remove the old size first so shrinking never underflows.
                state.size = state.size - u128::from(entry.size) + u128::from(size);
                entry.value = value;
                entry.size = size;
            }
            None => {
                state.keys.push(key.clone());
                state.table.insert(key, Entry { value, size });
                state.size += u128::from(size);
            }
        }

        let mut evicted = 0usize;
        while state.size > capacity && !state.keys.is_empty() {
            let victim = state.rng.gen_range(0..state.keys.len());
            let key = state.keys.swap_remove(victim);
            if let Some(entry) = state.table.remove(&key) {
                state.size -= u128::from(entry.size);
            }
            evicted += 1;
        }
        if evicted > 0 {
            tracing::trace!(evicted, size = narrow(state.size), "cache evicted entries");
        }

        true
    }

    /// Total size of all resident entries.
    pub fn size(&self) -> u64 {
        narrow(self.state.lock().size)
    }

    /// Number of resident entries.
    pub fn len(&self) -> usize {
        self.state.lock().keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Whether `key` is resident.
    pub fn contains(&self, key: &K) -> bool {
        self.state.lock().table.contains_key(key)
    }
}

impl<K, V> ReplacementCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Look up `key`. Absence is not an error.
    pub fn get(&self, key: &K) -> Option<V> {
        self.state.lock().table.get(key).map(|e| e.value.clone())
    }

    /// Unordered copy of every resident `(key, value)` pair.
    pub fn items(&self) -> Vec<(K, V)> {
        self.state
            .lock()
            .table
            .iter()
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect()
    }

    /// Capture capacity, size and items under one lock acquisition.
    pub fn snapshot(&self) -> Snapshot<K, V> {
        let state = self.state.lock();
        Snapshot {
            capacity: self.capacity,
            size: narrow(state.size),
            items: state
                .table
                .iter()
                .map(|(k, e)| (k.clone(), e.value.clone()))
                .collect(),
        }
    }
}

/// Between calls the total never exceeds the `u64` capacity.
fn narrow(size: u128) -> u64 {
    u64::try_from(size).unwrap_or(u64::MAX)
}

impl<K, V> std::fmt::Debug for ReplacementCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ReplacementCache")
            .field("capacity", &self.capacity)
            .field("size", &narrow(state.size))
            .field("len", &state.keys.len())
            .finish()
    }
}
