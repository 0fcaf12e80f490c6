//! Memoized lookups shared across one run.
//!
//! The cache is an explicit value handed to whoever needs it. Cloning shares
//! the underlying table, so a test can pre-warm one and inspect it afterwards.

use crate::instances::Flavor;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

pub type Shared<T> = Arc<Mutex<T>>;

/// Flavor attributes by `instance_type_id`.
pub type FlavorCache = LookupCache<i64, Flavor>;

#[derive(Debug)]
pub struct LookupCache<K, V> {
    entries: Shared<HashMap<K, V>>,
    capacity: Option<usize>,
}

impl<K, V> Clone for LookupCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            capacity: self.capacity,
        }
    }
}

impl<K, V> Default for LookupCache<K, V> {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl<K, V> LookupCache<K, V> {
    pub fn unbounded() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            capacity: None,
        }
    }

    /// Once `capacity` entries are held, further misses are looked up
    /// every time and not stored.
    pub fn bounded(capacity: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            capacity: Some(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl<K: Eq + Hash, V: Clone> LookupCache<K, V> {
    /// Pre-populated cache.
    pub fn with_entries(entries: impl IntoIterator<Item = (K, V)>) -> Self {
        let cache = Self::unbounded();
        cache.entries.lock().extend(entries);
        cache
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.lock().contains_key(key)
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.entries.lock().get(key).cloned()
    }

    /// Cached value for `key`, or the result of `lookup`. The lock is not
    /// held while `lookup` runs; failed lookups are not cached.
    pub fn get_or_try_insert_with<E>(
        &self,
        key: K,
        lookup: impl FnOnce(&K) -> Result<V, E>,
    ) -> Result<V, E> {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }
        let value = lookup(&key)?;
        let mut entries = self.entries.lock();
        let full = self.capacity.is_some_and(|cap| entries.len() >= cap);
        if !full {
            entries.entry(key).or_insert_with(|| value.clone());
        }
        Ok(value)
    }
}
