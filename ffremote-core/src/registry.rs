use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

/// Concurrent map limited to insert-if-absent, lookup and removal. Stored
/// values are never mutated in place.
#[derive(Debug)]
pub struct Registry<K, V> {
    entries: Mutex<HashMap<K, Arc<V>>>,
    inserted: Notify,
}

impl<K, V> Registry<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            inserted: Notify::new(),
        }
    }

    /// Returns `false`, leaving the existing entry, when `key` is taken.
    pub fn insert(&self, key: K, value: Arc<V>) -> bool {
        {
            let mut entries = self.lock();
            if entries.contains_key(&key) {
                return false;
            }
            entries.insert(key, value);
        }
        self.inserted.notify_waiters();
        true
    }

    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        self.lock().get(key).cloned()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.lock().contains_key(key)
    }

    pub fn remove(&self, key: &K) -> Option<Arc<V>> {
        self.lock().remove(key)
    }

    pub fn keys(&self) -> Vec<K> {
        self.lock().keys().cloned().collect()
    }

    pub fn values(&self) -> Vec<Arc<V>> {
        self.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Resolves once `key` is present. Callers bound this with a timeout or a
    /// cancellation token.
    pub async fn wait_for(&self, key: &K) -> Arc<V> {
        loop {
            let notified = self.inserted.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(value) = self.get(key) {
                return value;
            }
            notified.await;
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, Arc<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K, V> Default for Registry<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
