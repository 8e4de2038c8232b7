use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Registry of per-key async mutexes.
///
/// Holders of different keys never contend; holders of the same key are
/// serialized. Idle entries are dropped when the last guard goes away.
pub struct KeyedLocks<K: Eq + Hash> {
    locks: Arc<DashMap<K, Arc<Mutex<()>>>>,
}

/// Exclusive hold on one key
pub struct KeyGuard<K: Eq + Hash> {
    guard: Option<OwnedMutexGuard<()>>,
    key: Option<K>,
    locks: Arc<DashMap<K, Arc<Mutex<()>>>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self {
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Wait for exclusive access to `key`
    pub async fn lock(&self, key: &K) -> KeyGuard<K> {
        // Clone the Arc under the shard lock, then await outside of it
        let mutex = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let guard = mutex.lock_owned().await;

        KeyGuard {
            guard: Some(guard),
            key: Some(key.clone()),
            locks: self.locks.clone(),
        }
    }

    /// Number of keys currently held or waited on
    pub fn active(&self) -> usize {
        self.locks.len()
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash> Drop for KeyGuard<K> {
    fn drop(&mut self) {
        drop(self.guard.take());
        if let Some(key) = self.key.take() {
            // Only the registry still references the mutex: nobody is waiting
            self.locks
                .remove_if(&key, |_, mutex| Arc::strong_count(mutex) == 1);
        }
    }
}
