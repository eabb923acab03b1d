//! Mutual exclusion keyed by name

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Lazily created async locks, one per key.
///
/// Holding the guard for a key excludes every other holder of that key;
/// different keys never contend.
#[derive(Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, key: &str) -> Arc<AsyncMutex<()>> {
        self.locks
            .lock()
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Wait for exclusive access to `key`
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let handle = self.handle(key);
        if let Ok(guard) = handle.clone().try_lock_owned() {
            return guard;
        }
        tracing::debug!(key, "waiting for in-flight holder");
        handle.lock_owned().await
    }

    /// Exclusive access to two keys, acquired in a fixed order
    pub async fn lock_pair(
        &self,
        a: &str,
        b: &str,
    ) -> (OwnedMutexGuard<()>, Option<OwnedMutexGuard<()>>) {
        if a == b {
            return (self.lock(a).await, None);
        }
        let (first, second) = if a < b { (a, b) } else { (b, a) };
        let first = self.lock(first).await;
        let second = self.lock(second).await;
        (first, Some(second))
    }

    pub fn is_locked(&self, key: &str) -> bool {
        self.locks
            .lock()
            .get(key)
            .is_some_and(|lock| lock.try_lock().is_err())
    }

    /// Drop the lock for `key` if nobody holds or waits on it
    pub fn remove(&self, key: &str) {
        let mut locks = self.locks.lock();
        if locks
            .get(key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(key);
        }
    }

    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for KeyedLocks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedLocks")
            .field("keys", &self.len())
            .finish()
    }
}
