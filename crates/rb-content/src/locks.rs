//! Keyed async mutexes serializing read-then-write sections on persisted records.

use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One lazily created mutex per key. Keys are never reclaimed; a board holds
/// at most a few dozen live threads so the map stays small.
pub(crate) struct LockRegistry<K> {
    locks: DashMap<K, Arc<Mutex<()>>>,
}

impl<K: Eq + Hash + Clone> LockRegistry<K> {
    pub(crate) fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    pub(crate) async fn lock(&self, key: &K) -> OwnedMutexGuard<()> {
        // Clone the Arc out so the shard guard is released before awaiting.
        let lock = self.locks.entry(key.clone()).or_default().clone();
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_is_exclusive() {
        let registry = Arc::new(LockRegistry::new());
        let guard = registry.lock(&("b".to_string(), 1u64)).await;

        let contender = {
            let registry = registry.clone();
            tokio::spawn(async move {
                let _g = registry.lock(&("b".to_string(), 1u64)).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        // A different key is not held up.
        let _other = registry.lock(&("b".to_string(), 2u64)).await;

        drop(guard);
        contender.await.unwrap();
    }
}
