use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

const PRUNE_THRESHOLD: usize = 1024;

/// Per-key async mutexes, used to serialize work on one booking or one seat.
#[derive(Default)]
pub struct LockRegistry {
    locks: Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
}

/// Guards for every key of one `acquire` call; released on drop
pub struct LockSet {
    guards: Vec<OwnedMutexGuard<()>>,
}

impl LockSet {
    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock all keys. Keys are taken in sorted order so two callers with
    /// overlapping key sets cannot deadlock.
    pub async fn acquire(&self, keys: impl IntoIterator<Item = Uuid>) -> LockSet {
        let ordered: BTreeSet<Uuid> = keys.into_iter().collect();

        let mutexes: Vec<Arc<AsyncMutex<()>>> = {
            let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if locks.len() > PRUNE_THRESHOLD {
                locks.retain(|_, m| Arc::strong_count(m) > 1);
            }
            ordered
                .iter()
                .map(|key| locks.entry(*key).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone())
                .collect()
        };

        let mut guards = Vec::with_capacity(mutexes.len());
        for mutex in mutexes {
            guards.push(mutex.lock_owned().await);
        }
        LockSet { guards }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let registry = Arc::new(LockRegistry::new());
        let key = Uuid::new_v4();

        let held = registry.acquire([key]).await;
        let contender = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.acquire([key]).await.len() })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(held);
        assert_eq!(contender.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_keys_collapse() {
        let registry = LockRegistry::new();
        let key = Uuid::new_v4();
        let set = registry.acquire([key, key, Uuid::new_v4()]).await;
        assert_eq!(set.len(), 2);
    }
}
