//! In-process keyed locks for per-experiment serialization.
//!
//! Update and create operations targeting the same experiment id (or the
//! same (application, label) pair during create) must serialize; operations
//! on different keys proceed in parallel. Locks are held only for the
//! duration of one orchestration call and are never persisted.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// A registry of async mutexes keyed by an arbitrary hashable key.
///
/// Entries are created on first use and kept for the lifetime of the
/// registry; the population is bounded by the number of distinct
/// experiments the process has touched.
#[derive(Debug, Default)]
pub(crate) struct KeyedLocks<K> {
    entries: Mutex<HashMap<K, Arc<AsyncMutex<()>>>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Acquires the lock for `key`, waiting if another call holds it.
    pub(crate) async fn acquire(&self, key: K) -> OwnedMutexGuard<()> {
        let entry = {
            let mut entries = self
                .entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            Arc::clone(entries.entry(key).or_default())
        };
        entry.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_serializes() {
        let locks = Arc::new(KeyedLocks::new());
        let peak = Arc::new(AtomicUsize::new(0));
        let active = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = Arc::clone(&locks);
            let peak = Arc::clone(&peak);
            let active = Arc::clone(&active);
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire("same-key").await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_keys_run_in_parallel() {
        let locks = Arc::new(KeyedLocks::new());
        let first = locks.acquire("a").await;
        // A second key must not block behind the first.
        let second = locks.acquire("b").await;
        drop(first);
        drop(second);
    }
}
