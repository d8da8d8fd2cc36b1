//! Named locks created on first use.
//!
//! The registry maps an arbitrary string key to an async mutex. Entries are
//! inserted atomically through the [`DashMap`] entry API, so two tasks racing
//! on a brand-new key always end up sharing one mutex.
//!
//! Each lock also carries a `held` flag maintained by [`NamedLockGuard`], so
//! status checks such as [`NamedLockRegistry::is_locked`] never touch the
//! mutex and cannot make a concurrent [`try_acquire`] fail.
//!
//! Entries are never removed. The registry grows by one entry per distinct
//! key for its whole lifetime, which is fine for the small, fixed set of
//! operation names (`"buy"`, `"cancel_orders"`, ...) it is meant for. Do not
//! key it on unbounded input such as order ids.
//!
//! [`try_acquire`]: NamedLockRegistry::try_acquire

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

/// Mutex plus a holder flag readable without locking.
#[derive(Debug, Default)]
struct LockState {
    mutex: Arc<Mutex<()>>,
    held: AtomicBool,
}

impl LockState {
    fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

/// Registry of lazily-created named locks.
#[derive(Debug, Default)]
pub struct NamedLockRegistry {
    locks: DashMap<String, Arc<LockState>>,
}

impl NamedLockRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the lock for `key`, creating it if this is the first use.
    pub fn lock(&self, key: &str) -> NamedLock {
        // Fast path avoids allocating the key for locks that already exist.
        let existing = self.locks.get(key).map(|entry| Arc::clone(entry.value()));
        let state = match existing {
            Some(state) => state,
            None => {
                let entry = self.locks.entry(key.to_owned()).or_insert_with(|| {
                    trace!(key, "Creating named lock");
                    Arc::new(LockState::default())
                });
                Arc::clone(entry.value())
            }
        };

        NamedLock {
            key: Arc::from(key),
            state,
        }
    }

    /// Wait until `key` is free and take it.
    pub async fn acquire(&self, key: &str) -> NamedLockGuard {
        // The map shard guard is released before awaiting.
        let lock = self.lock(key);
        lock.acquire().await
    }

    /// Take `key` only if nobody holds it right now.
    pub fn try_acquire(&self, key: &str) -> Option<NamedLockGuard> {
        self.lock(key).try_acquire()
    }

    /// Whether `key` is currently held. Unknown keys are never held.
    ///
    /// Reads the holder flag only; never contends with acquirers.
    pub fn is_locked(&self, key: &str) -> bool {
        self.locks
            .get(key)
            .is_some_and(|entry| entry.value().is_held())
    }

    /// Whether a lock for `key` has ever been created.
    pub fn contains(&self, key: &str) -> bool {
        self.locks.contains_key(key)
    }

    /// Number of distinct keys seen so far.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// A resolved named lock. Cheap to clone; clones share the same mutex.
#[derive(Debug, Clone)]
pub struct NamedLock {
    key: Arc<str>,
    state: Arc<LockState>,
}

impl NamedLock {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn acquire(&self) -> NamedLockGuard {
        let guard = Arc::clone(&self.state.mutex).lock_owned().await;
        self.held(guard)
    }

    pub fn try_acquire(&self) -> Option<NamedLockGuard> {
        let guard = Arc::clone(&self.state.mutex).try_lock_owned().ok()?;
        Some(self.held(guard))
    }

    /// Whether some guard currently holds this lock.
    pub fn is_locked(&self) -> bool {
        self.state.is_held()
    }

    fn held(&self, guard: OwnedMutexGuard<()>) -> NamedLockGuard {
        self.state.held.store(true, Ordering::Release);
        trace!(key = %self.key, "Named lock acquired");
        NamedLockGuard {
            key: Arc::clone(&self.key),
            state: Arc::clone(&self.state),
            guard: Some(guard),
        }
    }
}

/// Exclusive hold on a named lock.
///
/// The lock is released when the guard is dropped or when [`release`] is
/// called, whichever comes first. Releasing more than once is a no-op.
///
/// [`release`]: NamedLockGuard::release
#[derive(Debug)]
pub struct NamedLockGuard {
    key: Arc<str>,
    state: Arc<LockState>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl NamedLockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Release the lock early.
    ///
    /// Returns `true` if this call released it, `false` if it was already
    /// released.
    pub fn release(&mut self) -> bool {
        match self.guard.take() {
            Some(guard) => {
                // Cleared before unlocking so it never overwrites the next holder's flag.
                self.state.held.store(false, Ordering::Release);
                drop(guard);
                trace!(key = %self.key, "Named lock released");
                true
            }
            None => false,
        }
    }

    pub fn is_held(&self) -> bool {
        self.guard.is_some()
    }
}

impl Drop for NamedLockGuard {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_same_key_shares_one_mutex() {
        let registry = NamedLockRegistry::new();
        let a = registry.lock("buy");
        let b = registry.lock("buy");

        assert!(Arc::ptr_eq(&a.state, &b.state));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_distinct_keys_do_not_block_each_other() {
        let registry = NamedLockRegistry::new();
        let _buy = registry.try_acquire("buy").expect("buy is free");

        assert!(registry.try_acquire("sell").is_some());
        assert!(registry.try_acquire("buy").is_none());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_release_is_idempotent() {
        let registry = NamedLockRegistry::new();
        let mut guard = registry.try_acquire("cancel").unwrap();

        assert!(guard.release());
        assert!(!guard.release());
        assert!(!guard.is_held());

        // Exactly one new holder may take it after the double release.
        let mut second = registry.try_acquire("cancel").expect("lock was released");
        assert!(registry.try_acquire("cancel").is_none());

        // Dropping an already-released guard must not free the new holder.
        drop(guard);
        assert!(registry.is_locked("cancel"));
        assert!(second.release());
        assert!(!registry.is_locked("cancel"));
    }

    #[test]
    fn test_drop_releases() {
        let registry = NamedLockRegistry::new();
        {
            let _guard = registry.try_acquire("k").unwrap();
            assert!(registry.is_locked("k"));
        }
        assert!(!registry.is_locked("k"));
    }

    #[test]
    fn test_acquire_outside_async_context() {
        let registry = NamedLockRegistry::new();
        let guard = tokio_test::block_on(registry.acquire("refresh_balance"));
        assert_eq!(guard.key(), "refresh_balance");
        assert!(guard.is_held());
    }

    #[test]
    fn test_unknown_key_is_not_locked() {
        let registry = NamedLockRegistry::new();
        assert!(!registry.is_locked("never-seen"));
        assert!(!registry.contains("never-seen"));
        assert!(registry.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_use_creates_single_entry() {
        let registry = Arc::new(NamedLockRegistry::new());

        let handles: Vec<_> = (0..64)
            .map(|_| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.lock("refresh_balance").state })
            })
            .collect();

        let mut states = Vec::new();
        for handle in handles {
            states.push(handle.await.unwrap());
        }

        assert_eq!(registry.len(), 1);
        assert!(states.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[tokio::test]
    async fn test_acquire_waits_for_holder() {
        let registry = Arc::new(NamedLockRegistry::new());
        let first = registry.acquire("k").await;

        let waiter = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                let _guard = registry.acquire("k").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(first);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should finish once the lock is free")
            .unwrap();
    }

    #[test]
    fn test_status_checks_do_not_contend_with_acquirers() {
        let registry = Arc::new(NamedLockRegistry::new());
        let lock = registry.lock("order:BTCUSD");
        let stop = Arc::new(AtomicBool::new(false));

        let poller = {
            let registry = Arc::clone(&registry);
            let lock = lock.clone();
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    let _ = registry.is_locked("order:BTCUSD");
                    let _ = lock.is_locked();
                }
            })
        };

        let mut refused = 0;
        for _ in 0..50_000 {
            match lock.try_acquire() {
                Some(guard) => drop(guard),
                None => refused += 1,
            }
        }

        stop.store(true, Ordering::Relaxed);
        poller.join().unwrap();
        assert_eq!(refused, 0);
        assert!(!registry.is_locked("order:BTCUSD"));
    }
}
