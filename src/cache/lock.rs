use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

use dashmap::DashMap;
use tracing::warn;

pub(crate) fn mutex_lock<'a, T>(
    lock: &'a Mutex<T>,
    target: &'static str,
    op: &'static str,
) -> MutexGuard<'a, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(
                op,
                target_module = target,
                lock_kind = "mutex.lock",
                result = "poisoned_recovered",
                hint = "a previous build panicked while holding this key",
                "Recovered from poisoned cache lock"
            );
            poisoned.into_inner()
        }
    }
}

/// Non-blocking variant of [`mutex_lock`]; `None` when another builder holds the lock.
pub(crate) fn try_mutex_lock<'a, T>(
    lock: &'a Mutex<T>,
    target: &'static str,
    op: &'static str,
) -> Option<MutexGuard<'a, T>> {
    match lock.try_lock() {
        Ok(guard) => Some(guard),
        Err(TryLockError::WouldBlock) => None,
        Err(TryLockError::Poisoned(poisoned)) => {
            warn!(
                op,
                target_module = target,
                lock_kind = "mutex.try_lock",
                result = "poisoned_recovered",
                "Recovered from poisoned cache lock"
            );
            Some(poisoned.into_inner())
        }
    }
}

/// In-process build locks, one per cache key digest.
///
/// A builder holds the key's lock from the freshness re-check until the entry is
/// persisted, so two builders in this process never regenerate the same key
/// concurrently. Separate processes still race (last writer wins).
#[derive(Debug, Default)]
pub(crate) struct BuildLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl BuildLocks {
    pub(crate) fn handle(&self, digest: &str) -> Arc<Mutex<()>> {
        Arc::clone(
            self.locks
                .entry(digest.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }

    /// Forget a key's lock once no builder holds a handle to it.
    pub(crate) fn release(&self, digest: &str) {
        self.locks
            .remove_if(digest, |_, lock| Arc::strong_count(lock) == 1);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.locks.len()
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use super::*;

    #[test]
    fn same_digest_shares_a_lock() {
        let locks = BuildLocks::default();
        let a = locks.handle("abc");
        let b = locks.handle("abc");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(locks.len(), 1);
    }

    #[test]
    fn release_keeps_locks_that_are_still_held() {
        let locks = BuildLocks::default();
        let held = locks.handle("abc");
        locks.release("abc");
        assert_eq!(locks.len(), 1);

        drop(held);
        locks.release("abc");
        assert_eq!(locks.len(), 0);
    }

    #[test]
    fn recovers_from_poisoned_lock() {
        let lock = Mutex::new(0_u32);
        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = lock.lock().expect("lock should be acquired");
            panic!("poison build lock");
        }));

        *mutex_lock(&lock, "cache::lock", "test") += 1;
        assert_eq!(*mutex_lock(&lock, "cache::lock", "test"), 1);
    }

    #[test]
    fn try_lock_reports_a_held_lock() {
        let lock = Mutex::new(());
        let held = try_mutex_lock(&lock, "cache::lock", "test").expect("free lock");
        assert!(try_mutex_lock(&lock, "cache::lock", "test").is_none());
        drop(held);
        assert!(try_mutex_lock(&lock, "cache::lock", "test").is_some());
    }
}
