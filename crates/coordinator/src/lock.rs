//! Per-subject mutual exclusion over the record store
//!
//! A lock is a boolean flag on the subject record, flipped with a single
//! conditional write. There is no session and no queue: a request that finds
//! the flag set is rejected immediately.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use grantcraft_core::{LockName, SubjectId};
use grantcraft_store::{FlagWrite, RecordStore};

use crate::{CoordinatorError, Result};

/// Outcome of a release
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    Released,
    /// The flag was already clear; someone else released it
    Conflict,
    /// The store could not be reached; the flag may still be set
    Failed,
}

#[derive(Clone)]
pub struct DistributedLock {
    store: Arc<dyn RecordStore>,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Set the flag iff it is currently clear
    pub async fn acquire(&self, subject: &SubjectId, lock: LockName) -> Result<HeldLock> {
        match self
            .store
            .conditional_set_flag(subject, lock, true, false)
            .await?
        {
            FlagWrite::Applied => {
                info!("Acquired {} lock for {}", lock, subject);
                Ok(HeldLock {
                    lock_handle: self.clone(),
                    subject: subject.clone(),
                    lock,
                    released: false,
                })
            }
            FlagWrite::ConditionFailed => {
                warn!("{} lock for {} is already held", lock, subject);
                Err(CoordinatorError::Conflict(lock))
            }
        }
    }

    /// Clear the flag iff it is currently set. A lost race is not an error.
    pub async fn release(&self, subject: &SubjectId, lock: LockName) -> Release {
        match self
            .store
            .conditional_set_flag(subject, lock, false, true)
            .await
        {
            Ok(FlagWrite::Applied) => {
                info!("Released {} lock for {}", lock, subject);
                Release::Released
            }
            Ok(FlagWrite::ConditionFailed) => {
                warn!("{} lock for {} was already free at release", lock, subject);
                Release::Conflict
            }
            Err(e) => {
                error!("Failed to release {} lock for {}: {}", lock, subject, e);
                Release::Failed
            }
        }
    }
}

/// Proof that a lock is held.
///
/// Released by consuming it with [`HeldLock::release`]. If it is dropped
/// instead (a cancelled request, a panicking task) the release is spawned onto
/// the current runtime, so every acquired lock is released exactly once.
pub struct HeldLock {
    lock_handle: DistributedLock,
    subject: SubjectId,
    lock: LockName,
    released: bool,
}

impl HeldLock {
    pub fn subject(&self) -> &SubjectId {
        &self.subject
    }

    pub fn lock_name(&self) -> LockName {
        self.lock
    }

    pub async fn release(mut self) -> Release {
        self.released = true;
        self.lock_handle.release(&self.subject, self.lock).await
    }
}

impl Drop for HeldLock {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let lock_handle = self.lock_handle.clone();
        let subject = self.subject.clone();
        let lock = self.lock;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("{} lock for {} dropped while held, releasing", lock, subject);
                handle.spawn(async move {
                    lock_handle.release(&subject, lock).await;
                });
            }
            Err(_) => error!("{} lock for {} dropped outside a runtime", lock, subject),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::CountingStore;
    use grantcraft_store::MemoryStore;

    fn setup() -> (Arc<CountingStore>, DistributedLock) {
        let store = Arc::new(CountingStore::new(MemoryStore::new()));
        let lock = DistributedLock::new(store.clone());
        (store, lock)
    }

    #[tokio::test]
    async fn test_acquire_then_conflict() {
        let (_, lock) = setup();
        let subject = SubjectId::new("s1");

        let held = lock.acquire(&subject, LockName::Verifier).await.unwrap();
        let err = lock.acquire(&subject, LockName::Verifier).await.err().unwrap();
        assert!(matches!(err, CoordinatorError::Conflict(LockName::Verifier)));

        assert_eq!(held.release().await, Release::Released);
        assert!(lock.acquire(&subject, LockName::Verifier).await.is_ok());
    }

    #[tokio::test]
    async fn test_locks_are_independent() {
        let (store, lock) = setup();
        let subject = SubjectId::new("s1");

        let verifier = lock.acquire(&subject, LockName::Verifier).await.unwrap();
        let faucet = lock.acquire(&subject, LockName::Faucet).await.unwrap();
        verifier.release().await;
        faucet.release().await;
        assert_eq!(store.releases(&subject, LockName::Verifier), 1);
        assert_eq!(store.releases(&subject, LockName::Faucet), 1);
    }

    #[tokio::test]
    async fn test_release_of_free_lock_is_benign() {
        let (_, lock) = setup();
        let subject = SubjectId::new("s1");
        assert_eq!(lock.release(&subject, LockName::Faucet).await, Release::Conflict);
    }

    #[tokio::test]
    async fn test_concurrent_acquire_single_winner() {
        let (_, lock) = setup();
        let subject = SubjectId::new("s1");

        let attempts = (0..8).map(|_| {
            let lock = lock.clone();
            let subject = subject.clone();
            tokio::spawn(async move { lock.acquire(&subject, LockName::Faucet).await })
        });

        let mut winners = Vec::new();
        for attempt in attempts {
            if let Ok(held) = attempt.await.unwrap() {
                winners.push(held);
            }
        }
        assert_eq!(winners.len(), 1);
    }

    #[tokio::test]
    async fn test_dropped_lock_is_released_once() {
        let (store, lock) = setup();
        let subject = SubjectId::new("s1");

        let held = lock.acquire(&subject, LockName::Verifier).await.unwrap();
        drop(held);
        store.wait_for_releases(&subject, LockName::Verifier, 1).await;

        assert_eq!(store.releases(&subject, LockName::Verifier), 1);
        assert!(lock.acquire(&subject, LockName::Verifier).await.is_ok());
    }
}
