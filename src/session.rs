//! Per-user coordination
//!
//! Serializes download jobs of the same user and remembers when the user's
//! progress message was last edited, so parallel phases share one throttle.

use crate::config::{PROGRESS_CACHE_IDLE_SECS, PROGRESS_CACHE_MAX_USERS};
use moka::future::Cache;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::debug;

/// Last progress value shown to a user and when it was shown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressStamp {
    /// Percentage that was displayed
    pub percent: u8,
    /// When the edit happened
    pub at: Instant,
}

/// Per-user locks and progress stamps
pub struct SessionCoordinator {
    // Weak entries vanish once no job holds or waits for the lock
    locks: Mutex<HashMap<i64, Weak<Mutex<()>>>>,
    progress: Cache<i64, ProgressStamp>,
}

impl Default for SessionCoordinator {
    fn default() -> Self {
        Self::new(PROGRESS_CACHE_MAX_USERS)
    }
}

impl SessionCoordinator {
    /// Coordinator tracking at most `max_users` progress stamps
    #[must_use]
    pub fn new(max_users: u64) -> Self {
        let progress = Cache::builder()
            .max_capacity(max_users)
            .time_to_idle(Duration::from_secs(PROGRESS_CACHE_IDLE_SECS))
            .build();
        Self {
            locks: Mutex::new(HashMap::new()),
            progress,
        }
    }

    async fn user_lock(&self, user_id: i64) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.retain(|_, lock| lock.strong_count() > 0);
        if let Some(lock) = locks.get(&user_id).and_then(Weak::upgrade) {
            return lock;
        }
        let lock = Arc::new(Mutex::new(()));
        locks.insert(user_id, Arc::downgrade(&lock));
        lock
    }

    /// Wait until no other job of this user runs and hold the lock.
    pub async fn acquire(&self, user_id: i64) -> OwnedMutexGuard<()> {
        let lock = self.user_lock(user_id).await;
        if lock.try_lock().is_err() {
            debug!(user_id = user_id, "Waiting for previous job of this user");
        }
        lock.lock_owned().await
    }

    /// Run `job` while holding the user's lock.
    pub async fn with_user_lock<F, T>(&self, user_id: i64, job: F) -> T
    where
        F: Future<Output = T>,
    {
        let _guard = self.acquire(user_id).await;
        job.await
    }

    /// Whether a job of this user is running or queued
    pub async fn is_busy(&self, user_id: i64) -> bool {
        self.locks
            .lock()
            .await
            .get(&user_id)
            .is_some_and(|lock| lock.strong_count() > 0)
    }

    /// Number of users with a live lock entry
    pub async fn tracked_users(&self) -> usize {
        self.locks
            .lock()
            .await
            .values()
            .filter(|lock| lock.strong_count() > 0)
            .count()
    }

    /// Last progress edit shown to the user
    pub async fn last_update(&self, user_id: i64) -> Option<ProgressStamp> {
        self.progress.get(&user_id).await
    }

    /// Remember a progress edit that just happened
    pub async fn record_update(&self, user_id: i64, percent: u8) {
        let stamp = ProgressStamp {
            percent,
            at: Instant::now(),
        };
        self.progress.insert(user_id, stamp).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn jobs_of_one_user_never_overlap() {
        let session = Arc::new(SessionCoordinator::default());
        let running = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let session = session.clone();
            let running = running.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                session
                    .with_user_lock(1, async {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await;
            }));
        }
        for handle in handles {
            assert!(handle.await.is_ok());
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_users_run_in_parallel() {
        let session = SessionCoordinator::default();
        let _first = session.acquire(1).await;
        let second = tokio::time::timeout(Duration::from_millis(100), session.acquire(2)).await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn lock_entries_are_released() {
        let session = SessionCoordinator::default();
        {
            let _guard = session.acquire(1).await;
            assert!(session.is_busy(1).await);
            assert_eq!(session.tracked_users().await, 1);
        }
        assert!(!session.is_busy(1).await);
        assert_eq!(session.tracked_users().await, 0);
    }

    #[tokio::test]
    async fn progress_stamps_are_per_user() {
        let session = SessionCoordinator::default();
        assert!(session.last_update(1).await.is_none());

        session.record_update(1, 42).await;
        assert_eq!(session.last_update(1).await.map(|s| s.percent), Some(42));
        assert!(session.last_update(2).await.is_none());
    }
}
