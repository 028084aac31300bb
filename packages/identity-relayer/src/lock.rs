//! Per-wallet mutual exclusion over the shared coordination store.
//!
//! A lock is a lease: `SET key token NX PX lease`, released by
//! compare-and-delete so a holder whose lease expired can never clear a
//! successor's lock. While held, a heartbeat task keeps pushing the expiry
//! out with a token-checked renew, so a slow holder is never overtaken. A
//! crashed process stops renewing and the wallet frees up once its lease
//! runs out.
//!
//! The same leases guard relay dedup claims and wormhole transfer runs.

use crate::metrics::METRICS;
use crate::store::CoordinationStore;
use std::future::Future;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Proof of holding a wallet lock. Renewed until released; released on drop
/// if not released explicitly.
pub struct WalletLease {
    key: String,
    token: String,
    store: Arc<dyn CoordinationStore>,
    heartbeat: JoinHandle<()>,
    released: bool,
}

impl WalletLease {
    /// Stop renewing and hand the key over to the caller, who is about to
    /// overwrite it. The key is not deleted.
    pub fn disarm(mut self) {
        self.heartbeat.abort();
        self.released = true;
    }
}

impl Drop for WalletLease {
    fn drop(&mut self) {
        self.heartbeat.abort();
        if self.released {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(key = %self.key, "Lease dropped outside runtime, left to expire");
            return;
        };
        let store = Arc::clone(&self.store);
        let key = std::mem::take(&mut self.key);
        let token = std::mem::take(&mut self.token);
        handle.spawn(async move {
            if let Err(e) = store.delete_if_equals(&key, &token).await {
                warn!(key = %key, error = %e, "Failed to release dropped lease");
            }
        });
    }
}

fn spawn_heartbeat(
    store: Arc<dyn CoordinationStore>,
    key: String,
    token: String,
    lease: Duration,
) -> JoinHandle<()> {
    let every = (lease / 3).max(Duration::from_millis(10));
    tokio::spawn(async move {
        let mut ticks = tokio::time::interval(every);
        ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticks.tick().await;
        loop {
            ticks.tick().await;
            match store.renew_if_equals(&key, &token, lease).await {
                Ok(true) => {}
                Ok(false) => {
                    METRICS.lock_lease_expired.fetch_add(1, Ordering::Relaxed);
                    warn!(key = %key, "Lease lost while held");
                    return;
                }
                Err(e) => warn!(key = %key, error = %e, "Lease renewal failed"),
            }
        }
    })
}

pub struct WalletLockManager {
    store: Arc<dyn CoordinationStore>,
    poll: Duration,
    lease: Duration,
}

impl WalletLockManager {
    pub fn new(store: Arc<dyn CoordinationStore>, poll: Duration, lease: Duration) -> Self {
        Self { store, poll, lease }
    }

    pub fn from_config(store: Arc<dyn CoordinationStore>, config: &crate::config::LockConfig) -> Self {
        Self::new(
            store,
            Duration::from_millis(config.poll_ms),
            Duration::from_millis(config.lease_ms),
        )
    }

    /// One non-blocking attempt.
    pub async fn try_acquire(&self, key: &str) -> Result<Option<WalletLease>, crate::Error> {
        let token = format!("{:032x}", rand::random::<u128>());
        if self.store.set_if_absent(key, &token, self.lease).await? {
            let heartbeat = spawn_heartbeat(
                Arc::clone(&self.store),
                key.to_string(),
                token.clone(),
                self.lease,
            );
            Ok(Some(WalletLease {
                key: key.to_string(),
                token,
                store: Arc::clone(&self.store),
                heartbeat,
                released: false,
            }))
        } else {
            Ok(None)
        }
    }

    /// Poll until the lock is ours. Waiters are not queued.
    pub async fn acquire(&self, key: &str) -> Result<WalletLease, crate::Error> {
        let start = Instant::now();
        loop {
            if let Some(lease) = self.try_acquire(key).await? {
                METRICS.record_lock_wait(start);
                debug!(key, waited_ms = start.elapsed().as_millis() as u64, "Wallet lock acquired");
                return Ok(lease);
            }
            tokio::time::sleep(self.poll).await;
        }
    }

    /// Clear ownership. A no-op (with a warning) if the lease already expired.
    pub async fn release(&self, mut lease: WalletLease) -> Result<(), crate::Error> {
        lease.heartbeat.abort();
        lease.released = true;
        let owned = self.store.delete_if_equals(&lease.key, &lease.token).await?;
        if !owned {
            METRICS.lock_lease_expired.fetch_add(1, Ordering::Relaxed);
            warn!(key = %lease.key, "Lease expired before release");
        }
        Ok(())
    }

    /// Run `f` while holding `key`; the lock is released on every exit path.
    pub async fn with_lock<T, F, Fut>(&self, key: &str, f: F) -> Result<T, crate::Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, crate::Error>>,
    {
        let lease = self.acquire(key).await?;
        let result = f().await;
        if let Err(e) = self.release(lease).await {
            warn!(key, error = %e, "Failed to release wallet lock");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    fn manager(store: Arc<MemoryStore>) -> Arc<WalletLockManager> {
        Arc::new(WalletLockManager::new(
            store,
            Duration::from_millis(200),
            Duration::from_secs(300),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_holders_never_overlap() {
        let locks = manager(Arc::new(MemoryStore::new()));
        let inside = Arc::new(AtomicBool::new(false));
        let done = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let locks = Arc::clone(&locks);
            let inside = Arc::clone(&inside);
            let done = Arc::clone(&done);
            tasks.push(tokio::spawn(async move {
                locks
                    .with_lock("POA_RELAYER_WALLET:0xabc", move || async move {
                        assert!(!inside.swap(true, Ordering::SeqCst), "overlapping holders");
                        tokio::time::sleep(Duration::from_millis(350)).await;
                        inside.store(false, Ordering::SeqCst);
                        done.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(done.load(Ordering::SeqCst), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_released_on_error_path() {
        let store = Arc::new(MemoryStore::new());
        let locks = manager(Arc::clone(&store));
        let result: Result<(), _> = locks
            .with_lock("k", || async { Err(crate::Error::Submission("reverted".into())) })
            .await;
        assert!(matches!(result, Err(crate::Error::Submission(_))));
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_crashed_holder_expires() {
        let store = Arc::new(MemoryStore::new());
        let locks = manager(Arc::clone(&store));
        // A holder that never releases.
        store
            .set_if_absent("k", "dead-process", Duration::from_secs(300))
            .await
            .unwrap();
        assert!(locks.try_acquire("k").await.unwrap().is_none());

        let start = tokio::time::Instant::now();
        let lease = locks.acquire("k").await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(300));
        locks.release(lease).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_lease_renewed_while_held() {
        let store = Arc::new(MemoryStore::new());
        let locks = WalletLockManager::new(
            store.clone(),
            Duration::from_millis(50),
            Duration::from_millis(500),
        );
        let lease = locks.acquire("k").await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(locks.try_acquire("k").await.unwrap().is_none());

        locks.release(lease).await.unwrap();
        assert!(locks.try_acquire("k").await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_release_keeps_successor_lock() {
        let store = Arc::new(MemoryStore::new());
        let locks = WalletLockManager::new(
            store.clone(),
            Duration::from_millis(200),
            Duration::from_millis(500),
        );
        let stale = locks.acquire("k").await.unwrap();
        // The key vanishes under the holder, e.g. a store failover.
        assert!(store.delete_if_equals("k", &stale.token).await.unwrap());
        let successor = locks.acquire("k").await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        locks.release(stale).await.unwrap();
        assert!(store.get("k").await.unwrap().is_some());
        locks.release(successor).await.unwrap();
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_drop_releases() {
        let store = Arc::new(MemoryStore::new());
        let locks = manager(Arc::clone(&store));
        {
            let _lease = locks.acquire("k").await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(locks.try_acquire("k").await.unwrap().is_some());
    }
}
