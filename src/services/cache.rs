//! Request cache with in-flight deduplication.
//!
//! Keyed by query fingerprint. Concurrent callers for the same key share
//! one underlying fetch: the first caller runs the loader, everyone else
//! awaits the shared channel and receives the same settled outcome.
//! Failures are never stored, so the next call after a failure retries.
//! Entries expire lazily on lookup; there is no eviction task.

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};

type Outcome<V> = std::result::Result<V, String>;

enum Slot<V> {
    Ready { value: V, stored_at: Instant },
    Pending(watch::Receiver<Option<Outcome<V>>>),
}

enum Claim<V> {
    Hit(V),
    Wait(watch::Receiver<Option<Outcome<V>>>),
    Fetch(watch::Sender<Option<Outcome<V>>>),
}

pub struct RequestCache<V> {
    ttl: Duration,
    slots: Mutex<HashMap<u64, Slot<V>>>,
}

impl<V: Clone> RequestCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached value for `key`, or run `loader` to produce it.
    ///
    /// At most one loader is ever in flight per key. The loader runs in the
    /// calling task; a failed load is propagated to every waiter and the
    /// slot is released so the next call retries.
    pub async fn get_or_fetch<F, Fut>(&self, key: u64, loader: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        let claim = {
            let mut slots = self.slots.lock().await;
            match slots.get(&key) {
                Some(Slot::Ready { value, stored_at }) if stored_at.elapsed() <= self.ttl => {
                    Claim::Hit(value.clone())
                }
                // A live receiver means another task owns the fetch. A dead
                // one means that task was dropped mid-flight; reclaim.
                Some(Slot::Pending(rx)) if rx.has_changed().is_ok() => Claim::Wait(rx.clone()),
                _ => {
                    let (tx, rx) = watch::channel(None);
                    slots.insert(key, Slot::Pending(rx));
                    Claim::Fetch(tx)
                }
            }
        };

        match claim {
            Claim::Hit(value) => Ok(value),
            Claim::Wait(mut rx) => {
                let settled = rx
                    .wait_for(|outcome| outcome.is_some())
                    .await
                    .map_err(|_| anyhow!("in-flight fetch was abandoned; retry"))?;
                match &*settled {
                    Some(Ok(value)) => Ok(value.clone()),
                    Some(Err(message)) => Err(anyhow!(message.clone())),
                    None => Err(anyhow!("in-flight fetch was abandoned; retry")),
                }
            }
            Claim::Fetch(tx) => match loader().await {
                Ok(value) => {
                    let mut slots = self.slots.lock().await;
                    slots.insert(
                        key,
                        Slot::Ready {
                            value: value.clone(),
                            stored_at: Instant::now(),
                        },
                    );
                    drop(slots);
                    let _ = tx.send(Some(Ok(value.clone())));
                    Ok(value)
                }
                Err(err) => {
                    let mut slots = self.slots.lock().await;
                    slots.remove(&key);
                    drop(slots);
                    let _ = tx.send(Some(Err(format!("{err:#}"))));
                    Err(err)
                }
            },
        }
    }

    /// Number of stored entries, expired or not. Diagnostic only.
    pub async fn entry_count(&self) -> usize {
        self.slots.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn concurrent_callers_share_one_fetch() {
        let cache = Arc::new(RequestCache::new(Duration::from_secs(60)));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_fetch(42, || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(vec![1u64, 2, 3])
                    })
                    .await
            }));
        }

        for handle in handles {
            let value = handle.await.expect("join").expect("fetch");
            assert_eq!(value, vec![1, 2, 3]);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.entry_count().await, 1);
    }

    #[tokio::test]
    async fn expired_entries_trigger_a_fresh_fetch() {
        let cache = RequestCache::new(Duration::from_millis(10));
        let calls = AtomicUsize::new(0);
        let calls = &calls;

        for _ in 0..2 {
            let value = cache
                .get_or_fetch(7, move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("rows".to_string())
                })
                .await
                .expect("fetch");
            assert_eq!(value, "rows");
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn live_entries_are_reused() {
        let cache = RequestCache::new(Duration::from_secs(60));
        let calls = AtomicUsize::new(0);
        let calls = &calls;

        for _ in 0..3 {
            let _ = cache
                .get_or_fetch(7, move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(1u64)
                })
                .await
                .expect("fetch");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failures_are_not_cached_and_reach_every_waiter() {
        let cache = Arc::new(RequestCache::<u64>::new(Duration::from_secs(60)));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_fetch(9, || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Err(anyhow!("backend unavailable"))
                    })
                    .await
            }));
        }
        for handle in handles {
            let result = handle.await.expect("join");
            assert!(result.is_err());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.entry_count().await, 0);

        // The slot was released, so the next call retries and can succeed.
        let value = cache
            .get_or_fetch(9, || async { Ok(11u64) })
            .await
            .expect("retry succeeds");
        assert_eq!(value, 11);
    }
}
