//! Single-flight request coalescing. When N callers ask for the same key at
//! once, only one of them actually builds the value; the rest wait for its
//! result rather than issuing their own redundant build. Mirrors the
//! reference deployment's `Coalescer.do()` one to one: `(result,
//! was_coalesced)`, and a failed build carries its error to every waiter
//! rather than poisoning the key for subsequent calls.

use std::{any::Any, collections::HashMap, future::Future, sync::Arc};

use tokio::sync::{Mutex as AsyncMutex, oneshot};

use crate::observability::metrics;

type WaiterList<T, E> = Arc<std::sync::Mutex<Vec<oneshot::Sender<Result<T, E>>>>>;

/// In-process coalescer, one instance shared across the whole process. The
/// optional cross-process tier (§4.2) layers an advisory `L1::try_lock` on
/// top of this in `cache_manager` and is not part of this type.
#[derive(Default)]
pub struct Coalescer {
    in_flight: AsyncMutex<HashMap<String, Box<dyn Any + Send + Sync>>>,
}

impl Coalescer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `build` for `key` if no build for it is already in flight;
    /// otherwise awaits the in-flight build's result. Returns `(result,
    /// was_coalesced)`.
    ///
    /// The same `key` must always be coalesced with the same `(T, E)` pair
    /// — this holds in practice because a cache key's record kind fixes its
    /// payload type.
    pub async fn do_<F, Fut, T, E>(&self, key: &str, build: F) -> (Result<T, E>, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        T: Clone + Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
    {
        let mut guard = self.in_flight.lock().await;
        if let Some(boxed) = guard.get(key) {
            let waiters: &WaiterList<T, E> = boxed
                .downcast_ref()
                .expect("coalesced key reused with a different result type");
            let (tx, rx) = oneshot::channel();
            let waiter_count = {
                let mut w = waiters.lock().unwrap();
                w.push(tx);
                w.len()
            };
            metrics::set_coalesce_waiters(waiter_count as i64);
            drop(guard);

            let result = rx
                .await
                .expect("builder task dropped its sender without completing");
            return (result, true);
        }

        let waiters: WaiterList<T, E> = Arc::new(std::sync::Mutex::new(Vec::new()));
        guard.insert(key.to_string(), Box::new(waiters.clone()));
        drop(guard);

        metrics::record_coalesce_build();
        let result = build().await;

        self.in_flight.lock().await.remove(key);
        let pending: Vec<_> = waiters.lock().unwrap().drain(..).collect();
        metrics::set_coalesce_waiters(0);
        for tx in pending {
            let _ = tx.send(result.clone());
        }

        (result, false)
    }

    pub async fn in_flight_count(&self) -> usize {
        self.in_flight.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn single_caller_builds_and_is_not_coalesced() {
        let coalescer = Coalescer::new();
        let (result, coalesced) = coalescer
            .do_("k", || async { Ok::<_, ()>(42) })
            .await;
        assert_eq!(result, Ok(42));
        assert!(!coalesced);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_build() {
        let coalescer = Arc::new(Coalescer::new());
        let build_count = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let coalescer = coalescer.clone();
            let build_count = build_count.clone();
            handles.push(tokio::spawn(async move {
                coalescer
                    .do_("shared", || {
                        let build_count = build_count.clone();
                        async move {
                            build_count.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                            Ok::<_, ()>(7)
                        }
                    })
                    .await
            }));
        }

        let mut coalesced_count = 0;
        for handle in handles {
            let (result, coalesced) = handle.await.unwrap();
            assert_eq!(result, Ok(7));
            if coalesced {
                coalesced_count += 1;
            }
        }

        assert_eq!(build_count.load(Ordering::SeqCst), 1);
        assert_eq!(coalesced_count, 7);
    }

    #[tokio::test]
    async fn failed_build_is_delivered_to_every_waiter() {
        let coalescer = Arc::new(Coalescer::new());

        let mut handles = Vec::new();
        for _ in 0..4 {
            let coalescer = coalescer.clone();
            handles.push(tokio::spawn(async move {
                coalescer
                    .do_("boom", || async {
                        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                        Err::<i32, _>("build failed".to_string())
                    })
                    .await
            }));
        }

        for handle in handles {
            let (result, _) = handle.await.unwrap();
            assert_eq!(result, Err("build failed".to_string()));
        }
    }

    #[tokio::test]
    async fn failed_build_does_not_poison_the_key_for_later_calls() {
        let coalescer = Coalescer::new();

        let (first, _) = coalescer
            .do_("retry-me", || async { Err::<i32, _>("nope".to_string()) })
            .await;
        assert!(first.is_err());

        let (second, coalesced) = coalescer
            .do_("retry-me", || async { Ok::<_, String>(99) })
            .await;
        assert_eq!(second, Ok(99));
        assert!(!coalesced);
    }

    #[tokio::test]
    async fn in_flight_count_reflects_active_builds() {
        let coalescer = Arc::new(Coalescer::new());
        assert_eq!(coalescer.in_flight_count().await, 0);

        let c = coalescer.clone();
        let handle = tokio::spawn(async move {
            c.do_("slow", || async {
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                Ok::<_, ()>(1)
            })
            .await
        });

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(coalescer.in_flight_count().await, 1);

        handle.await.unwrap();
        assert_eq!(coalescer.in_flight_count().await, 0);
    }
}
