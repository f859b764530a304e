use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use dashmap::DashMap;

use super::{
    error::CacheResult,
    traits::{BatchSetItem, L1},
};
use crate::config::MemoryL1Config;

struct Entry {
    data: Vec<u8>,
    expires_at: Option<Instant>,
    last_accessed: Instant,
}

impl Entry {
    fn new(data: Vec<u8>, expires_at: Option<Instant>) -> Self {
        Self {
            data,
            expires_at,
            last_accessed: Instant::now(),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| Instant::now() > exp)
    }

    fn touch(&mut self) {
        self.last_accessed = Instant::now();
    }
}

/// Single-process L1 backed by a `DashMap`. Suitable for a single instance
/// deployment or for tests; loses all state across restarts and does not
/// coordinate with other instances (the cross-process coalescer degrades to
/// a no-op single-instance tier when paired with this backend).
pub struct MemoryCache {
    data: Arc<DashMap<String, Entry>>,
    locks: Arc<DashMap<String, Instant>>,
    max_entries: usize,
}

impl MemoryCache {
    pub fn new(config: &MemoryL1Config) -> Self {
        Self {
            data: Arc::new(DashMap::new()),
            locks: Arc::new(DashMap::new()),
            max_entries: config.max_entries,
        }
    }

    fn evict_if_needed(&self) {
        if self.data.len() < self.max_entries {
            return;
        }

        self.data.retain(|_, entry| !entry.is_expired());
        if self.data.len() < self.max_entries {
            return;
        }

        let mut entries: Vec<_> = self
            .data
            .iter()
            .map(|e| (e.key().clone(), e.last_accessed))
            .collect();
        entries.sort_by_key(|(_, last_accessed)| *last_accessed);

        let to_evict = self.data.len().saturating_sub(self.max_entries) + 1;
        for (key, _) in entries.into_iter().take(to_evict) {
            self.data.remove(&key);
        }
    }
}

#[async_trait]
impl L1 for MemoryCache {
    async fn get_bytes(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        if let Some(mut entry) = self.data.get_mut(key) {
            if entry.is_expired() {
                drop(entry);
                self.data.remove(key);
                return Ok(None);
            }
            entry.touch();
            Ok(Some(entry.data.clone()))
        } else {
            Ok(None)
        }
    }

    async fn set_bytes(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()> {
        self.evict_if_needed();
        let expires_at = if ttl.is_zero() {
            None
        } else {
            Some(Instant::now() + ttl)
        };
        self.data
            .insert(key.to_string(), Entry::new(value.to_vec(), expires_at));
        Ok(())
    }

    async fn mget_bytes(&self, keys: &[String]) -> CacheResult<Vec<Option<Vec<u8>>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            out.push(self.get_bytes(key).await?);
        }
        Ok(out)
    }

    async fn batch_set_bytes(&self, items: &[BatchSetItem<'_>]) -> CacheResult<()> {
        for item in items {
            let bytes = serde_json::to_vec(item.value)
                .map_err(|e| super::error::CacheError::Serialization(e.to_string()))?;
            self.set_bytes(&item.key, &bytes, item.ttl).await?;
        }
        Ok(())
    }

    async fn try_lock(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        let now = Instant::now();
        let lock_key = format!("lock:{key}");

        use dashmap::mapref::entry::Entry as DashEntry;
        match self.locks.entry(lock_key) {
            DashEntry::Occupied(mut e) => {
                if *e.get() <= now {
                    e.insert(now + ttl);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            DashEntry::Vacant(e) => {
                e.insert(now + ttl);
                Ok(true)
            }
        }
    }

    async fn release_lock(&self, key: &str) -> CacheResult<()> {
        self.locks.remove(&format!("lock:{key}"));
        Ok(())
    }

    async fn ping(&self) -> CacheResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_entries: usize) -> MemoryL1Config {
        MemoryL1Config {
            max_entries,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn get_set_roundtrip() {
        let cache = MemoryCache::new(&config(100));
        cache
            .set_bytes("k", b"v", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get_bytes("k").await.unwrap(), Some(b"v".to_vec()));
        assert_eq!(cache.get_bytes("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn ttl_expiry() {
        let cache = MemoryCache::new(&config(100));
        cache
            .set_bytes("k", b"v", Duration::from_millis(50))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(cache.get_bytes("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn zero_ttl_never_expires() {
        let cache = MemoryCache::new(&config(100));
        cache.set_bytes("k", b"v", Duration::ZERO).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(cache.get_bytes("k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn mget_preserves_order_and_misses() {
        let cache = MemoryCache::new(&config(100));
        cache
            .set_bytes("a", b"1", Duration::from_secs(60))
            .await
            .unwrap();
        cache
            .set_bytes("c", b"3", Duration::from_secs(60))
            .await
            .unwrap();
        let keys = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let result = cache.mget_bytes(&keys).await.unwrap();
        assert_eq!(
            result,
            vec![Some(b"1".to_vec()), None, Some(b"3".to_vec())]
        );
    }

    #[tokio::test]
    async fn mget_empty_is_noop() {
        let cache = MemoryCache::new(&config(100));
        assert_eq!(cache.mget_bytes(&[]).await.unwrap(), Vec::new());
    }

    #[tokio::test]
    async fn try_lock_is_exclusive_until_released() {
        let cache = MemoryCache::new(&config(100));
        assert!(cache.try_lock("x", Duration::from_secs(5)).await.unwrap());
        assert!(!cache.try_lock("x", Duration::from_secs(5)).await.unwrap());
        cache.release_lock("x").await.unwrap();
        assert!(cache.try_lock("x", Duration::from_secs(5)).await.unwrap());
    }

    #[tokio::test]
    async fn try_lock_expires() {
        let cache = MemoryCache::new(&config(100));
        assert!(
            cache
                .try_lock("x", Duration::from_millis(30))
                .await
                .unwrap()
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(cache.try_lock("x", Duration::from_secs(5)).await.unwrap());
    }

    #[tokio::test]
    async fn eviction_drops_oldest_when_full() {
        let cache = MemoryCache::new(&config(2));
        cache
            .set_bytes("a", b"1", Duration::from_secs(60))
            .await
            .unwrap();
        cache
            .set_bytes("b", b"2", Duration::from_secs(60))
            .await
            .unwrap();
        cache
            .set_bytes("c", b"3", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(cache.get_bytes("c").await.unwrap().is_some());
    }
}
