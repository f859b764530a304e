use std::time::Duration;

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};

use super::{envelope::CacheEnvelope, error::CacheResult};

/// A single item for a pipelined batch write: key, JSON-encodable value, TTL.
pub struct BatchSetItem<'a> {
    pub key: String,
    pub value: &'a serde_json::Value,
    pub ttl: Duration,
}

/// The record cache (L1). Every value is stored as an envelope so freshness
/// can be computed from `stored_at` rather than from remaining TTL.
#[async_trait]
pub trait L1: Send + Sync {
    /// Raw bytes under `key`, or `None` on miss. A value that fails to parse
    /// as an envelope is treated the same as a miss by callers using
    /// [`L1Ext::get_envelope`] — it is never a hard error.
    async fn get_bytes(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Write `value` under `key` with the given TTL.
    async fn set_bytes(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()>;

    /// Batch read, preserving input order; `None` for keys not present or
    /// not valid envelopes. Empty input returns empty output without
    /// touching the store.
    async fn mget_bytes(&self, keys: &[String]) -> CacheResult<Vec<Option<Vec<u8>>>>;

    /// Pipelined, non-transactional batch write. Empty input is a no-op.
    async fn batch_set_bytes(&self, items: &[BatchSetItem<'_>]) -> CacheResult<()>;

    /// Advisory lock: sets `key` to a sentinel value only if absent, with
    /// `ttl` as a crash guard. Returns `true` if the caller now holds it.
    async fn try_lock(&self, key: &str, ttl: Duration) -> CacheResult<bool>;

    /// Releases a lock taken with [`try_lock`](L1::try_lock).
    async fn release_lock(&self, key: &str) -> CacheResult<()>;

    async fn ping(&self) -> CacheResult<()>;

    #[cfg(feature = "redis")]
    fn as_redis(&self) -> Option<&super::RedisCache> {
        None
    }
}

/// Ergonomic, envelope- and JSON-aware helpers layered over [`L1`]. Blanket
/// implemented so every backend gets them for free.
#[async_trait]
pub trait L1Ext: L1 {
    async fn get_envelope<T: DeserializeOwned + Send>(
        &self,
        key: &str,
    ) -> CacheResult<Option<CacheEnvelope<T>>> {
        match self.get_bytes(key).await? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes).ok()),
            None => Ok(None),
        }
    }

    async fn set_envelope<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> CacheResult<()> {
        let envelope = CacheEnvelope::new(value);
        let bytes = serde_json::to_vec(&envelope)
            .map_err(|e| super::error::CacheError::Serialization(e.to_string()))?;
        self.set_bytes(key, &bytes, ttl).await
    }

    async fn mget_envelopes<T: DeserializeOwned + Send>(
        &self,
        keys: &[String],
    ) -> CacheResult<Vec<Option<CacheEnvelope<T>>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let raw = self.mget_bytes(keys).await?;
        Ok(raw
            .into_iter()
            .map(|opt| opt.and_then(|bytes| serde_json::from_slice(&bytes).ok()))
            .collect())
    }

    /// Polls `key` at `interval` until an envelope appears or `timeout`
    /// elapses. Used by the cross-process coalescer to wait on whichever
    /// instance won the build lock.
    async fn wait_for_key<T: DeserializeOwned + Send>(
        &self,
        key: &str,
        timeout: Duration,
        interval: Duration,
    ) -> CacheResult<Option<CacheEnvelope<T>>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(env) = self.get_envelope::<T>(key).await? {
                return Ok(Some(env));
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(interval).await;
        }
    }
}

impl<T: L1 + ?Sized> L1Ext for T {}
