use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Wraps every value stored in L1. `stored_at` is a Unix timestamp (seconds)
/// captured at write time; freshness is computed from it rather than from
/// the backing store's remaining TTL, because a record may be served up to
/// its full TTL even after it has gone stale for SWR purposes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEnvelope<T> {
    pub data: T,
    pub stored_at: u64,
}

impl<T> CacheEnvelope<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            stored_at: now_secs(),
        }
    }

    /// Age in seconds since this envelope was written.
    pub fn age_secs(&self) -> u64 {
        now_secs().saturating_sub(self.stored_at)
    }

    pub fn is_fresh(&self, swr_threshold_secs: u64) -> bool {
        self.age_secs() < swr_threshold_secs
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs()
}
