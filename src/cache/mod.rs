pub mod envelope;
pub mod error;
pub mod keys;
mod memory;
#[cfg(feature = "redis")]
mod redis;
mod traits;

pub use envelope::CacheEnvelope;
pub use keys::{CacheKeys, RecordKind};
pub use memory::MemoryCache;
#[cfg(feature = "redis")]
pub use redis::RedisCache;
pub use traits::{BatchSetItem, L1, L1Ext};

/// Builds the configured L1 backend. `None` means the deployment runs with
/// no record cache at all (every call falls straight through to `build`).
pub async fn build_l1(
    config: &crate::config::L1Config,
) -> error::CacheResult<Option<std::sync::Arc<dyn L1>>> {
    match config {
        crate::config::L1Config::None => Ok(None),
        crate::config::L1Config::Memory(cfg) => {
            Ok(Some(std::sync::Arc::new(MemoryCache::new(cfg))))
        }
        #[cfg(feature = "redis")]
        crate::config::L1Config::Redis(cfg) => {
            Ok(Some(std::sync::Arc::new(RedisCache::from_config(cfg).await?)))
        }
        #[cfg(not(feature = "redis"))]
        crate::config::L1Config::Redis(_) => Err(error::CacheError::NotConfigured),
    }
}
