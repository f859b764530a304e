use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache not configured")]
    NotConfigured,

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[cfg(feature = "redis")]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type CacheResult<T> = Result<T, CacheError>;
