use std::time::Duration;

use async_trait::async_trait;
use redis::{
    ConnectionInfo, IntoConnectionInfo, aio::MultiplexedConnection, cluster::ClusterClient,
    cluster_async::ClusterConnection,
};

use super::{
    error::CacheResult,
    traits::{BatchSetItem, L1},
};
use crate::config::RedisL1Config;

enum RedisConn {
    Standalone(MultiplexedConnection),
    Cluster(ClusterConnection),
}

macro_rules! redis_cmd {
    ($conn:expr, $cmd:expr) => {
        match $conn {
            RedisConn::Standalone(ref mut c) => $cmd.query_async(c).await,
            RedisConn::Cluster(ref mut c) => $cmd.query_async(c).await,
        }
    };
}

macro_rules! redis_pipe {
    ($conn:expr, $pipe:expr) => {
        match $conn {
            RedisConn::Standalone(ref mut c) => $pipe.query_async(c).await,
            RedisConn::Cluster(ref mut c) => $pipe.query_async(c).await,
        }
    };
}

enum RedisConnection {
    Standalone(redis::Client),
    Cluster(ClusterClient),
}

/// L1 backed by Redis (or a Redis-compatible cluster). Preserves TTL
/// semantics exactly: `SETEX` on write, `SET NX EX` for the advisory lock
/// used by the cross-process coalescer.
pub struct RedisCache {
    connection: RedisConnection,
    key_prefix: String,
}

impl RedisCache {
    pub async fn from_config(config: &RedisL1Config) -> CacheResult<Self> {
        let connection = if let Some(cluster) = &config.cluster {
            let nodes: Vec<ConnectionInfo> = config
                .url
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    let node_url = if s.starts_with("redis://") || s.starts_with("rediss://") {
                        s.to_string()
                    } else {
                        format!("redis://{s}")
                    };
                    node_url.into_connection_info()
                })
                .collect::<Result<Vec<_>, _>>()?;

            if nodes.is_empty() {
                return Err(super::error::CacheError::Redis(redis::RedisError::from((
                    redis::ErrorKind::InvalidClientConfig,
                    "no cluster nodes specified in url",
                ))));
            }

            let mut builder = redis::cluster::ClusterClientBuilder::new(nodes);
            if cluster.read_from_replicas {
                builder = builder.read_from_replicas();
            }
            builder = builder.retries(cluster.retries);
            builder =
                builder.connection_timeout(Duration::from_secs(cluster.connection_timeout_secs));
            RedisConnection::Cluster(builder.build()?)
        } else {
            RedisConnection::Standalone(redis::Client::open(config.url.as_str())?)
        };

        Ok(Self {
            connection,
            key_prefix: config.key_prefix.clone(),
        })
    }

    fn prefixed(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    async fn get_connection(&self) -> CacheResult<RedisConn> {
        match &self.connection {
            RedisConnection::Standalone(client) => {
                Ok(RedisConn::Standalone(
                    client.get_multiplexed_async_connection().await?,
                ))
            }
            RedisConnection::Cluster(client) => {
                Ok(RedisConn::Cluster(client.get_async_connection().await?))
            }
        }
    }
}

#[async_trait]
impl L1 for RedisCache {
    async fn get_bytes(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let mut conn = self.get_connection().await?;
        let full_key = self.prefixed(key);
        let data: Option<Vec<u8>> = redis_cmd!(conn, redis::cmd("GET").arg(&full_key))?;
        Ok(data)
    }

    async fn set_bytes(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()> {
        let mut conn = self.get_connection().await?;
        let full_key = self.prefixed(key);

        if ttl.as_secs() > 0 {
            let _: () = redis_cmd!(
                conn,
                redis::cmd("SETEX")
                    .arg(&full_key)
                    .arg(ttl.as_secs())
                    .arg(value)
            )?;
        } else {
            let _: () = redis_cmd!(conn, redis::cmd("SET").arg(&full_key).arg(value))?;
        }
        Ok(())
    }

    async fn mget_bytes(&self, keys: &[String]) -> CacheResult<Vec<Option<Vec<u8>>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.get_connection().await?;
        let full_keys: Vec<String> = keys.iter().map(|k| self.prefixed(k)).collect();
        let result: Vec<Option<Vec<u8>>> = redis_cmd!(conn, redis::cmd("MGET").arg(&full_keys))?;
        Ok(result)
    }

    async fn batch_set_bytes(&self, items: &[BatchSetItem<'_>]) -> CacheResult<()> {
        if items.is_empty() {
            return Ok(());
        }
        let mut conn = self.get_connection().await?;
        let mut pipe = redis::pipe();
        for item in items {
            let full_key = self.prefixed(&item.key);
            let bytes = serde_json::to_vec(item.value)
                .map_err(|e| super::error::CacheError::Serialization(e.to_string()))?;
            if item.ttl.as_secs() > 0 {
                pipe.cmd("SETEX")
                    .arg(&full_key)
                    .arg(item.ttl.as_secs())
                    .arg(bytes)
                    .ignore();
            } else {
                pipe.cmd("SET").arg(&full_key).arg(bytes).ignore();
            }
        }
        let _: () = redis_pipe!(conn, pipe.atomic())?;
        Ok(())
    }

    async fn try_lock(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        let mut conn = self.get_connection().await?;
        let full_key = self.prefixed(&format!("lock:{key}"));
        let result: Option<String> = redis_cmd!(
            conn,
            redis::cmd("SET")
                .arg(&full_key)
                .arg(1)
                .arg("NX")
                .arg("EX")
                .arg(ttl.as_secs().max(1))
        )?;
        Ok(result.is_some())
    }

    async fn release_lock(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.get_connection().await?;
        let full_key = self.prefixed(&format!("lock:{key}"));
        let _: () = redis_cmd!(conn, redis::cmd("DEL").arg(&full_key))?;
        Ok(())
    }

    async fn ping(&self) -> CacheResult<()> {
        let mut conn = self.get_connection().await?;
        let _: String = redis_cmd!(conn, redis::cmd("PING"))?;
        Ok(())
    }

    fn as_redis(&self) -> Option<&RedisCache> {
        Some(self)
    }
}
