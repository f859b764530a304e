use serde::{Deserialize, Serialize};

use super::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
#[serde(deny_unknown_fields)]
pub enum L1Config {
    None,
    Memory(MemoryL1Config),
    Redis(RedisL1Config),
}

impl Default for L1Config {
    fn default() -> Self {
        L1Config::Memory(MemoryL1Config::default())
    }
}

impl L1Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            L1Config::None => Ok(()),
            L1Config::Memory(c) => c.validate(),
            L1Config::Redis(c) => c.validate(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryL1Config {
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

impl Default for MemoryL1Config {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
        }
    }
}

impl MemoryL1Config {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_entries == 0 {
            return Err(ConfigError::Validation(
                "cache.max_entries must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_max_entries() -> usize {
    100_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisL1Config {
    pub url: String,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    #[serde(default)]
    pub cluster: Option<RedisClusterConfig>,
}

impl RedisL1Config {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::Validation(
                "cache.url must not be empty for the redis backend".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_key_prefix() -> String {
    String::new()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisClusterConfig {
    #[serde(default)]
    pub read_from_replicas: bool,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_connection_timeout_secs")]
    pub connection_timeout_secs: u64,
}

fn default_retries() -> u32 {
    3
}

fn default_connection_timeout_secs() -> u64 {
    3
}

/// Per-kind L1 TTLs plus the SWR staleness cutoff, all defaulted from the
/// reference deployment's observed values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheTtlConfig {
    #[serde(default = "default_ttl_search")]
    pub ttl_search_secs: u64,
    #[serde(default = "default_ttl_tweet")]
    pub ttl_tweet_secs: u64,
    #[serde(default = "default_ttl_tweet_detail")]
    pub ttl_tweet_detail_secs: u64,
    #[serde(default = "default_ttl_profile")]
    pub ttl_profile_secs: u64,
    #[serde(default = "default_ttl_user_tweets")]
    pub ttl_user_tweets_secs: u64,
    #[serde(default = "default_ttl_social")]
    pub ttl_social_secs: u64,
    #[serde(default = "default_swr_threshold")]
    pub swr_threshold_secs: u64,
    #[serde(default = "default_cache_connect_timeout")]
    pub cache_connect_timeout_secs: u64,
}

impl Default for CacheTtlConfig {
    fn default() -> Self {
        Self {
            ttl_search_secs: default_ttl_search(),
            ttl_tweet_secs: default_ttl_tweet(),
            ttl_tweet_detail_secs: default_ttl_tweet_detail(),
            ttl_profile_secs: default_ttl_profile(),
            ttl_user_tweets_secs: default_ttl_user_tweets(),
            ttl_social_secs: default_ttl_social(),
            swr_threshold_secs: default_swr_threshold(),
            cache_connect_timeout_secs: default_cache_connect_timeout(),
        }
    }
}

impl CacheTtlConfig {
    pub fn ttl_for(&self, kind: crate::cache::RecordKind) -> std::time::Duration {
        use crate::cache::RecordKind::*;
        let secs = match kind {
            Profile => self.ttl_profile_secs,
            Tweet => self.ttl_tweet_secs,
            TweetDetail => self.ttl_tweet_detail_secs,
            UserTweets => self.ttl_user_tweets_secs,
            Search => self.ttl_search_secs,
            Social => self.ttl_social_secs,
        };
        std::time::Duration::from_secs(secs)
    }
}

fn default_ttl_search() -> u64 {
    60
}
fn default_ttl_tweet() -> u64 {
    1800
}
fn default_ttl_tweet_detail() -> u64 {
    300
}
fn default_ttl_profile() -> u64 {
    60
}
fn default_ttl_user_tweets() -> u64 {
    120
}
fn default_ttl_social() -> u64 {
    120
}
fn default_swr_threshold() -> u64 {
    30
}
fn default_cache_connect_timeout() -> u64 {
    3
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::RecordKind;

    #[test]
    fn defaults_match_reference_deployment() {
        let ttl = CacheTtlConfig::default();
        assert_eq!(ttl.ttl_search_secs, 60);
        assert_eq!(ttl.ttl_tweet_secs, 1800);
        assert_eq!(ttl.ttl_tweet_detail_secs, 300);
        assert_eq!(ttl.ttl_profile_secs, 60);
        assert_eq!(ttl.ttl_user_tweets_secs, 120);
        assert_eq!(ttl.ttl_social_secs, 120);
        assert_eq!(ttl.swr_threshold_secs, 30);
    }

    #[test]
    fn ttl_for_dispatches_by_kind() {
        let ttl = CacheTtlConfig::default();
        assert_eq!(
            ttl.ttl_for(RecordKind::Tweet).as_secs(),
            ttl.ttl_tweet_secs
        );
        assert_eq!(
            ttl.ttl_for(RecordKind::Search).as_secs(),
            ttl.ttl_search_secs
        );
    }

    #[test]
    fn memory_config_rejects_zero_capacity() {
        let cfg = L1Config::Memory(MemoryL1Config { max_entries: 0 });
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn redis_config_rejects_empty_url() {
        let cfg = L1Config::Redis(RedisL1Config {
            url: "".to_string(),
            key_prefix: String::new(),
            cluster: None,
        });
        assert!(cfg.validate().is_err());
    }
}
