//! Configuration for the cache gateway.
//!
//! The gateway is configured via a TOML file, with support for environment
//! variable interpolation using `${VAR_NAME}` syntax.
//!
//! # Example
//!
//! ```toml
//! [cache]
//! backend = "redis"
//! url = "redis://${REDIS_HOST}:6379"
//!
//! [search_index]
//! host = "typesense"
//! ```

mod accounts;
mod analytics;
mod cache;
mod coalescer;
mod egress;
mod observability;
mod search_index;
mod server;
mod upstream;

use std::path::Path;

pub use accounts::{AccountCredentialSpec, AccountsConfig};
pub use analytics::AnalyticsConfig;
pub use cache::{CacheTtlConfig, L1Config, MemoryL1Config, RedisClusterConfig, RedisL1Config};
pub use coalescer::CoalescerConfig;
pub use egress::{EgressConfig, EgressRotationPolicy};
pub use observability::*;
use serde::{Deserialize, Serialize};
pub use search_index::SearchIndexConfig;
pub use server::ServerConfig;
pub use upstream::UpstreamConfig;

/// Root configuration for the cache gateway.
///
/// All sections are optional with sensible defaults, so a minimal
/// deployment needs no config file at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct CacheGatewayConfig {
    /// Liveness/readiness/metrics probe server. Not the product route
    /// layer, which is out of scope.
    #[serde(default)]
    pub server: ServerConfig,

    /// L1 record cache backend and per-kind TTLs.
    #[serde(default)]
    pub cache: L1Config,

    #[serde(default)]
    pub cache_ttl: CacheTtlConfig,

    /// L2 search index (Typesense-shaped fallback tier for search).
    #[serde(default)]
    pub search_index: SearchIndexConfig,

    /// Analytics sink (ClickHouse-shaped, buffered, best-effort).
    #[serde(default)]
    pub analytics: AnalyticsConfig,

    /// Egress identities and the session pool bucketed by them.
    #[serde(default)]
    pub egress: EgressConfig,

    /// Operator-supplied account credentials.
    #[serde(default)]
    pub accounts: AccountsConfig,

    /// Upstream GraphQL endpoint and static request material.
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Single-flight coalescing, in-process always on, cross-process
    /// optional.
    #[serde(default)]
    pub coalescer: CoalescerConfig,

    /// Logging, tracing, metrics.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl CacheGatewayConfig {
    /// Load configuration from a TOML file, expanding `${VAR}` references
    /// against the process environment.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e, path.as_ref().to_path_buf()))?;
        Self::from_str(&contents)
    }

    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(contents)?;
        let raw: toml::Value = toml::from_str(&expanded).map_err(ConfigError::Parse)?;
        check_disabled_features(&raw)?;

        let mut config: CacheGatewayConfig =
            toml::from_str(&expanded).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration for consistency and completeness.
    fn validate(&mut self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.cache.validate()?;
        self.search_index.validate()?;
        self.analytics.validate()?;
        self.egress.validate()?;
        self.accounts.validate()?;
        self.coalescer.validate()?;
        self.upstream.validate()?;
        Ok(())
    }

    /// Generate the JSON schema for the gateway configuration.
    #[cfg(feature = "json-schema")]
    pub fn json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(CacheGatewayConfig)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {1}: {0}")]
    Io(std::io::Error, std::path::PathBuf),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

/// Check for feature-gated configuration values before typed deserialization.
///
/// When a user configures a backend that requires a cargo feature not
/// compiled into this binary, serde produces cryptic "unknown variant"
/// errors. This inspects the raw TOML to detect such cases and produce an
/// actionable error telling the user exactly which feature to enable.
fn check_disabled_features(raw: &toml::Value) -> Result<(), ConfigError> {
    let mut issues: Vec<(String, &str)> = Vec::new();

    if let Some(type_val) = raw
        .get("cache")
        .and_then(|v| v.get("backend"))
        .and_then(|v| v.as_str())
    {
        check_cache_feature(type_val, &mut issues);
    }

    if raw
        .get("observability")
        .and_then(|v| v.get("metrics"))
        .and_then(|v| v.get("enabled"))
        .and_then(|v| v.as_bool())
        == Some(true)
    {
        check_metrics_feature(&mut issues);
    }

    if raw
        .get("observability")
        .and_then(|v| v.get("tracing"))
        .and_then(|v| v.get("otlp"))
        .is_some()
    {
        check_otlp_feature(&mut issues);
    }

    if issues.is_empty() {
        return Ok(());
    }

    let details = issues
        .iter()
        .map(|(msg, _)| msg.as_str())
        .collect::<Vec<_>>()
        .join("\n  - ");
    let features = issues
        .iter()
        .map(|(_, feat)| *feat)
        .collect::<Vec<_>>()
        .join(",");

    Err(ConfigError::Validation(format!(
        "Configuration requires features not compiled in this build:\n  \
         - {details}\n\n\
         Rebuild with: cargo build --features {features}"
    )))
}

fn check_cache_feature(type_val: &str, _issues: &mut Vec<(String, &str)>) {
    if type_val == "redis" {
        #[cfg(not(feature = "redis"))]
        _issues.push((
            "cache backend 'redis' requires the 'redis' feature".into(),
            "redis",
        ));
    }
}

fn check_metrics_feature(_issues: &mut Vec<(String, &str)>) {
    #[cfg(not(feature = "prometheus"))]
    _issues.push((
        "observability.metrics.enabled requires the 'prometheus' feature".into(),
        "prometheus",
    ));
}

fn check_otlp_feature(_issues: &mut Vec<(String, &str)>) {
    #[cfg(not(feature = "otlp"))]
    _issues.push((
        "observability.tracing.otlp requires the 'otlp' feature".into(),
        "otlp",
    ));
}

/// Expand environment variables in the format `${VAR_NAME}`.
/// Skips commented lines (lines where content before the variable is a comment).
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").unwrap();
    let mut result = String::with_capacity(input.len());

    for line in input.lines() {
        let comment_pos = line.find('#');

        let mut line_result = String::with_capacity(line.len());
        let mut last_end = 0;

        for cap in re.captures_iter(line) {
            let match_start = cap.get(0).unwrap().start();

            if let Some(pos) = comment_pos
                && match_start >= pos
            {
                continue;
            }

            line_result.push_str(&line[last_end..match_start]);

            let var_name = &cap[1];
            let value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;
            line_result.push_str(&value);

            last_end = cap.get(0).unwrap().end();
        }

        line_result.push_str(&line[last_end..]);
        result.push_str(&line_result);
        result.push('\n');
    }

    if !input.ends_with('\n') && result.ends_with('\n') {
        result.pop();
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_load_from_empty_document() {
        let config = CacheGatewayConfig::from_str("").unwrap();
        assert_eq!(config.server.port, 8080);
        assert!(matches!(config.cache, L1Config::Memory(_)));
    }

    #[test]
    fn expands_env_vars_outside_comments() {
        // SAFETY: test-only, single-threaded env mutation.
        unsafe {
            std::env::set_var("CORVID_TEST_REDIS_URL", "redis://example:6379");
        }
        let toml = r#"
            [cache]
            backend = "redis"
            url = "${CORVID_TEST_REDIS_URL}"
        "#;
        let config = CacheGatewayConfig::from_str(toml).unwrap();
        match config.cache {
            L1Config::Redis(r) => assert_eq!(r.url, "redis://example:6379"),
            other => panic!("expected redis config, got {other:?}"),
        }
    }

    #[test]
    fn missing_env_var_is_an_error() {
        let toml = r#"
            [cache]
            backend = "redis"
            url = "${CORVID_DOES_NOT_EXIST_ABC}"
        "#;
        assert!(matches!(
            CacheGatewayConfig::from_str(toml),
            Err(ConfigError::EnvVarNotFound(_))
        ));
    }

    #[test]
    fn unknown_field_is_rejected() {
        let toml = r#"
            [cache]
            backend = "memory"
            bogus_field = 1
        "#;
        assert!(CacheGatewayConfig::from_str(toml).is_err());
    }

    #[test]
    fn invalid_ttl_fails_validation() {
        let toml = r#"
            [search_index]
            hydration_coverage = 2.0
        "#;
        assert!(CacheGatewayConfig::from_str(toml).is_err());
    }
}
