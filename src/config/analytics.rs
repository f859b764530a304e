use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Analytics sink (ClickHouse-shaped) configuration: buffered, best-effort
/// event recording for records served and search queries issued.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct AnalyticsConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_user")]
    pub user: String,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default = "default_database")]
    pub database: String,

    /// Create the target tables from `init_sql_path` on startup if missing.
    #[serde(default = "default_enabled")]
    pub bootstrap: bool,

    #[serde(default = "default_init_sql_path")]
    pub init_sql_path: String,

    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,

    /// Bounded channel capacity per ring buffer (records, search queries)
    /// before new pushes are dropped rather than blocking the caller.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            host: default_host(),
            port: default_port(),
            user: default_user(),
            password: None,
            database: default_database(),
            bootstrap: default_enabled(),
            init_sql_path: default_init_sql_path(),
            flush_interval_secs: default_flush_interval_secs(),
            buffer_capacity: default_buffer_capacity(),
        }
    }
}

impl AnalyticsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.host.trim().is_empty() {
            return Err(ConfigError::Validation(
                "analytics.host must not be empty when enabled".to_string(),
            ));
        }
        if self.flush_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "analytics.flush_interval_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_enabled() -> bool {
    true
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    8123
}

fn default_user() -> String {
    "default".to_string()
}

fn default_database() -> String {
    "syntax".to_string()
}

fn default_init_sql_path() -> String {
    "/app/scripts/init_db.sql".to_string()
}

fn default_flush_interval_secs() -> u64 {
    5
}

fn default_buffer_capacity() -> usize {
    10_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_deployment() {
        let cfg = AnalyticsConfig::default();
        assert!(cfg.bootstrap);
        assert_eq!(cfg.database, "syntax");
        assert_eq!(cfg.flush_interval_secs, 5);
    }

    #[test]
    fn rejects_zero_flush_interval() {
        let cfg = AnalyticsConfig {
            flush_interval_secs: 0,
            ..AnalyticsConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
