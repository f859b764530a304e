use serde::{Deserialize, Serialize};

use super::ConfigError;

/// L2 search-index (Typesense) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct SearchIndexConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_protocol")]
    pub protocol: String,

    #[serde(default = "default_api_key")]
    pub api_key: String,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Minimum fraction of search-result ids that must hydrate from L1 for
    /// the index hit to be served, below which the caller falls through to
    /// a live fetch.
    #[serde(default = "default_hydration_coverage")]
    pub hydration_coverage: f64,
}

impl Default for SearchIndexConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            host: default_host(),
            port: default_port(),
            protocol: default_protocol(),
            api_key: default_api_key(),
            connect_timeout_secs: default_connect_timeout_secs(),
            hydration_coverage: default_hydration_coverage(),
        }
    }
}

impl SearchIndexConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.host.trim().is_empty() {
            return Err(ConfigError::Validation(
                "search_index.host must not be empty when enabled".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.hydration_coverage) {
            return Err(ConfigError::Validation(
                "search_index.hydration_coverage must be between 0.0 and 1.0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }
}

fn default_enabled() -> bool {
    true
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    8108
}

fn default_protocol() -> String {
    "http".to_string()
}

fn default_api_key() -> String {
    "syntax-typesense-key".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    3
}

fn default_hydration_coverage() -> f64 {
    0.8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_deployment() {
        let cfg = SearchIndexConfig::default();
        assert!(cfg.enabled);
        assert_eq!(cfg.port, 8108);
        assert_eq!(cfg.hydration_coverage, 0.8);
        assert_eq!(cfg.url(), "http://localhost:8108");
    }

    #[test]
    fn rejects_out_of_range_coverage() {
        let cfg = SearchIndexConfig {
            hydration_coverage: 1.5,
            ..SearchIndexConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn disabled_skips_host_check() {
        let cfg = SearchIndexConfig {
            enabled: false,
            host: String::new(),
            ..SearchIndexConfig::default()
        };
        assert!(cfg.validate().is_ok());
    }
}
