use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Egress identities (direct + proxies) and the session pool bucketed by
/// them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct EgressConfig {
    /// Proxy URLs available for rotation. Empty means direct egress only.
    #[serde(default)]
    pub proxy_list: Vec<String>,

    #[serde(default)]
    pub rotation: EgressRotationPolicy,

    /// Max warm sessions retained per egress identity.
    #[serde(default = "default_session_pool_size")]
    pub session_pool_size: usize,

    /// Sessions pre-warmed per egress identity at startup.
    #[serde(default = "default_prewarm_count")]
    pub prewarm_count: usize,
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self {
            proxy_list: Vec::new(),
            rotation: EgressRotationPolicy::default(),
            session_pool_size: default_session_pool_size(),
            prewarm_count: default_prewarm_count(),
        }
    }
}

impl EgressConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session_pool_size == 0 {
            return Err(ConfigError::Validation(
                "egress.session_pool_size must be greater than zero".to_string(),
            ));
        }
        for url in &self.proxy_list {
            if url.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "egress.proxy_list entries must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub enum EgressRotationPolicy {
    #[default]
    RoundRobin,
    Random,
    /// Sticky per partition key (e.g. credential id).
    Sticky,
}

fn default_session_pool_size() -> usize {
    20
}

fn default_prewarm_count() -> usize {
    2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_direct_only_round_robin() {
        let cfg = EgressConfig::default();
        assert!(cfg.proxy_list.is_empty());
        assert_eq!(cfg.rotation, EgressRotationPolicy::RoundRobin);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_zero_pool_size() {
        let cfg = EgressConfig {
            session_pool_size: 0,
            ..EgressConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_blank_proxy_entries() {
        let cfg = EgressConfig {
            proxy_list: vec!["".to_string()],
            ..EgressConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
