use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Upstream GraphQL endpoint and the static request material the client
/// attaches to every call (bearer token, origin/referer, default feature
/// flags).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct UpstreamConfig {
    #[serde(default = "default_graphql_base_url")]
    pub graphql_base_url: String,

    #[serde(default = "default_homepage_url")]
    pub homepage_url: String,

    /// Guest token activation endpoint, called once per guest mint.
    #[serde(default = "default_guest_token_url")]
    pub guest_token_url: String,

    #[serde(default = "default_origin")]
    pub origin: String,

    pub bearer_token: String,

    /// Default `features` query parameter payload, merged under each
    /// operation's own overrides.
    #[serde(default)]
    pub default_features: serde_json::Map<String, serde_json::Value>,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            graphql_base_url: default_graphql_base_url(),
            homepage_url: default_homepage_url(),
            guest_token_url: default_guest_token_url(),
            origin: default_origin(),
            bearer_token: String::new(),
            default_features: serde_json::Map::new(),
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

impl UpstreamConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connect_timeout_ms == 0 || self.read_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "upstream timeouts must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_graphql_base_url() -> String {
    "https://api.example-upstream.com/i/api/graphql".to_string()
}

fn default_homepage_url() -> String {
    "https://example-upstream.com/".to_string()
}

fn default_guest_token_url() -> String {
    "https://api.example-upstream.com/1.1/guest/activate.json".to_string()
}

fn default_origin() -> String {
    "https://example-upstream.com".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    3_000
}

fn default_read_timeout_ms() -> u64 {
    15_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(UpstreamConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_timeouts() {
        let cfg = UpstreamConfig {
            connect_timeout_ms: 0,
            ..UpstreamConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
