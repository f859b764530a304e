use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Operator-supplied account credentials, loaded inline or from a file.
/// When both are empty the account pool starts empty and every request
/// falls back to the self-minted guest pool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct AccountsConfig {
    /// Inline account credential records.
    #[serde(default)]
    pub accounts: Vec<AccountCredentialSpec>,

    /// Path to a JSON file holding the same shape as `accounts`, merged in
    /// at load time.
    #[serde(default)]
    pub file: Option<PathBuf>,

    #[serde(default = "default_rate_limit_cooldown_secs")]
    pub rate_limit_cooldown_secs: u64,

    #[serde(default = "default_forbidden_cooldown_secs")]
    pub forbidden_cooldown_secs: u64,
}

impl AccountsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for account in &self.accounts {
            if account.auth_token.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "accounts entries must carry a non-empty auth_token".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct AccountCredentialSpec {
    pub auth_token: String,
    pub csrf_cookie: String,
    pub label: String,
    #[serde(default)]
    pub egress_identity: String,
}

fn default_rate_limit_cooldown_secs() -> u64 {
    15 * 60
}

fn default_forbidden_cooldown_secs() -> u64 {
    60 * 60
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_cooldowns() {
        let cfg = AccountsConfig::default();
        assert_eq!(cfg.rate_limit_cooldown_secs, 900);
        assert_eq!(cfg.forbidden_cooldown_secs, 3600);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_blank_auth_token() {
        let cfg = AccountsConfig {
            accounts: vec![AccountCredentialSpec {
                auth_token: String::new(),
                csrf_cookie: "ct0".to_string(),
                label: "a".to_string(),
                egress_identity: String::new(),
            }],
            ..AccountsConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
