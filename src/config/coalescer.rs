use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Cross-process single-flight coalescing, layered on top of the
/// always-on in-process coalescer. Off by default: a single-instance
/// deployment gets no benefit from the advisory Redis lock and would only
/// pay its round trips.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct CoalescerConfig {
    #[serde(default)]
    pub cross_process: bool,

    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,

    #[serde(default = "default_wait_timeout_secs")]
    pub wait_timeout_secs: u64,

    #[serde(default = "default_wait_interval_ms")]
    pub wait_interval_ms: u64,
}

impl Default for CoalescerConfig {
    fn default() -> Self {
        Self {
            cross_process: false,
            lock_ttl_secs: default_lock_ttl_secs(),
            wait_timeout_secs: default_wait_timeout_secs(),
            wait_interval_ms: default_wait_interval_ms(),
        }
    }
}

impl CoalescerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lock_ttl_secs == 0 {
            return Err(ConfigError::Validation(
                "coalescer.lock_ttl_secs must be greater than zero".to_string(),
            ));
        }
        if self.wait_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "coalescer.wait_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn lock_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn wait_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.wait_timeout_secs)
    }

    pub fn wait_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.wait_interval_ms)
    }
}

fn default_lock_ttl_secs() -> u64 {
    3
}

fn default_wait_timeout_secs() -> u64 {
    2
}

fn default_wait_interval_ms() -> u64 {
    50
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_deployment() {
        let cfg = CoalescerConfig::default();
        assert!(!cfg.cross_process);
        assert_eq!(cfg.lock_ttl_secs, 3);
        assert_eq!(cfg.wait_timeout_secs, 2);
        assert_eq!(cfg.wait_interval_ms, 50);
    }

    #[test]
    fn rejects_zero_lock_ttl() {
        let cfg = CoalescerConfig {
            lock_ttl_secs: 0,
            ..CoalescerConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
