use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Observability configuration: logging, tracing, metrics. SIEM formats,
/// request/response body logging, the usage dead-letter queue and response
/// schema validation all belonged to the excluded route layer and have no
/// counterpart here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub tracing: TracingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

// ─────────────────────────────────────────────────────────────────────────────
// Logging
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    #[serde(default)]
    pub format: LogFormat,

    /// Filter directives (e.g. "corvid=debug,redis=warn"), layered on top
    /// of `level` the way `EnvFilter::try_new` would.
    #[serde(default)]
    pub filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            filter: None,
        }
    }
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable multi-line format.
    Pretty,
    /// Compact single-line format.
    #[default]
    Compact,
    /// JSON format, for log aggregation.
    Json,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tracing
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct TracingConfig {
    /// Enable OTLP export. No-op unless the `otlp` feature is compiled in.
    #[serde(default)]
    pub otlp: Option<OtlpConfig>,

    #[serde(default = "default_service_name")]
    pub service_name: String,

    #[serde(default)]
    pub environment: Option<String>,
}

fn default_service_name() -> String {
    "corvid-cache-gateway".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct OtlpConfig {
    pub endpoint: String,

    #[serde(default)]
    pub headers: HashMap<String, String>,

    #[serde(default = "default_otlp_timeout")]
    pub timeout_secs: u64,
}

fn default_otlp_timeout() -> u64 {
    10
}

// ─────────────────────────────────────────────────────────────────────────────
// Metrics
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Enable the `corvid_*` Prometheus series. No-op unless the
    /// `prometheus` feature is compiled in.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Bind address for the Prometheus scrape endpoint, served by the same
    /// probe server as `/healthz`/`/readyz`.
    #[serde(default = "default_metrics_path")]
    pub path: String,

    #[serde(default = "default_latency_buckets")]
    pub latency_buckets_ms: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_metrics_path(),
            latency_buckets_ms: default_latency_buckets(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

fn default_latency_buckets() -> Vec<f64> {
    vec![
        10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_logging_is_compact_info() {
        let cfg = LoggingConfig::default();
        assert!(matches!(cfg.level, LogLevel::Info));
        assert_eq!(cfg.format, LogFormat::Compact);
    }

    #[test]
    fn default_metrics_enabled_with_standard_path() {
        let cfg = MetricsConfig::default();
        assert!(cfg.enabled);
        assert_eq!(cfg.path, "/metrics");
    }
}
