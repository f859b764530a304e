//! Prometheus metrics for the cache gateway: L1/L2 operations, coalescing,
//! credential pool health, session pool occupancy, and upstream latency.

#[cfg(feature = "prometheus")]
use std::sync::OnceLock;

#[cfg(feature = "prometheus")]
use metrics::{counter, gauge, histogram};
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::config::MetricsConfig;

#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

#[cfg(feature = "prometheus")]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        return Ok(());
    }

    let builder = PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Suffix("_duration_seconds".to_string()),
            &seconds_from_ms(&config.latency_buckets_ms),
        )
        .map_err(|e| MetricsError::Setup(e.to_string()))?;

    let handle = builder.install_recorder().map_err(MetricsError::Install)?;

    PROMETHEUS_HANDLE
        .set(handle)
        .map_err(|_| MetricsError::Setup("metrics already initialized".to_string()))?;

    Ok(())
}

#[cfg(not(feature = "prometheus"))]
pub fn init_metrics(_config: &MetricsConfig) -> Result<(), MetricsError> {
    Ok(())
}

#[cfg(feature = "prometheus")]
fn seconds_from_ms(ms_buckets: &[f64]) -> Vec<f64> {
    ms_buckets.iter().map(|ms| ms / 1000.0).collect()
}

#[cfg(feature = "prometheus")]
pub fn get_prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ─────────────────────────────────────────────────────────────────────────────
// Metric recording functions
// ─────────────────────────────────────────────────────────────────────────────

/// `layer` ∈ {l1, l2}, `op` ∈ {get, set, mget, batch_set}, `outcome` ∈
/// {hit, miss, stale, error}.
pub fn record_cache_operation(layer: &str, op: &str, outcome: &str) {
    #[cfg(feature = "prometheus")]
    counter!("corvid_cache_operations_total", "layer" => layer.to_string(), "op" => op.to_string(), "outcome" => outcome.to_string())
        .increment(1);
    #[cfg(not(feature = "prometheus"))]
    let _ = (layer, op, outcome);
}

/// `origin` ∈ {live, cache, stale, index}, matching [`crate::cache::CacheEnvelope`] freshness classification.
pub fn record_cache_origin(origin: &str) {
    #[cfg(feature = "prometheus")]
    counter!("corvid_cache_origin_total", "origin" => origin.to_string()).increment(1);
    #[cfg(not(feature = "prometheus"))]
    let _ = origin;
}

pub fn set_coalesce_waiters(count: i64) {
    #[cfg(feature = "prometheus")]
    gauge!("corvid_coalesce_waiters").set(count as f64);
    #[cfg(not(feature = "prometheus"))]
    let _ = count;
}

pub fn record_coalesce_build() {
    #[cfg(feature = "prometheus")]
    counter!("corvid_coalesce_builds_total").increment(1);
}

/// `kind` ∈ {guest, account}.
pub fn set_credential_pool_size(kind: &str, size: i64) {
    #[cfg(feature = "prometheus")]
    gauge!("corvid_credential_pool_size", "kind" => kind.to_string()).set(size as f64);
    #[cfg(not(feature = "prometheus"))]
    let _ = (kind, size);
}

pub fn set_credential_pool_health(kind: &str, avg_health: f64) {
    #[cfg(feature = "prometheus")]
    gauge!("corvid_credential_pool_health", "kind" => kind.to_string()).set(avg_health);
    #[cfg(not(feature = "prometheus"))]
    let _ = (kind, avg_health);
}

pub fn set_account_cooldowns_active(count: i64) {
    #[cfg(feature = "prometheus")]
    gauge!("corvid_account_cooldowns_active").set(count as f64);
    #[cfg(not(feature = "prometheus"))]
    let _ = count;
}

pub fn set_session_pool_size(egress: &str, size: i64) {
    #[cfg(feature = "prometheus")]
    gauge!("corvid_session_pool_size", "egress" => egress.to_string()).set(size as f64);
    #[cfg(not(feature = "prometheus"))]
    let _ = (egress, size);
}

pub fn record_upstream_request(status: &str, duration_secs: f64) {
    #[cfg(feature = "prometheus")]
    histogram!("corvid_upstream_request_duration_seconds", "status" => status.to_string())
        .record(duration_secs);
    #[cfg(not(feature = "prometheus"))]
    let _ = (status, duration_secs);
}

pub fn record_analytics_buffer_dropped(sink: &str) {
    #[cfg(feature = "prometheus")]
    counter!("corvid_analytics_buffer_dropped_total", "sink" => sink.to_string()).increment(1);
    #[cfg(not(feature = "prometheus"))]
    let _ = sink;
}

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("failed to set up metrics: {0}")]
    Setup(String),
    #[cfg(feature = "prometheus")]
    #[error("failed to install Prometheus recorder: {0}")]
    Install(#[from] metrics_exporter_prometheus::BuildError),
}
