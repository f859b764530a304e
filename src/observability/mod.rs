//! Observability: structured logging, optional OpenTelemetry tracing, and
//! Prometheus metrics.

pub mod metrics;
mod tracing_init;

pub use tracing_init::*;
