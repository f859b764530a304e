//! Tracing initialization with configurable logging formats and optional
//! OpenTelemetry export behind the `otlp` feature.

#[cfg(feature = "otlp")]
use opentelemetry::trace::TracerProvider as _;
#[cfg(feature = "otlp")]
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(not(feature = "otlp"))]
struct SdkTracerProviderStub;
#[cfg(not(feature = "otlp"))]
struct TracerStub;

use crate::config::{LogFormat, LoggingConfig, ObservabilityConfig};

/// Initialize the global tracing subscriber: console logging in the
/// configured format plus an env-based filter, and OTLP export when
/// `observability.tracing.otlp` is set and the `otlp` feature is compiled
/// in.
pub fn init_tracing(config: &ObservabilityConfig) -> Result<TracingGuard, TracingError> {
    let filter = build_env_filter(&config.logging);

    #[cfg(feature = "otlp")]
    let otel_provider = if config.tracing.otlp.is_some() {
        Some(build_otel_provider(&config.tracing)?)
    } else {
        None
    };
    #[cfg(not(feature = "otlp"))]
    let otel_provider: Option<SdkTracerProviderStub> = {
        if config.tracing.otlp.is_some() {
            tracing::warn!(
                "observability.tracing.otlp is configured but the 'otlp' feature is not \
                 compiled in; rebuild with --features otlp to export spans"
            );
        }
        None
    };

    #[cfg(feature = "otlp")]
    let otel_tracer = otel_provider
        .as_ref()
        .map(|p| p.tracer(config.tracing.service_name.clone()));
    #[cfg(not(feature = "otlp"))]
    let otel_tracer: Option<TracerStub> = None;

    match (&config.logging.format, otel_tracer) {
        #[cfg(feature = "otlp")]
        (LogFormat::Pretty, Some(tracer)) => {
            let fmt_layer = tracing_subscriber::fmt::layer().pretty();
            let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .with(otel_layer)
                .init();
        }
        (LogFormat::Pretty, None) => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        #[cfg(feature = "otlp")]
        (LogFormat::Compact, Some(tracer)) => {
            let fmt_layer = tracing_subscriber::fmt::layer().compact();
            let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .with(otel_layer)
                .init();
        }
        (LogFormat::Compact, None) => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().compact())
                .init();
        }
        #[cfg(feature = "otlp")]
        (LogFormat::Json, Some(tracer)) => {
            let fmt_layer = tracing_subscriber::fmt::layer().json();
            let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .with(otel_layer)
                .init();
        }
        (LogFormat::Json, None) => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        #[cfg(not(feature = "otlp"))]
        (_, Some(_)) => unreachable!(),
    }

    #[cfg(feature = "otlp")]
    if let Some(ref provider) = otel_provider {
        opentelemetry::global::set_tracer_provider(provider.clone());
        opentelemetry::global::set_text_map_propagator(
            opentelemetry_sdk::propagation::TraceContextPropagator::new(),
        );
        tracing::info!(
            service_name = %config.tracing.service_name,
            "OpenTelemetry tracing enabled"
        );
    }
    #[cfg(not(feature = "otlp"))]
    let _ = &otel_provider;

    Ok(TracingGuard {
        provider: otel_provider,
    })
}

#[cfg(feature = "otlp")]
fn build_otel_provider(
    config: &crate::config::TracingConfig,
) -> Result<SdkTracerProvider, TracingError> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::Resource;

    let mut resource_attrs = vec![KeyValue::new("service.name", config.service_name.clone())];
    if let Some(env) = &config.environment {
        resource_attrs.push(KeyValue::new("deployment.environment", env.clone()));
    }
    let resource = Resource::builder().with_attributes(resource_attrs).build();

    let provider = if let Some(otlp) = &config.otlp {
        let exporter = build_otlp_exporter(otlp)?;
        SdkTracerProvider::builder()
            .with_resource(resource)
            .with_batch_exporter(exporter)
            .build()
    } else {
        SdkTracerProvider::builder().with_resource(resource).build()
    };

    Ok(provider)
}

#[cfg(feature = "otlp")]
fn build_otlp_exporter(
    config: &crate::config::OtlpConfig,
) -> Result<opentelemetry_otlp::SpanExporter, TracingError> {
    use std::time::Duration;

    use opentelemetry_otlp::WithExportConfig;

    opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.endpoint)
        .with_timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| TracingError::Init(format!("failed to create OTLP exporter: {e}")))
}

/// Build the environment filter from logging config. `RUST_LOG` takes
/// precedence over `logging.filter`, which takes precedence over
/// `logging.level`.
fn build_env_filter(config: &LoggingConfig) -> EnvFilter {
    let base_level = match config.level {
        crate::config::LogLevel::Trace => "trace",
        crate::config::LogLevel::Debug => "debug",
        crate::config::LogLevel::Info => "info",
        crate::config::LogLevel::Warn => "warn",
        crate::config::LogLevel::Error => "error",
    };

    if let Ok(env_filter) = std::env::var("RUST_LOG") {
        EnvFilter::try_new(env_filter).unwrap_or_else(|_| EnvFilter::new(base_level))
    } else if let Some(filter) = &config.filter {
        let combined = format!("{base_level},{filter}");
        EnvFilter::try_new(combined).unwrap_or_else(|_| EnvFilter::new(base_level))
    } else {
        EnvFilter::new(format!(
            "{base_level},hyper=warn,h2=warn,tower=info,reqwest=warn"
        ))
    }
}

/// Guard that flushes and shuts down the OpenTelemetry provider on drop.
pub struct TracingGuard {
    #[cfg(feature = "otlp")]
    provider: Option<SdkTracerProvider>,
    #[cfg(not(feature = "otlp"))]
    #[allow(dead_code)]
    provider: Option<SdkTracerProviderStub>,
}

impl Drop for TracingGuard {
    fn drop(&mut self) {
        #[cfg(feature = "otlp")]
        if let Some(provider) = &self.provider
            && let Err(e) = provider.shutdown()
        {
            eprintln!("error shutting down OpenTelemetry tracer provider: {e:?}");
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TracingError {
    #[error("failed to initialize tracing: {0}")]
    Init(String),
}
