//! Process entry point: loads configuration, wires up the credential pools,
//! session pool, transaction-token generator, cache manager and upstream
//! client, spawns their background workers, and serves a liveness/readiness/
//! metrics probe surface. The routed, cached API surface that calls
//! `UpstreamClient::graphql` per incoming request belongs to operators
//! building on top of this crate, not to this binary.

mod analytics;
mod cache;
mod cache_manager;
mod coalescer;
mod config;
mod credentials;
mod egress;
mod error;
mod observability;
mod search_index;
mod secrets;
mod session;
mod txn;
mod upstream;

use std::{sync::Arc, time::Duration};

use axum::{Json, Router, extract::State, routing::get};
use reqwest::Client;
use serde_json::json;

use crate::{
    analytics::AnalyticsSink,
    cache_manager::CacheManager,
    config::{AccountCredentialSpec, AccountsConfig, CacheGatewayConfig},
    credentials::{
        AccountPool, GuestMinter, GuestPool,
        guest::{
            DEFAULT_GENERATION_INTERVAL_SECS, DEFAULT_POOL_MIN_SIZE, DEFAULT_POOL_TARGET_SIZE,
            start_minter,
        },
    },
    egress::EgressSelector,
    observability::metrics,
    search_index::SearchIndex,
    session::SessionPool,
    txn::TxnGenerator,
    upstream::{DefaultGuestMinter, UpstreamClient},
};

struct AppState {
    guests: Arc<GuestPool>,
    accounts: Arc<AccountPool>,
    search_index: Arc<SearchIndex>,
    analytics: Arc<AnalyticsSink>,
}

#[tokio::main]
async fn main() {
    let config_path =
        std::env::var("CORVID_CONFIG").unwrap_or_else(|_| "corvid.toml".to_string());
    let config = if std::path::Path::new(&config_path).exists() {
        CacheGatewayConfig::from_file(&config_path).unwrap_or_else(|e| {
            eprintln!("failed to load config from {config_path}: {e}");
            std::process::exit(1);
        })
    } else {
        CacheGatewayConfig::from_str("").expect("default configuration must be valid")
    };

    let _tracing_guard =
        observability::init_tracing(&config.observability).expect("failed to initialize tracing");
    metrics::init_metrics(&config.observability.metrics).expect("failed to initialize metrics");

    tracing::info!(
        bind = %format!("{}:{}", config.server.host, config.server.port),
        "starting corvid cache gateway"
    );

    let l1 = cache::build_l1(&config.cache)
        .await
        .expect("failed to construct L1 cache backend");

    let search_index = Arc::new(
        SearchIndex::from_config(&config.search_index)
            .expect("failed to construct search index client"),
    );
    search_index.connect().await;

    let analytics = Arc::new(
        AnalyticsSink::new(&config.analytics).expect("failed to construct analytics sink"),
    );
    analytics.connect().await;
    let analytics_worker = analytics.start_worker();

    let cache_manager = Arc::new(CacheManager::new(
        l1,
        Arc::clone(&search_index),
        Arc::clone(&analytics),
        config.cache_ttl.clone(),
        config.search_index.hydration_coverage,
    ));
    // Held for the lifetime of the process; the routed request layer that
    // dispatches through it is out of scope for this binary.
    let _cache_manager = cache_manager;

    let egress = Arc::new(EgressSelector::from_config(&config.egress));
    let sessions = SessionPool::new(config.egress.session_pool_size);
    for identity in egress.identities() {
        let proxy = if identity == session::DIRECT {
            None
        } else {
            Some(identity)
        };
        sessions
            .prewarm(
                identity,
                proxy,
                config.egress.prewarm_count,
                &config.upstream.homepage_url,
            )
            .await;
    }

    let http_client = Client::builder()
        .connect_timeout(Duration::from_millis(config.upstream.connect_timeout_ms))
        .timeout(Duration::from_millis(config.upstream.read_timeout_ms))
        .build()
        .expect("failed to construct upstream HTTP client");

    let txn = TxnGenerator::new(http_client.clone(), config.upstream.homepage_url.clone());
    let txn_init = txn.spawn_background_init();

    let guest_minter: Arc<dyn GuestMinter> = Arc::new(DefaultGuestMinter::new(
        http_client.clone(),
        config.upstream.clone(),
        Arc::clone(&egress),
        Arc::clone(&txn),
    ));
    let guests = Arc::new(GuestPool::new(DEFAULT_POOL_MIN_SIZE, DEFAULT_POOL_TARGET_SIZE));
    let minter_handle = start_minter(
        Arc::clone(&guests),
        Arc::clone(&guest_minter),
        Duration::from_secs(DEFAULT_GENERATION_INTERVAL_SECS),
    );

    let accounts = Arc::new(AccountPool::new(
        load_accounts(&config.accounts).expect("failed to load account credentials"),
        config.accounts.rate_limit_cooldown_secs,
        config.accounts.forbidden_cooldown_secs,
    ));

    let upstream = Arc::new(UpstreamClient::new(
        config.upstream.clone(),
        sessions,
        Arc::clone(&txn),
        Arc::clone(&guests),
        Arc::clone(&guest_minter),
        Arc::clone(&accounts),
    ));
    // Held alive so its session pool stays warm; see module doc comment.
    let _upstream = upstream;

    let state = Arc::new(AppState {
        guests,
        accounts,
        search_index: Arc::clone(&search_index),
        analytics: Arc::clone(&analytics),
    });

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_handler))
        .with_state(state);

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind to {bind_addr}: {e}"));
    tracing::info!(address = %bind_addr, "probe server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    tracing::info!("shutdown signal received, draining background tasks");
    txn_init.abort();
    minter_handle.abort();
    analytics.shutdown();
    if tokio::time::timeout(Duration::from_secs(10), analytics_worker)
        .await
        .is_err()
    {
        tracing::warn!("timed out waiting for analytics sink to flush");
    }
    tracing::info!("shutdown complete");
}

/// Merges inline account credentials with any `accounts.file` JSON array.
fn load_accounts(
    config: &AccountsConfig,
) -> std::io::Result<Vec<crate::credentials::AccountCredential>> {
    let mut specs = config.accounts.clone();
    if let Some(path) = &config.file {
        let contents = std::fs::read_to_string(path)?;
        let mut from_file: Vec<AccountCredentialSpec> = serde_json::from_str(&contents)
            .unwrap_or_else(|e| panic!("invalid accounts file {}: {e}", path.display()));
        specs.append(&mut from_file);
    }
    Ok(specs.into_iter().map(Into::into).collect())
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn readyz(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let guest_stats = state.guests.stats();
    Json(json!({
        "status": "ready",
        "guest_pool": {
            "size": guest_stats.size,
            "avg_health": guest_stats.avg_health,
        },
        "account_pool": { "size": state.accounts.len() },
        "search_index": { "available": state.search_index.available() },
        "analytics": { "available": state.analytics.available() },
    }))
}

#[cfg(feature = "prometheus")]
async fn metrics_handler() -> String {
    metrics::get_prometheus_handle()
        .map(|h| h.render())
        .unwrap_or_default()
}

#[cfg(not(feature = "prometheus"))]
async fn metrics_handler() -> &'static str {
    "# metrics disabled; rebuild with --features prometheus\n"
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
