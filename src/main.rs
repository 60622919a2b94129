//! Process entry point: load configuration, resolve the traded pair against
//! the settlement contract, wire the matching engine to its vault cache and
//! settlement driver, and serve the REST ingress.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::routing::get;
use axum::Router;
use ed25519_dalek::SigningKey;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod auth;
mod config;
mod error;
mod ledger;
mod matching;
mod metrics;
mod models;

use crate::api::state::AppState;
use crate::auth::rate_limit::RateLimiterState;
use crate::config::AppConfig;
use crate::ledger::client::HttpLedgerClient;
use crate::ledger::contract::ContractClient;
use crate::matching::vault_cache::VaultCache;
use crate::matching::MatchingEngine;
use crate::models::pair::{AssetPair, ResolvedPair};

fn parse_signing_key(hex_seed: &str) -> anyhow::Result<SigningKey> {
    let bytes = hex::decode(hex_seed.trim()).context("signing key is not valid hex")?;
    let seed: [u8; 32] = bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("signing key must decode to exactly 32 bytes"))?;
    Ok(SigningKey::from_bytes(&seed))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dark_pool_core=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::load().context("failed to load configuration")?;
    tracing::info!(
        contract = %config.settlement_contract_id,
        rpc = %config.soroban_rpc_url,
        "starting dark-pool-core matching service"
    );

    let prometheus_handle = metrics::init_metrics();

    let signing_key = parse_signing_key(&config.matching_engine_signing_key)
        .context("invalid MATCHING_ENGINE_SIGNING_KEY")?;

    let ledger: Arc<dyn ledger::LedgerClient> = Arc::new(HttpLedgerClient::new(
        config.soroban_rpc_url.clone(),
        config.settlement_contract_id.clone(),
        config.admission_rpc_timeout(),
    ));

    let pair_config = ledger
        .get_pair_config()
        .await
        .context("failed to read trading-pair configuration from the settlement contract")?;
    let resolved_pair = ResolvedPair {
        symbolic: AssetPair::new(pair_config.base_symbol.clone(), pair_config.quote_symbol.clone()),
        base_address: pair_config.base_address,
        quote_address: pair_config.quote_address,
    };
    tracing::info!(pair = %resolved_pair.symbolic, "resolved trading pair from contract configuration");

    let vault = Arc::new(VaultCache::new(ledger.clone(), config.balance_cache_ttl()));
    let contract = Arc::new(ContractClient::new(
        ledger,
        signing_key,
        config.settlement_timeout(),
    ));

    let engine = Arc::new(MatchingEngine::new(
        resolved_pair,
        vault,
        contract,
        config.self_trade_policy,
    ));

    let state = Arc::new(AppState {
        config: Arc::new(config.clone()),
        engine,
        rate_limiter: RateLimiterState::order_submission(),
    });

    let metrics_route = Router::new().route(
        "/metrics",
        get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );

    let app = api::build(state)
        .merge(metrics_route)
        .layer(axum::middleware::from_fn(
            crate::api::middleware::metrics_middleware,
        ))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.rest_port));
    tracing::info!(%addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Waits for SIGINT or (on unix) SIGTERM so in-flight requests drain before
/// the process exits, rather than dropping open connections mid-settlement.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received, draining in-flight requests");
}
