//! Route table: wires handlers to paths and layers the order-submission
//! endpoint with its own, stricter rate limiter.

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;

use super::handlers;
use super::state::AppState;
use crate::auth::rate_limit::rate_limit_by_header;

pub fn build(state: Arc<AppState>) -> Router {
    let rate_limiter = state.rate_limiter.clone();

    let order_routes = Router::new()
        .route("/api/v1/orders", post(handlers::submit_order))
        .layer(middleware::from_fn_with_state(
            rate_limiter,
            rate_limit_by_header,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .merge(order_routes)
        .route(
            "/api/v1/orders/:order_id",
            get(handlers::get_order).delete(handlers::cancel_order),
        )
        .route("/api/v1/orderbook/:base/:quote", get(handlers::get_orderbook))
        .route("/api/v1/balances", get(handlers::get_balance))
        .route("/api/v1/admin/clear_cache", post(handlers::clear_cache))
        .route("/api/v1/stats", get(handlers::stats))
        .with_state(state)
}
