//! REST handlers for the matching core's thin ingress layer. Every handler
//! returns `AppResult<impl IntoResponse>`; error mapping happens once, in
//! [`crate::error::AppError`]'s `IntoResponse` impl.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::ledger::contract::STROOP_SCALE;
use crate::models::order::{CancelOrderRequest, CreateOrderRequest, OrderResponse, OrderStatus};
use crate::models::trade::Trade;

use super::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: i64,
}

pub async fn health(State(_state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        timestamp: chrono::Utc::now().timestamp(),
    })
}

/// Response shape for order submission: the order's resulting state plus
/// whatever trades it produced, each carrying its own settlement outcome.
#[derive(Debug, Serialize)]
pub struct SubmitOrderResponse {
    pub order_id: String,
    pub status: OrderStatus,
    pub order: OrderResponse,
    pub trades: Vec<Trade>,
}

pub async fn submit_order(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateOrderRequest>,
) -> AppResult<impl IntoResponse> {
    let outcome = state.engine.submit(req).await?;
    Ok(Json(SubmitOrderResponse {
        order_id: outcome.order.order_id.clone(),
        status: outcome.order.status,
        order: outcome.order,
        trades: outcome.trades,
    }))
}

#[derive(Debug, Deserialize)]
pub struct GetOrderQuery {
    #[allow(dead_code)]
    pub asset_pair: Option<String>,
}

pub async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<String>,
    Query(_query): Query<GetOrderQuery>,
) -> AppResult<impl IntoResponse> {
    state
        .engine
        .get_order(&order_id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(order_id))
}

pub async fn cancel_order(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<String>,
    Json(mut req): Json<CancelOrderRequest>,
) -> AppResult<impl IntoResponse> {
    req.order_id = order_id;
    let outcome = state.engine.cancel(req).await?;
    Ok(Json(serde_json::json!({
        "order_id": outcome.order_id,
        "status": outcome.status,
    })))
}

#[derive(Debug, Deserialize)]
pub struct OrderBookQuery {
    pub depth: Option<usize>,
}

pub async fn get_orderbook(
    State(state): State<Arc<AppState>>,
    Path((base, quote)): Path<(String, String)>,
    Query(query): Query<OrderBookQuery>,
) -> AppResult<impl IntoResponse> {
    let pair = state.engine.pair();
    if !pair.base.eq_ignore_ascii_case(&base) || !pair.quote.eq_ignore_ascii_case(&quote) {
        return Err(AppError::PairNotSupported(format!("{base}/{quote}")));
    }
    let depth = query.depth.unwrap_or(state.config.orderbook_snapshot_depth);
    Ok(Json(state.engine.snapshot(depth)))
}

#[derive(Debug, Deserialize)]
pub struct BalanceQuery {
    pub user_address: String,
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub balance_raw: i128,
    pub balance: Decimal,
}

pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BalanceQuery>,
) -> AppResult<impl IntoResponse> {
    let balance = state.engine.balance(&query.user_address, &query.token).await?;
    let balance_raw = (balance * Decimal::from(STROOP_SCALE))
        .round()
        .to_i128()
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("balance does not fit in i128 stroops")))?;
    Ok(Json(BalanceResponse {
        balance_raw,
        balance,
    }))
}

pub async fn clear_cache(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.engine.clear_cache();
    Json(serde_json::json!({ "cleared": true }))
}

pub async fn stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.engine.stats())
}
