//! Prometheus metrics.
//!
//! Request/response plumbing (count, duration, in-flight) plus the
//! matching-core counters the engine itself emits: orders submitted and
//! rejected, trades executed, settlement latency and outcome, vault-cache
//! hit rate.

#![allow(dead_code)]

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

pub mod names {
    pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "http_requests_in_flight";

    pub const ORDERS_SUBMITTED_TOTAL: &str = "orders_submitted_total";
    pub const ORDERS_REJECTED_TOTAL: &str = "orders_rejected_total";
    pub const ORDERS_CANCELLED_TOTAL: &str = "orders_cancelled_total";
    pub const TRADES_EXECUTED_TOTAL: &str = "trades_executed_total";
    pub const ORDER_MATCH_DURATION_SECONDS: &str = "order_match_duration_seconds";

    pub const SETTLEMENTS_TOTAL: &str = "settlements_total";
    pub const SETTLEMENT_FAILURES_TOTAL: &str = "settlement_failures_total";
    pub const SETTLEMENT_DURATION_SECONDS: &str = "settlement_duration_seconds";

    pub const VAULT_CACHE_HITS_TOTAL: &str = "vault_cache_hits_total";
    pub const VAULT_CACHE_MISSES_TOTAL: &str = "vault_cache_misses_total";
}

pub mod labels {
    pub const METHOD: &str = "method";
    pub const ENDPOINT: &str = "endpoint";
    pub const STATUS: &str = "status";
    pub const SIDE: &str = "side";
    pub const ORDER_TYPE: &str = "order_type";
    pub const REASON: &str = "reason";
}

/// Installs the process-wide Prometheus recorder. Called once from `main`.
pub fn init_metrics() -> PrometheusHandle {
    let builder = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(names::HTTP_REQUEST_DURATION_SECONDS.to_string()),
            &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
        )
        .unwrap()
        .set_buckets_for_metric(
            Matcher::Full(names::ORDER_MATCH_DURATION_SECONDS.to_string()),
            &[0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.5],
        )
        .unwrap()
        .set_buckets_for_metric(
            Matcher::Full(names::SETTLEMENT_DURATION_SECONDS.to_string()),
            &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0],
        )
        .unwrap();

    builder
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

// HTTP -----------------------------------------------------------------

pub fn record_http_request(method: &str, endpoint: &str, status: u16, duration_secs: f64) {
    let status_str = status.to_string();
    counter!(
        names::HTTP_REQUESTS_TOTAL,
        labels::METHOD => method.to_string(),
        labels::ENDPOINT => endpoint.to_string(),
        labels::STATUS => status_str.clone()
    )
    .increment(1);

    histogram!(
        names::HTTP_REQUEST_DURATION_SECONDS,
        labels::METHOD => method.to_string(),
        labels::ENDPOINT => endpoint.to_string(),
        labels::STATUS => status_str
    )
    .record(duration_secs);
}

pub fn inc_http_requests_in_flight() {
    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);
}

pub fn dec_http_requests_in_flight() {
    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);
}

// Matching ---------------------------------------------------------------

pub fn record_order_submitted(side: &str, order_type: &str) {
    counter!(
        names::ORDERS_SUBMITTED_TOTAL,
        labels::SIDE => side.to_string(),
        labels::ORDER_TYPE => order_type.to_string()
    )
    .increment(1);
}

pub fn record_order_rejected(reason: &str) {
    counter!(names::ORDERS_REJECTED_TOTAL, labels::REASON => reason.to_string()).increment(1);
}

pub fn record_order_cancelled() {
    counter!(names::ORDERS_CANCELLED_TOTAL).increment(1);
}

pub fn record_trade_executed() {
    counter!(names::TRADES_EXECUTED_TOTAL).increment(1);
}

pub fn record_match_duration(duration_secs: f64) {
    histogram!(names::ORDER_MATCH_DURATION_SECONDS).record(duration_secs);
}

// Settlement ---------------------------------------------------------------

pub fn record_settlement(success: bool, duration_secs: f64) {
    counter!(names::SETTLEMENTS_TOTAL).increment(1);
    if !success {
        counter!(names::SETTLEMENT_FAILURES_TOTAL).increment(1);
    }
    histogram!(names::SETTLEMENT_DURATION_SECONDS).record(duration_secs);
}

// Vault cache ---------------------------------------------------------------

pub fn record_vault_cache_hit() {
    counter!(names::VAULT_CACHE_HITS_TOTAL).increment(1);
}

pub fn record_vault_cache_miss() {
    counter!(names::VAULT_CACHE_MISSES_TOTAL).increment(1);
}
