//! HTTP Metrics Middleware
//!
//! Automatically records Prometheus metrics for all HTTP requests:
//! - Request count by method, endpoint, and status
//! - Request duration histogram
//! - In-flight request gauge

use axum::{
    body::Body,
    extract::MatchedPath,
    http::Request,
    middleware::Next,
    response::Response,
};
use std::time::Instant;

use crate::metrics;

/// Middleware to record HTTP metrics for each request
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();

    // Extract method and path before consuming the request
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    // Track in-flight requests
    metrics::inc_http_requests_in_flight();

    // Process the request
    let response = next.run(request).await;

    // Record metrics after response
    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16();

    metrics::record_http_request(&method, &path, status, duration);
    metrics::dec_http_requests_in_flight();

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use axum::Router;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tower::ServiceExt;

    #[tokio::test]
    async fn records_request_count_and_in_flight_gauge() {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .expect("install test recorder");

        let app = Router::new()
            .route("/ping", get(|| async { "pong" }))
            .layer(axum::middleware::from_fn(metrics_middleware));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/ping")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .expect("request through middleware");

        assert_eq!(response.status(), axum::http::StatusCode::OK);

        let rendered = handle.render();
        assert!(
            rendered.contains("http_requests_total"),
            "expected a recorded request counter, got:\n{rendered}"
        );
        assert!(
            rendered.contains("http_requests_in_flight"),
            "expected the in-flight gauge to have been touched, got:\n{rendered}"
        );
    }
}
