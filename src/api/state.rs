//! Shared application state injected into every handler.

use std::sync::Arc;

use crate::auth::rate_limit::RateLimiterState;
use crate::config::AppConfig;
use crate::matching::MatchingEngine;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub engine: Arc<MatchingEngine>,
    pub rate_limiter: RateLimiterState,
}
