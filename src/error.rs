//! Unified application error type.
//!
//! One enum carries every error kind the engine can surface to a client;
//! `IntoResponse` maps each variant to its HTTP status exactly once, here,
//! so handlers never choose a status code themselves and library errors
//! never leak past the boundary as a raw 500.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    ClientInput(String),

    #[error("{0}")]
    AuthFailure(String),

    #[error("order id already known: {0}")]
    DuplicateOrderId(String),

    #[error("pair not supported: {0}")]
    PairNotSupported(String),

    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("FOK order could not be fully filled")]
    FOKUnfillable,

    #[error("settlement failed: {0}")]
    SettlementFailed(String),

    #[error("order not found: {0}")]
    NotFound(String),

    #[error("not the order owner")]
    NotOwner,

    #[error("upstream ledger unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: String,
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::ClientInput(_) => StatusCode::BAD_REQUEST,
            AppError::AuthFailure(_) => StatusCode::UNAUTHORIZED,
            AppError::DuplicateOrderId(_) => StatusCode::CONFLICT,
            AppError::PairNotSupported(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::InsufficientFunds(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::FOKUnfillable => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::SettlementFailed(_) => StatusCode::BAD_GATEWAY,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::NotOwner => StatusCode::UNAUTHORIZED,
            AppError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if matches!(self, AppError::Internal(_)) {
            tracing::error!(error = %self, "internal error");
        }
        let status = self.status();
        let detail = match &self {
            AppError::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        };
        (status, Json(ErrorBody { detail })).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
