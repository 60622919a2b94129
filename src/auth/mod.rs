pub mod canonical;
pub mod rate_limit;
pub mod signature;

use crate::error::AppError;
use crate::models::order::{CancelOrderRequest, CreateOrderRequest};

/// Verifies a signed order submission end to end: canonicalise, frame,
/// hash, verify against the claimed account. Returns `AuthFailure` on any
/// decode or curve failure — the caller never distinguishes address vs.
/// signature errors past the HTTP boundary (spec's `BadAddress`,
/// `BadSignature` and `MalformedOrder` all surface as 401).
pub fn verify_order(req: &CreateOrderRequest) -> Result<(), AppError> {
    let digest = canonical::order_digest(req);
    signature::verify(&req.account, &digest, &req.signature)
        .map_err(|e| AppError::AuthFailure(e.to_string()))
}

pub fn verify_cancel(req: &CancelOrderRequest) -> Result<(), AppError> {
    let digest = canonical::cancel_digest(req);
    signature::verify(&req.account, &digest, &req.signature)
        .map_err(|e| AppError::AuthFailure(e.to_string()))
}
