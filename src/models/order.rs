//! Order types.
//!
//! Two distinct shapes exist on purpose: [`CreateOrderRequest`] is the wire
//! form a client posts (optional fields as the client actually sent them),
//! and [`Order`] is the canonical, engine-owned record — sequence-assigned,
//! mutated only by the matching engine. Keeping them separate means the
//! canonicalisation routine in `auth::canonical` always projects from one
//! well-known shape instead of guessing at a loosely typed JSON blob.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::pair::AssetPair;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Limit,
    Market,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    Gtc,
    Ioc,
    Fok,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }
}

/// Wire form of a new order submission: exactly what the client signed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    pub order_id: String,
    pub account: String,
    pub pair: AssetPair,
    pub side: OrderSide,
    pub order_type: OrderType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    pub quantity: Decimal,
    pub time_in_force: TimeInForce,
    pub timestamp: i64,
    /// Base64-encoded 64-byte Ed25519 signature over the canonical digest.
    pub signature: String,
}

/// Signed cancellation envelope. `DELETE /api/v1/orders/{id}` requires this
/// in the request body so cancellation is authenticated the same way
/// submission is — an unsigned cancel would let anyone cancel anyone's
/// resting order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelOrderRequest {
    pub order_id: String,
    pub account: String,
    pub timestamp: i64,
    pub signature: String,
}

/// The engine's canonical, mutable record of an accepted order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub account: String,
    pub pair: AssetPair,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub price: Option<Decimal>,
    pub quantity: Decimal,
    pub filled_quantity: Decimal,
    pub time_in_force: TimeInForce,
    pub timestamp: i64,
    pub sequence: u64,
    pub status: OrderStatus,
    pub signature: String,
}

impl Order {
    pub fn from_request(req: CreateOrderRequest, sequence: u64) -> Self {
        Self {
            order_id: req.order_id,
            account: req.account,
            pair: req.pair,
            side: req.side,
            order_type: req.order_type,
            price: req.price,
            quantity: req.quantity,
            filled_quantity: Decimal::ZERO,
            time_in_force: req.time_in_force,
            timestamp: req.timestamp,
            sequence,
            status: OrderStatus::Pending,
            signature: req.signature,
        }
    }

    pub fn remaining(&self) -> Decimal {
        self.quantity - self.filled_quantity
    }

    pub fn is_resting_eligible(&self) -> bool {
        matches!(self.time_in_force, TimeInForce::Gtc) && matches!(self.order_type, OrderType::Limit)
    }
}

/// API view of an order, returned by `GET /api/v1/orders/{id}` and embedded
/// in the submission response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResponse {
    pub order_id: String,
    pub account: String,
    pub pair: AssetPair,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub price: Option<Decimal>,
    pub quantity: Decimal,
    pub filled_quantity: Decimal,
    pub remaining_quantity: Decimal,
    pub time_in_force: TimeInForce,
    pub status: OrderStatus,
    pub sequence: u64,
    pub timestamp: i64,
}

impl From<&Order> for OrderResponse {
    fn from(o: &Order) -> Self {
        Self {
            order_id: o.order_id.clone(),
            account: o.account.clone(),
            pair: o.pair.clone(),
            side: o.side,
            order_type: o.order_type,
            price: o.price,
            quantity: o.quantity,
            filled_quantity: o.filled_quantity,
            remaining_quantity: o.remaining(),
            time_in_force: o.time_in_force,
            status: o.status,
            sequence: o.sequence,
            timestamp: o.timestamp,
        }
    }
}
