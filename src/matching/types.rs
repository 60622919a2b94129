//! Shared matching-engine types: the book's internal price key, the
//! resting-order representation, and the policy knobs that shape matching.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::models::order::{OrderSide, OrderType, TimeInForce};

/// Integer price key used for `BTreeMap` ordering and equality. Scaled by
/// the same 10^7 factor the settlement driver uses for on-chain stroop
/// amounts, so a price level and its on-chain counterpart never drift
/// apart from independent rounding choices.
pub const PRICE_SCALE: i64 = 10_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PriceLevel(i128);

impl PriceLevel {
    pub fn from_decimal(price: Decimal) -> Self {
        let scaled = (price * Decimal::from(PRICE_SCALE)).round();
        let value = scaled.mantissa() / 10i128.pow(scaled.scale());
        PriceLevel(value)
    }

    pub fn to_decimal(self) -> Decimal {
        Decimal::from_i128_with_scale(self.0, 0) / Decimal::from(PRICE_SCALE)
    }
}

impl Ord for PriceLevel {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for PriceLevel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Self-trade prevention strategy (spec's Open Question resolution):
/// `skip-match` leaves both orders intact and tries the next maker;
/// `cancel-newer` cancels whichever of the two orders has the higher
/// sequence number instead of skipping it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SelfTradePolicy {
    #[default]
    SkipMatch,
    CancelNewer,
}

/// An order resting in (or being matched into) the book. Distinct from
/// [`crate::models::order::Order`]: the book only needs the fields that
/// drive matching, keyed by the engine-assigned `sequence`, never the
/// signature or the original wire form.
#[derive(Debug, Clone)]
pub struct OrderEntry {
    pub order_id: String,
    pub account: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    /// Resting price. For a Market order this is only meaningful while it
    /// is being matched against the book; it is never inserted as a
    /// resting price level.
    pub price: Decimal,
    pub quantity: Decimal,
    pub remaining: Decimal,
    pub timestamp: i64,
    pub sequence: u64,
}

impl OrderEntry {
    pub fn is_filled(&self) -> bool {
        self.remaining <= Decimal::ZERO
    }
}

/// Final disposition of an order after one pass through `add`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResidualStatus {
    /// Residual quantity now rests in the book (GTC limit order only).
    Resting,
    /// No residual — fully matched.
    Filled,
    /// Residual quantity was dropped without resting (IOC, or a Market
    /// order that could not be fully filled).
    Dropped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BookError {
    #[error("order not found")]
    NotFound,
    #[error("order belongs to a different account")]
    NotOwner,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn price_level_round_trips_through_the_stroop_scale() {
        let price = dec!(1.5000000);
        let level = PriceLevel::from_decimal(price);
        assert_eq!(level.to_decimal(), price);
    }

    #[test]
    fn price_levels_order_numerically() {
        let low = PriceLevel::from_decimal(dec!(1.00));
        let high = PriceLevel::from_decimal(dec!(2.00));
        assert!(low < high);
    }
}
