//! Trade record types.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::pair::AssetPair;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementStatus {
    Pending,
    Settled,
    Failed,
}

/// A single match produced by the order book. `trade_id` is engine-generated
/// (32 random bytes, hex-encoded) — it has no relationship to either
/// resting order's id and exists purely to key the settlement call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: String,
    pub buy_order_id: String,
    pub sell_order_id: String,
    pub buy_account: String,
    pub sell_account: String,
    pub pair: AssetPair,
    pub price: Decimal,
    pub quantity: Decimal,
    pub timestamp: i64,
    pub settlement_status: SettlementStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settlement_tx_id: Option<String>,
}

impl Trade {
    /// Panics if `buy_account == sell_account`; callers must have already
    /// applied self-trade prevention before constructing a `Trade`.
    pub fn new(
        trade_id: String,
        buy_order_id: String,
        sell_order_id: String,
        buy_account: String,
        sell_account: String,
        pair: AssetPair,
        price: Decimal,
        quantity: Decimal,
        timestamp: i64,
    ) -> Self {
        assert_ne!(buy_account, sell_account, "self-trade reached Trade::new");
        Self {
            trade_id,
            buy_order_id,
            sell_order_id,
            buy_account,
            sell_account,
            pair,
            price,
            quantity,
            timestamp,
            settlement_status: SettlementStatus::Pending,
            settlement_tx_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    #[should_panic(expected = "self-trade")]
    fn same_account_trade_is_rejected_at_construction() {
        Trade::new(
            "t1".into(),
            "buy-1".into(),
            "sell-1".into(),
            "GSAME".into(),
            "GSAME".into(),
            AssetPair::new("XLM", "USDC"),
            dec!(1.0),
            dec!(5),
            0,
        );
    }
}
