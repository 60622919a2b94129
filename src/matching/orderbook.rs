//! Price-time priority order book (C2): one instance per asset pair.
//!
//! Bids are keyed by price descending, asks by price ascending; each price
//! level is a FIFO queue ordered by engine-assigned `sequence`, never by
//! client-supplied `timestamp` — an adversarial client cannot buy queue
//! position by lying about its clock.

use std::collections::{BTreeMap, VecDeque};

use dashmap::DashMap;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::models::order::{Order, OrderSide, OrderStatus, OrderType, TimeInForce};
use crate::models::pair::AssetPair;
use crate::models::trade::Trade;

use super::types::{BookError, OrderEntry, PriceLevel, ResidualStatus, SelfTradePolicy};

pub struct OrderBook {
    pair: AssetPair,
    bids: RwLock<BTreeMap<PriceLevel, VecDeque<OrderEntry>>>,
    asks: RwLock<BTreeMap<PriceLevel, VecDeque<OrderEntry>>>,
    /// `order_id -> (side, price_level)` for O(log N) cancellation without
    /// scanning every level.
    index: DashMap<String, (OrderSide, PriceLevel)>,
}

/// Outcome of matching one incoming order against the book.
pub struct MatchOutcome {
    pub trades: Vec<Trade>,
    pub residual: ResidualStatus,
    pub filled_quantity: Decimal,
    /// Set under `SelfTradePolicy::CancelNewer` when a self-trade was
    /// encountered: the incoming order is always the "newer" side in this
    /// synchronous engine (its maker counterpart was already resting), so
    /// cancelling the newer order means halting the incoming order right
    /// there — trades produced against other makers earlier in the pass
    /// stand, but nothing past the collision is attempted and the residual
    /// never rests.
    pub self_trade_cancelled: bool,
}

impl OrderBook {
    pub fn new(pair: AssetPair) -> Self {
        Self {
            pair,
            bids: RwLock::new(BTreeMap::new()),
            asks: RwLock::new(BTreeMap::new()),
            index: DashMap::new(),
        }
    }

    pub fn pair(&self) -> &AssetPair {
        &self.pair
    }

    pub fn order_count(&self) -> usize {
        self.index.len()
    }

    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.read().keys().next_back().map(|p| p.to_decimal())
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.read().keys().next().map(|p| p.to_decimal())
    }

    pub fn has_order(&self, order_id: &str) -> bool {
        self.index.contains_key(order_id)
    }

    /// Pre-scans the opposite side to compute the quantity achievable for
    /// an incoming order without mutating any state — used for FOK's
    /// all-or-nothing admission check. Honours the same price limit and
    /// self-trade skip a real match pass would apply.
    pub fn achievable_quantity(
        &self,
        side: OrderSide,
        account: &str,
        price_limit: Option<Decimal>,
        quantity: Decimal,
        self_trade_policy: SelfTradePolicy,
    ) -> Decimal {
        let mut remaining = quantity;
        let mut achievable = Decimal::ZERO;

        macro_rules! scan {
            ($book:expr, $crosses:expr) => {
                let book = $book.read();
                'levels: for (level, queue) in book.iter() {
                    if remaining <= Decimal::ZERO {
                        break;
                    }
                    let level_price = level.to_decimal();
                    if !$crosses(level_price) {
                        break 'levels;
                    }
                    for maker in queue.iter() {
                        if remaining <= Decimal::ZERO {
                            break;
                        }
                        if self_trade_policy == SelfTradePolicy::SkipMatch && maker.account == account {
                            continue;
                        }
                        let take = remaining.min(maker.remaining);
                        achievable += take;
                        remaining -= take;
                    }
                }
            };
        }

        match side {
            OrderSide::Buy => {
                scan!(self.asks, |p: Decimal| price_limit.map_or(true, |l| p <= l));
            }
            OrderSide::Sell => {
                scan!(self.bids, |p: Decimal| price_limit.map_or(true, |l| p >= l));
            }
        }

        achievable
    }

    /// Matches `incoming` against the book, mutating maker orders and
    /// removing exhausted levels as it goes, then applies time-in-force
    /// disposition to any residual quantity. `incoming.sequence` must
    /// already be assigned by the caller.
    pub fn add(
        &self,
        incoming: &Order,
        mut trade_id_factory: impl FnMut() -> String,
        now: i64,
        self_trade_policy: SelfTradePolicy,
    ) -> MatchOutcome {
        let price_limit = incoming.price;
        let mut remaining = incoming.quantity;
        let mut trades = Vec::new();
        let mut self_trade_cancelled = false;

        match incoming.side {
            OrderSide::Buy => {
                self.match_against(
                    &self.asks,
                    incoming,
                    &mut remaining,
                    price_limit,
                    |level_price, limit| limit.map_or(true, |l| level_price <= l),
                    self_trade_policy,
                    &mut trades,
                    &mut trade_id_factory,
                    now,
                    &mut self_trade_cancelled,
                );
            }
            OrderSide::Sell => {
                self.match_against(
                    &self.bids,
                    incoming,
                    &mut remaining,
                    price_limit,
                    |level_price, limit| limit.map_or(true, |l| level_price >= l),
                    self_trade_policy,
                    &mut trades,
                    &mut trade_id_factory,
                    now,
                    &mut self_trade_cancelled,
                );
            }
        }

        let filled_quantity = incoming.quantity - remaining;

        let residual = if self_trade_cancelled {
            ResidualStatus::Dropped
        } else if remaining <= Decimal::ZERO {
            ResidualStatus::Filled
        } else {
            match (incoming.order_type, incoming.time_in_force) {
                (OrderType::Limit, TimeInForce::Gtc) => {
                    self.rest(incoming, remaining);
                    ResidualStatus::Resting
                }
                _ => ResidualStatus::Dropped,
            }
        };

        MatchOutcome {
            trades,
            residual,
            filled_quantity,
            self_trade_cancelled,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn match_against(
        &self,
        opposite: &RwLock<BTreeMap<PriceLevel, VecDeque<OrderEntry>>>,
        incoming: &Order,
        remaining: &mut Decimal,
        price_limit: Option<Decimal>,
        crosses: impl Fn(Decimal, Option<Decimal>) -> bool,
        self_trade_policy: SelfTradePolicy,
        trades: &mut Vec<Trade>,
        trade_id_factory: &mut impl FnMut() -> String,
        now: i64,
        self_trade_cancelled: &mut bool,
    ) {
        let mut book = opposite.write();
        let levels: Vec<PriceLevel> = book.keys().copied().collect();

        'levels: for level in levels {
            if *remaining <= Decimal::ZERO || *self_trade_cancelled {
                break;
            }
            if !crosses(level.to_decimal(), price_limit) {
                break 'levels;
            }

            let mut exhausted_level = false;
            if let Some(queue) = book.get_mut(&level) {
                let mut skipped_ids = Vec::new();
                loop {
                    if *remaining <= Decimal::ZERO || *self_trade_cancelled {
                        break;
                    }
                    let pos = queue
                        .iter()
                        .position(|maker| !skipped_ids.contains(&maker.order_id));
                    let Some(pos) = pos else { break };
                    let maker = &mut queue[pos];

                    if maker.account == incoming.account {
                        if self_trade_policy == SelfTradePolicy::SkipMatch {
                            skipped_ids.push(maker.order_id.clone());
                            continue;
                        } else {
                            // `cancel-newer`: the incoming order is always the
                            // newer side here (its counterpart is already
                            // resting), so halt it immediately. Trades already
                            // produced against other makers earlier in this
                            // pass stand.
                            *self_trade_cancelled = true;
                            break;
                        }
                    }

                    let trade_qty = (*remaining).min(maker.remaining);
                    let trade_price = maker.price;

                    let (buy_order_id, sell_order_id, buy_account, sell_account) =
                        match incoming.side {
                            OrderSide::Buy => (
                                incoming.order_id.clone(),
                                maker.order_id.clone(),
                                incoming.account.clone(),
                                maker.account.clone(),
                            ),
                            OrderSide::Sell => (
                                maker.order_id.clone(),
                                incoming.order_id.clone(),
                                maker.account.clone(),
                                incoming.account.clone(),
                            ),
                        };

                    trades.push(Trade::new(
                        trade_id_factory(),
                        buy_order_id,
                        sell_order_id,
                        buy_account,
                        sell_account,
                        self.pair.clone(),
                        trade_price,
                        trade_qty,
                        now,
                    ));

                    maker.remaining -= trade_qty;
                    *remaining -= trade_qty;

                    if maker.is_filled() {
                        let maker_id = maker.order_id.clone();
                        queue.remove(pos);
                        self.index.remove(&maker_id);
                    }
                }
                exhausted_level = queue.is_empty();
            }
            if exhausted_level {
                book.remove(&level);
            }
        }
    }

    /// Inserts a GTC limit order's residual at the tail of its price level.
    /// Exposed for the engine's post-compensation re-resting path; the
    /// normal match path calls it internally from `add`.
    pub fn rest(&self, incoming: &Order, remaining: Decimal) {
        let price = incoming
            .price
            .expect("GTC limit residual always carries a price");
        let level = PriceLevel::from_decimal(price);
        let entry = OrderEntry {
            order_id: incoming.order_id.clone(),
            account: incoming.account.clone(),
            side: incoming.side,
            order_type: incoming.order_type,
            time_in_force: incoming.time_in_force,
            price,
            quantity: incoming.quantity,
            remaining,
            timestamp: incoming.timestamp,
            sequence: incoming.sequence,
        };

        match incoming.side {
            OrderSide::Buy => {
                self.bids
                    .write()
                    .entry(level)
                    .or_insert_with(VecDeque::new)
                    .push_back(entry);
            }
            OrderSide::Sell => {
                self.asks
                    .write()
                    .entry(level)
                    .or_insert_with(VecDeque::new)
                    .push_back(entry);
            }
        }
        self.index.insert(incoming.order_id.clone(), (incoming.side, level));
    }

    /// Re-inserts an order at the *tail* of its price level after a
    /// settlement failure forces compensation — the order keeps its price
    /// but loses time priority, per the engine's compensation contract.
    pub fn rest_at_tail(&self, entry: OrderEntry) {
        let level = PriceLevel::from_decimal(entry.price);
        let side = entry.side;
        let order_id = entry.order_id.clone();
        match side {
            OrderSide::Buy => {
                self.bids
                    .write()
                    .entry(level)
                    .or_insert_with(VecDeque::new)
                    .push_back(entry);
            }
            OrderSide::Sell => {
                self.asks
                    .write()
                    .entry(level)
                    .or_insert_with(VecDeque::new)
                    .push_back(entry);
            }
        }
        self.index.insert(order_id, (side, level));
    }

    pub fn cancel(&self, order_id: &str, account: &str) -> Result<OrderEntry, BookError> {
        let Some(entry) = self.index.get(order_id) else {
            return Err(BookError::NotFound);
        };
        let (side, level) = *entry;
        drop(entry);

        let book = match side {
            OrderSide::Buy => &self.bids,
            OrderSide::Sell => &self.asks,
        };
        let mut guard = book.write();
        let Some(queue) = guard.get_mut(&level) else {
            return Err(BookError::NotFound);
        };
        let Some(pos) = queue.iter().position(|o| o.order_id == order_id) else {
            return Err(BookError::NotFound);
        };
        if queue[pos].account != account {
            return Err(BookError::NotOwner);
        }
        let removed = queue.remove(pos).expect("position was just found");
        if queue.is_empty() {
            guard.remove(&level);
        }
        drop(guard);
        self.index.remove(order_id);
        Ok(removed)
    }

    pub fn snapshot(&self, depth: usize) -> OrderBookSnapshot {
        let bids = self.bids.read();
        let asks = self.asks.read();

        let levels = |book: &BTreeMap<PriceLevel, VecDeque<OrderEntry>>,
                      iter_rev: bool|
         -> Vec<PriceLevelView> {
            let take_levels: Box<dyn Iterator<Item = (&PriceLevel, &VecDeque<OrderEntry>)>> =
                if iter_rev {
                    Box::new(book.iter().rev())
                } else {
                    Box::new(book.iter())
                };
            take_levels
                .take(depth)
                .map(|(level, queue)| PriceLevelView {
                    price: level.to_decimal(),
                    quantity: queue.iter().map(|o| o.remaining).sum(),
                    count: queue.len(),
                })
                .collect()
        };

        OrderBookSnapshot {
            pair: self.pair.clone(),
            bids: levels(&bids, true),
            asks: levels(&asks, false),
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PriceLevelView {
    pub price: Decimal,
    pub quantity: Decimal,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderBookSnapshot {
    pub pair: AssetPair,
    pub bids: Vec<PriceLevelView>,
    pub asks: Vec<PriceLevelView>,
    pub timestamp: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::types::SelfTradePolicy;
    use rust_decimal_macros::dec;

    fn book() -> OrderBook {
        OrderBook::new(AssetPair::new("XLM", "USDC"))
    }

    fn limit_order(
        id: &str,
        account: &str,
        side: OrderSide,
        price: Decimal,
        qty: Decimal,
        tif: TimeInForce,
        sequence: u64,
    ) -> Order {
        Order {
            order_id: id.to_string(),
            account: account.to_string(),
            pair: AssetPair::new("XLM", "USDC"),
            side,
            order_type: OrderType::Limit,
            price: Some(price),
            quantity: qty,
            filled_quantity: Decimal::ZERO,
            time_in_force: tif,
            timestamp: 0,
            sequence,
            status: OrderStatus::Pending,
            signature: String::new(),
        }
    }

    fn ids() -> impl FnMut() -> String {
        let mut n = 0u64;
        move || {
            n += 1;
            format!("trade-{n}")
        }
    }

    #[test]
    fn resting_gtc_order_appears_in_snapshot_and_index() {
        let book = book();
        let order = limit_order("o1", "GA", OrderSide::Buy, dec!(1.00), dec!(10), TimeInForce::Gtc, 1);
        let outcome = book.add(&order, ids(), 0, SelfTradePolicy::SkipMatch);
        assert_eq!(outcome.residual, ResidualStatus::Resting);
        assert!(book.has_order("o1"));
        assert_eq!(book.best_bid(), Some(dec!(1.00)));
    }

    #[test]
    fn crossing_orders_match_at_maker_price_in_time_priority() {
        let book = book();
        let ask1 = limit_order("a1", "GA", OrderSide::Sell, dec!(1.00), dec!(4), TimeInForce::Gtc, 1);
        let ask2 = limit_order("a2", "GA", OrderSide::Sell, dec!(1.01), dec!(4), TimeInForce::Gtc, 2);
        book.add(&ask1, ids(), 0, SelfTradePolicy::SkipMatch);
        book.add(&ask2, ids(), 0, SelfTradePolicy::SkipMatch);

        let buy = limit_order("b1", "GB", OrderSide::Buy, dec!(1.01), dec!(6), TimeInForce::Gtc, 3);
        let outcome = book.add(&buy, ids(), 0, SelfTradePolicy::SkipMatch);

        assert_eq!(outcome.trades.len(), 2);
        assert_eq!(outcome.trades[0].price, dec!(1.00));
        assert_eq!(outcome.trades[0].quantity, dec!(4));
        assert_eq!(outcome.trades[1].price, dec!(1.01));
        assert_eq!(outcome.trades[1].quantity, dec!(2));
        assert_eq!(outcome.residual, ResidualStatus::Resting);
        assert!(!book.has_order("a1"));
        assert!(book.has_order("b1"));
    }

    #[test]
    fn self_trade_is_skipped_leaving_both_orders_intact() {
        let book = book();
        let resting_buy = limit_order("b1", "GSAME", OrderSide::Buy, dec!(1.00), dec!(5), TimeInForce::Gtc, 1);
        book.add(&resting_buy, ids(), 0, SelfTradePolicy::SkipMatch);

        let incoming_sell =
            limit_order("s1", "GSAME", OrderSide::Sell, dec!(0.99), dec!(5), TimeInForce::Gtc, 2);
        let outcome = book.add(&incoming_sell, ids(), 0, SelfTradePolicy::SkipMatch);

        assert!(outcome.trades.is_empty());
        assert!(book.has_order("b1"));
        assert!(book.has_order("s1"));
    }

    #[test]
    fn cancel_newer_policy_halts_the_incoming_order_on_self_trade() {
        let book = book();
        let resting_ask = limit_order("a1", "GA", OrderSide::Sell, dec!(1.00), dec!(3), TimeInForce::Gtc, 1);
        book.add(&resting_ask, ids(), 0, SelfTradePolicy::CancelNewer);
        let self_ask = limit_order("a2", "GSAME", OrderSide::Sell, dec!(1.00), dec!(3), TimeInForce::Gtc, 2);
        book.add(&self_ask, ids(), 0, SelfTradePolicy::CancelNewer);

        let incoming_buy =
            limit_order("b1", "GSAME", OrderSide::Buy, dec!(1.00), dec!(10), TimeInForce::Gtc, 3);
        let outcome = book.add(&incoming_buy, ids(), 0, SelfTradePolicy::CancelNewer);

        // The cross against the non-self maker a1 stands; the self-trade
        // against a2 halts the incoming order before it can rest residual.
        assert_eq!(outcome.trades.len(), 1);
        assert_eq!(outcome.trades[0].quantity, dec!(3));
        assert!(outcome.self_trade_cancelled);
        assert_eq!(outcome.residual, ResidualStatus::Dropped);
        assert!(!book.has_order("b1"));
        assert!(book.has_order("a2"));
    }

    #[test]
    fn ioc_residual_never_rests() {
        let book = book();
        let ask = limit_order("a1", "GA", OrderSide::Sell, dec!(1.00), dec!(4), TimeInForce::Gtc, 1);
        book.add(&ask, ids(), 0, SelfTradePolicy::SkipMatch);

        let buy = limit_order("b1", "GB", OrderSide::Buy, dec!(1.00), dec!(10), TimeInForce::Ioc, 2);
        let outcome = book.add(&buy, ids(), 0, SelfTradePolicy::SkipMatch);

        assert_eq!(outcome.trades.len(), 1);
        assert_eq!(outcome.residual, ResidualStatus::Dropped);
        assert!(!book.has_order("b1"));
    }

    #[test]
    fn cancel_rejects_mismatched_owner() {
        let book = book();
        let order = limit_order("o1", "GA", OrderSide::Buy, dec!(1.00), dec!(10), TimeInForce::Gtc, 1);
        book.add(&order, ids(), 0, SelfTradePolicy::SkipMatch);

        assert_eq!(book.cancel("o1", "GB"), Err(BookError::NotOwner));
        assert!(book.cancel("o1", "GA").is_ok());
    }

    #[test]
    fn achievable_quantity_matches_a_real_match_pass() {
        let book = book();
        let ask = limit_order("a1", "GA", OrderSide::Sell, dec!(1.00), dec!(4), TimeInForce::Gtc, 1);
        book.add(&ask, ids(), 0, SelfTradePolicy::SkipMatch);

        let achievable = book.achievable_quantity(
            OrderSide::Buy,
            "GB",
            Some(dec!(1.00)),
            dec!(10),
            SelfTradePolicy::SkipMatch,
        );
        assert_eq!(achievable, dec!(4));
    }
}
