//! Matching Engine (C4): the single place that orchestrates admission,
//! routing to the book, and synchronous settlement. Everything that
//! mutates shared state — the book, the vault cache's reservations and
//! optimistic balance deltas — runs under one global `tokio::sync::Mutex`,
//! the deliberate simplification spec'd in §5: settlement RPC calls run
//! while the lock is held because the engine needs a consistent view
//! across admission and settlement, and matching/settlement latency
//! dominates over lock contention.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use rust_decimal::Decimal;
use tokio::sync::Mutex;

use crate::auth;
use crate::error::{AppError, AppResult};
use crate::ledger::contract::{ContractClient, SettlementInstruction, SettlementOutcome};
use crate::matching::orderbook::{OrderBook, OrderBookSnapshot};
use crate::matching::types::{OrderEntry, ResidualStatus, SelfTradePolicy};
use crate::matching::vault_cache::VaultCache;
use crate::models::order::{
    CancelOrderRequest, CreateOrderRequest, Order, OrderResponse, OrderSide, OrderStatus,
    OrderType, TimeInForce,
};
use crate::models::pair::{AssetPair, ResolvedPair};
use crate::models::trade::{SettlementStatus, Trade};

/// Builds the book's resting-entry shape from the engine's canonical order
/// record, at a caller-supplied `remaining` — never `order.remaining()`
/// directly, since during compensation the right value is the pre-trade
/// remaining, not whatever the record currently holds.
fn make_resting_entry(order: &Order, remaining: Decimal) -> OrderEntry {
    OrderEntry {
        order_id: order.order_id.clone(),
        account: order.account.clone(),
        side: order.side,
        order_type: order.order_type,
        time_in_force: order.time_in_force,
        price: order.price.expect("resting entry requires a price"),
        quantity: order.quantity,
        remaining,
        timestamp: order.timestamp,
        sequence: order.sequence,
    }
}

/// Snapshot of engine-wide counters, exposed at `GET /api/v1/stats`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EngineStats {
    pub pair: AssetPair,
    pub resting_orders: usize,
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    pub trades_executed: u64,
    pub orders_submitted: u64,
    pub orders_rejected: u64,
    pub uptime_seconds: u64,
}

pub struct SubmitOutcome {
    pub order: OrderResponse,
    pub trades: Vec<Trade>,
}

pub struct CancelOutcome {
    pub order_id: String,
    pub status: OrderStatus,
}

/// Per-unit reservation rate: `Decimal::ONE` for a base-token reservation
/// (Sell side — one unit of base per unit of quantity), the order's own
/// price for a quote-token reservation (Buy side).
fn per_unit_reserve(side: OrderSide, price: Decimal) -> Decimal {
    match side {
        OrderSide::Sell => Decimal::ONE,
        OrderSide::Buy => price,
    }
}

pub struct MatchingEngine {
    resolved_pair: ResolvedPair,
    book: OrderBook,
    vault: Arc<VaultCache>,
    contract: Arc<ContractClient>,
    /// Every order the engine has ever accepted, including terminal ones —
    /// queryable by id for the process lifetime, mutated only under `lock`.
    orders: DashMap<String, Order>,
    sequence: AtomicU64,
    self_trade_policy: SelfTradePolicy,
    lock: Mutex<()>,
    started_at: Instant,
    trades_executed: AtomicU64,
    orders_submitted: AtomicU64,
    orders_rejected: AtomicU64,
}

impl MatchingEngine {
    pub fn new(
        resolved_pair: ResolvedPair,
        vault: Arc<VaultCache>,
        contract: Arc<ContractClient>,
        self_trade_policy: SelfTradePolicy,
    ) -> Self {
        let book = OrderBook::new(resolved_pair.symbolic.clone());
        Self {
            resolved_pair,
            book,
            vault,
            contract,
            orders: DashMap::new(),
            sequence: AtomicU64::new(1),
            self_trade_policy,
            lock: Mutex::new(()),
            started_at: Instant::now(),
            trades_executed: AtomicU64::new(0),
            orders_submitted: AtomicU64::new(0),
            orders_rejected: AtomicU64::new(0),
        }
    }

    pub fn pair(&self) -> &AssetPair {
        &self.resolved_pair.symbolic
    }

    fn reserve_token(&self, side: OrderSide) -> &str {
        match side {
            OrderSide::Buy => &self.resolved_pair.quote_address,
            OrderSide::Sell => &self.resolved_pair.base_address,
        }
    }

    pub fn get_order(&self, order_id: &str) -> Option<OrderResponse> {
        self.orders.get(order_id).map(|o| OrderResponse::from(&*o))
    }

    pub fn snapshot(&self, depth: usize) -> OrderBookSnapshot {
        self.book.snapshot(depth)
    }

    pub fn clear_cache(&self) {
        self.vault.clear();
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            pair: self.resolved_pair.symbolic.clone(),
            resting_orders: self.book.order_count(),
            best_bid: self.book.best_bid(),
            best_ask: self.book.best_ask(),
            trades_executed: self.trades_executed.load(Ordering::Relaxed),
            orders_submitted: self.orders_submitted.load(Ordering::Relaxed),
            orders_rejected: self.orders_rejected.load(Ordering::Relaxed),
            uptime_seconds: self.started_at.elapsed().as_secs(),
        }
    }

    /// Resolves a short symbol (`"XLM"`, `"USDC"`) to the token address this
    /// engine's vault cache keys balances by. Rejects anything outside the
    /// one pair this engine was configured for.
    fn token_address_for_symbol(&self, symbol: &str) -> AppResult<&str> {
        if symbol.eq_ignore_ascii_case(&self.resolved_pair.symbolic.base) {
            Ok(&self.resolved_pair.base_address)
        } else if symbol.eq_ignore_ascii_case(&self.resolved_pair.symbolic.quote) {
            Ok(&self.resolved_pair.quote_address)
        } else {
            Err(AppError::ClientInput(format!("unknown token {symbol}")))
        }
    }

    pub async fn balance(&self, account: &str, token_symbol: &str) -> AppResult<Decimal> {
        let token_address = self.token_address_for_symbol(token_symbol)?;
        self.vault
            .available(account, token_address)
            .await
            .map_err(|e| AppError::UpstreamUnavailable(e.to_string()))
    }

    fn static_validate(req: &CreateOrderRequest) -> AppResult<()> {
        if req.quantity <= Decimal::ZERO {
            return Err(AppError::ClientInput("quantity must be positive".into()));
        }
        match req.order_type {
            OrderType::Limit => {
                let price = req
                    .price
                    .ok_or_else(|| AppError::ClientInput("price is required for limit orders".into()))?;
                if price <= Decimal::ZERO {
                    return Err(AppError::ClientInput("price must be positive".into()));
                }
            }
            OrderType::Market => {}
        }
        Ok(())
    }

    /// Price limit to hand the book: `None` means unbounded (Market buy) or
    /// zero-bounded (Market sell), matching spec.md §4.2's
    /// `price_limit = ∞/0` convention for market orders.
    fn price_limit(req: &CreateOrderRequest) -> Option<Decimal> {
        match req.order_type {
            OrderType::Limit => req.price,
            OrderType::Market => None,
        }
    }

    /// Computes `(reserve_token, reserve_amount, per_unit_rate)` for an
    /// incoming order. Market buys fall back to a conservative overestimate
    /// off the current best ask; with no opposite liquidity to estimate
    /// against, admission is rejected rather than guessing (spec.md §9's
    /// safer-default resolution).
    fn required_reservation(&self, req: &CreateOrderRequest) -> AppResult<(String, Decimal, Decimal)> {
        match req.side {
            OrderSide::Sell => {
                let token = self.reserve_token(OrderSide::Sell).to_string();
                Ok((token, req.quantity, Decimal::ONE))
            }
            OrderSide::Buy => {
                let price = match req.order_type {
                    OrderType::Limit => req.price.expect("validated by static_validate"),
                    OrderType::Market => self.book.best_ask().ok_or_else(|| {
                        AppError::InsufficientFunds(
                            "no opposite liquidity to estimate a market buy reservation".into(),
                        )
                    })?,
                };
                let token = self.reserve_token(OrderSide::Buy).to_string();
                Ok((token, req.quantity * price, price))
            }
        }
    }

    fn derive_status(filled: Decimal, quantity: Decimal, residual: ResidualStatus) -> OrderStatus {
        match residual {
            ResidualStatus::Filled => OrderStatus::Filled,
            ResidualStatus::Resting => {
                if filled > Decimal::ZERO {
                    OrderStatus::PartiallyFilled
                } else {
                    OrderStatus::Pending
                }
            }
            ResidualStatus::Dropped => {
                if filled >= quantity {
                    OrderStatus::Filled
                } else if filled > Decimal::ZERO {
                    OrderStatus::PartiallyFilled
                } else {
                    OrderStatus::Cancelled
                }
            }
        }
    }

    /// Submits a new signed order: validate, authenticate, admit, match,
    /// settle. Mirrors spec.md §4.4's nine-step contract; signature
    /// verification (pure CPU) runs before the matching mutex is acquired,
    /// per §5's suspension-point guidance.
    pub async fn submit(&self, req: CreateOrderRequest) -> AppResult<SubmitOutcome> {
        Self::static_validate(&req)?;
        auth::verify_order(&req)?;

        let _guard = self.lock.lock().await;

        if self.orders.contains_key(&req.order_id) {
            self.orders_rejected.fetch_add(1, Ordering::Relaxed);
            crate::metrics::record_order_rejected("duplicate_order_id");
            return Err(AppError::DuplicateOrderId(req.order_id.clone()));
        }

        if req.pair != self.resolved_pair.symbolic {
            self.orders_rejected.fetch_add(1, Ordering::Relaxed);
            crate::metrics::record_order_rejected("pair_not_supported");
            return Err(AppError::PairNotSupported(req.pair.to_string()));
        }

        let (reserve_token, reserve_amount, per_unit) = self.required_reservation(&req)?;

        let available = self
            .vault
            .available(&req.account, &reserve_token)
            .await
            .map_err(|e| AppError::UpstreamUnavailable(e.to_string()))?;
        if reserve_amount > available {
            self.orders_rejected.fetch_add(1, Ordering::Relaxed);
            crate::metrics::record_order_rejected("insufficient_funds");
            return Err(AppError::InsufficientFunds(format!(
                "required {reserve_amount}, available {available}"
            )));
        }

        if req.time_in_force == TimeInForce::Fok {
            let price_limit = Self::price_limit(&req);
            let achievable = self.book.achievable_quantity(
                req.side,
                &req.account,
                price_limit,
                req.quantity,
                self.self_trade_policy,
            );
            if achievable < req.quantity {
                self.orders_rejected.fetch_add(1, Ordering::Relaxed);
                crate::metrics::record_order_rejected("fok_unfillable");
                return Err(AppError::FOKUnfillable);
            }
        }

        self.vault.reserve(&req.account, &reserve_token, reserve_amount);

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let mut order = Order::from_request(req.clone(), sequence);
        self.orders_submitted.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_order_submitted(
            match order.side {
                OrderSide::Buy => "buy",
                OrderSide::Sell => "sell",
            },
            match order.order_type {
                OrderType::Limit => "limit",
                OrderType::Market => "market",
            },
        );

        let match_started = Instant::now();
        let now = chrono::Utc::now().timestamp();
        let outcome = self.book.add(
            &order,
            || hex::encode(rand::random::<[u8; 32]>()),
            now,
            self.self_trade_policy,
        );
        crate::metrics::record_match_duration(match_started.elapsed().as_secs_f64());

        order.filled_quantity = outcome.filled_quantity;
        order.status = Self::derive_status(outcome.filled_quantity, order.quantity, outcome.residual);
        self.orders.insert(order.order_id.clone(), order.clone());

        let settled_trades = self
            .settle_and_compensate(&mut order, per_unit, outcome.trades)
            .await;

        self.orders.insert(order.order_id.clone(), order.clone());

        Ok(SubmitOutcome {
            order: OrderResponse::from(&order),
            trades: settled_trades,
        })
    }

    /// Releases `qty` worth of `account`'s reservation for `side`, computed
    /// at `per_unit` — the rate at which it was originally reserved, not
    /// necessarily the trade's execution price.
    fn release_fill(&self, account: &str, side: OrderSide, per_unit: Decimal, qty: Decimal, base_addr: &str, quote_addr: &str) {
        let token = match side {
            OrderSide::Buy => quote_addr,
            OrderSide::Sell => base_addr,
        };
        self.vault.release(account, token, qty * per_unit);
    }

    fn reserve_fill(&self, account: &str, side: OrderSide, per_unit: Decimal, qty: Decimal, base_addr: &str, quote_addr: &str) {
        let token = match side {
            OrderSide::Buy => quote_addr,
            OrderSide::Sell => base_addr,
        };
        self.vault.reserve(account, token, qty * per_unit);
    }

    /// Walks the produced trades in order, settling each synchronously
    /// against the contract. The first settlement failure triggers
    /// compensation for that trade and every trade after it in the batch —
    /// they were already carved out of the book by the match pass but never
    /// reach the contract, per spec.md §4.4 point 8.
    async fn settle_and_compensate(
        &self,
        taker: &mut Order,
        taker_per_unit: Decimal,
        trades: Vec<Trade>,
    ) -> Vec<Trade> {
        let base_addr = self.resolved_pair.base_address.clone();
        let quote_addr = self.resolved_pair.quote_address.clone();
        let mut results = Vec::with_capacity(trades.len());
        let mut compensating = false;

        for mut trade in trades {
            let notional = trade.price * trade.quantity;
            let (maker_id, maker_account, maker_side) = if trade.buy_order_id == taker.order_id {
                (trade.sell_order_id.clone(), trade.sell_account.clone(), OrderSide::Sell)
            } else {
                (trade.buy_order_id.clone(), trade.buy_account.clone(), OrderSide::Buy)
            };
            let maker_per_unit = self
                .orders
                .get(&maker_id)
                .and_then(|o| o.price)
                .map(|p| per_unit_reserve(maker_side, p))
                .unwrap_or(Decimal::ONE);

            if compensating {
                trade.settlement_status = SettlementStatus::Failed;
                self.undo_fill(taker, &maker_id, &maker_account, &trade);
                results.push(trade);
                continue;
            }

            // Optimistic internal vault deltas (spec.md §4.4 point 7).
            self.vault.apply_delta(&trade.buy_account, &quote_addr, -notional);
            self.vault.apply_delta(&trade.buy_account, &base_addr, trade.quantity);
            self.vault.apply_delta(&trade.sell_account, &base_addr, -trade.quantity);
            self.vault.apply_delta(&trade.sell_account, &quote_addr, notional);

            self.release_fill(&maker_account, maker_side, maker_per_unit, trade.quantity, &base_addr, &quote_addr);
            self.release_fill(&taker.account, taker.side, taker_per_unit, trade.quantity, &base_addr, &quote_addr);

            if let Some(mut maker_order) = self.orders.get_mut(&maker_id) {
                maker_order.filled_quantity += trade.quantity;
                maker_order.status = if maker_order.filled_quantity >= maker_order.quantity {
                    OrderStatus::Filled
                } else {
                    OrderStatus::PartiallyFilled
                };
            }

            let trade_id_bytes: [u8; 32] = hex::decode(&trade.trade_id)
                .ok()
                .and_then(|v| v.try_into().ok())
                .unwrap_or([0u8; 32]);
            let instruction = SettlementInstruction::build(
                trade_id_bytes,
                trade.buy_account.clone(),
                trade.sell_account.clone(),
                base_addr.clone(),
                quote_addr.clone(),
                trade.price,
                trade.quantity,
                trade.timestamp,
            );

            let settle_started = Instant::now();
            let outcome = self.contract.settle_trade(&instruction).await;
            crate::metrics::record_settlement(
                matches!(outcome, SettlementOutcome::Success { .. }),
                settle_started.elapsed().as_secs_f64(),
            );

            match outcome {
                SettlementOutcome::Success { tx_id } => {
                    trade.settlement_status = SettlementStatus::Settled;
                    trade.settlement_tx_id = Some(tx_id);
                    self.trades_executed.fetch_add(1, Ordering::Relaxed);
                    crate::metrics::record_trade_executed();
                    self.vault.invalidate(&trade.buy_account, &quote_addr);
                    self.vault.invalidate(&trade.buy_account, &base_addr);
                    self.vault.invalidate(&trade.sell_account, &quote_addr);
                    self.vault.invalidate(&trade.sell_account, &base_addr);
                    results.push(trade);
                }
                SettlementOutcome::Failed(_kind) => {
                    tracing::warn!(trade_id = %trade.trade_id, "settlement failed, compensating");
                    trade.settlement_status = SettlementStatus::Failed;

                    // Undo the optimistic deltas and reservation releases
                    // just applied for this trade, then re-rest both sides.
                    self.vault.apply_delta(&trade.buy_account, &quote_addr, notional);
                    self.vault.apply_delta(&trade.buy_account, &base_addr, -trade.quantity);
                    self.vault.apply_delta(&trade.sell_account, &base_addr, trade.quantity);
                    self.vault.apply_delta(&trade.sell_account, &quote_addr, -notional);
                    self.reserve_fill(&maker_account, maker_side, maker_per_unit, trade.quantity, &base_addr, &quote_addr);
                    self.reserve_fill(&taker.account, taker.side, taker_per_unit, trade.quantity, &base_addr, &quote_addr);

                    if let Some(mut maker_order) = self.orders.get_mut(&maker_id) {
                        maker_order.filled_quantity -= trade.quantity;
                        maker_order.status = OrderStatus::PartiallyFilled;
                        let entry = make_resting_entry(&maker_order, maker_order.remaining());
                        drop(maker_order);
                        let _ = self.book.cancel(&maker_id, &maker_account);
                        self.book.rest_at_tail(entry);
                    }

                    taker.filled_quantity -= trade.quantity;
                    compensating = true;
                    results.push(trade);
                }
            }
        }

        if compensating {
            self.reconcile_taker_after_compensation(taker);
        }

        results
    }

    /// Shared fate of every trade produced after the batch's first
    /// settlement failure: the match pass already carved it out of the
    /// book and set it `Pending`, but the settlement loop never attempts
    /// it — both the maker's and taker's reservations are still intact
    /// (no release ever ran for this trade), so only the maker needs
    /// restoring to the book and the taker's optimistic fill undoing.
    fn undo_fill(&self, taker: &mut Order, maker_id: &str, maker_account: &str, trade: &Trade) {
        if let Some(maker_order) = self.orders.get(maker_id) {
            let entry = make_resting_entry(&maker_order, maker_order.remaining());
            drop(maker_order);
            let _ = self.book.cancel(maker_id, maker_account);
            self.book.rest_at_tail(entry);
        }

        taker.filled_quantity -= trade.quantity;
    }

    /// After compensation, the taker's true filled quantity has shrunk.
    /// GTC limit orders get the freed-up remainder re-rested at the tail of
    /// their level (losing time priority, the documented cost of a failed
    /// settlement); IOC/Market orders never rest, so the remainder is
    /// simply dropped — consistent with their normal disposition. If the
    /// taker is already resting (it had its own pre-match residual), its
    /// existing entry is topped back up rather than reinserted from
    /// scratch.
    fn reconcile_taker_after_compensation(&self, taker: &mut Order) {
        let remaining = taker.remaining();
        taker.status = if taker.filled_quantity <= Decimal::ZERO {
            if taker.is_resting_eligible() {
                OrderStatus::Pending
            } else {
                OrderStatus::Cancelled
            }
        } else if remaining > Decimal::ZERO {
            OrderStatus::PartiallyFilled
        } else {
            OrderStatus::Filled
        };

        if remaining > Decimal::ZERO && taker.is_resting_eligible() {
            match self.book.cancel(&taker.order_id, &taker.account) {
                Ok(mut entry) => {
                    entry.remaining = remaining;
                    self.book.rest_at_tail(entry);
                }
                Err(_) => {
                    let entry = make_resting_entry(taker, remaining);
                    self.book.rest_at_tail(entry);
                }
            }
        }
    }

    /// Cancels a resting order on behalf of its signed-off owner.
    /// Cancelling a terminal order is idempotent (returns `Ok` without a
    /// state change), per spec.md §4.2 and §8.
    pub async fn cancel(&self, req: CancelOrderRequest) -> AppResult<CancelOutcome> {
        auth::verify_cancel(&req)?;

        let _guard = self.lock.lock().await;

        let Some(existing) = self.orders.get(&req.order_id).map(|o| o.clone()) else {
            return Err(AppError::NotFound(req.order_id));
        };
        if existing.account != req.account {
            return Err(AppError::NotOwner);
        }
        if existing.status.is_terminal() {
            return Ok(CancelOutcome {
                order_id: req.order_id,
                status: existing.status,
            });
        }

        match self.book.cancel(&req.order_id, &req.account) {
            Ok(entry) => {
                let per_unit = per_unit_reserve(entry.side, entry.price);
                let token = self.reserve_token(entry.side).to_string();
                self.vault.release(&req.account, &token, entry.remaining * per_unit);
            }
            Err(_) => {
                // Not resting (e.g. fully filled between lookup and cancel
                // in a future concurrent-cancel extension); nothing to
                // release — the status check above already covers the
                // ordinary terminal case.
            }
        }

        if let Some(mut order) = self.orders.get_mut(&req.order_id) {
            order.status = OrderStatus::Cancelled;
        }
        crate::metrics::record_order_cancelled();

        Ok(CancelOutcome {
            order_id: req.order_id,
            status: OrderStatus::Cancelled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::client::{LedgerClient, LedgerError, SimulationResult, TransactionOutcome};
    use crate::ledger::contract::ContractClient;
    use async_trait::async_trait;
    use ed25519_dalek::{Signer, SigningKey};
    use rand::rngs::OsRng;
    use rust_decimal_macros::dec;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    struct DeterministicLedger {
        balances: DashMap<(String, String), i128>,
        fail_next_settle: AtomicBool,
    }

    impl DeterministicLedger {
        fn new() -> Self {
            Self {
                balances: DashMap::new(),
                fail_next_settle: AtomicBool::new(false),
            }
        }
        fn fund(&self, account: &str, token: &str, stroops: i128) {
            self.balances.insert((account.to_string(), token.to_string()), stroops);
        }
    }

    #[async_trait]
    impl LedgerClient for DeterministicLedger {
        async fn get_balance(&self, account: &str, token: &str) -> Result<i128, LedgerError> {
            Ok(self
                .balances
                .get(&(account.to_string(), token.to_string()))
                .map(|v| *v)
                .unwrap_or(0))
        }
        async fn get_pair_config(&self) -> Result<crate::ledger::client::PairConfig, LedgerError> {
            Ok(crate::ledger::client::PairConfig {
                base_symbol: "XLM".into(),
                base_address: "CBASE".into(),
                quote_symbol: "USDC".into(),
                quote_address: "CQUOTE".into(),
            })
        }
        async fn simulate_settle_trade(&self, _invocation_xdr: &str) -> Result<SimulationResult, LedgerError> {
            Ok(SimulationResult {
                transaction_data: None,
                min_resource_fee: 100,
            })
        }
        async fn submit_transaction(&self, _signed_envelope_xdr: &str) -> Result<String, LedgerError> {
            if self.fail_next_settle.swap(false, Ordering::SeqCst) {
                return Err(LedgerError::ContractError("insufficient balance".into()));
            }
            Ok("txhash".into())
        }
        async fn poll_transaction(&self, _tx_hash: &str) -> Result<TransactionOutcome, LedgerError> {
            Ok(TransactionOutcome::Success)
        }
    }

    fn signer() -> (SigningKey, String) {
        let key = SigningKey::generate(&mut OsRng);
        let address = stellar_strkey::ed25519::PublicKey(key.verifying_key().to_bytes()).to_string();
        (key, address)
    }

    fn signed_request(
        key: &SigningKey,
        account: &str,
        order_id: &str,
        side: OrderSide,
        order_type: OrderType,
        price: Option<Decimal>,
        quantity: Decimal,
        tif: TimeInForce,
    ) -> CreateOrderRequest {
        let mut req = CreateOrderRequest {
            order_id: order_id.into(),
            account: account.into(),
            pair: AssetPair::new("XLM", "USDC"),
            side,
            order_type,
            price,
            quantity,
            time_in_force: tif,
            timestamp: 1_700_000_000,
            signature: String::new(),
        };
        let digest = crate::auth::canonical::order_digest(&req);
        let sig = key.sign(&digest);
        req.signature = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, sig.to_bytes());
        req
    }

    async fn test_engine(ledger: Arc<DeterministicLedger>) -> (MatchingEngine, SigningKey) {
        let resolved = ResolvedPair {
            symbolic: AssetPair::new("XLM", "USDC"),
            base_address: "CBASE".into(),
            quote_address: "CQUOTE".into(),
        };
        let vault = Arc::new(VaultCache::new(ledger.clone(), Duration::from_secs(30)));
        let signing_key = SigningKey::generate(&mut OsRng);
        let contract = Arc::new(ContractClient::new(ledger, signing_key, Duration::from_secs(5)));
        let engine = MatchingEngine::new(resolved, vault, contract, SelfTradePolicy::SkipMatch);
        (engine, SigningKey::generate(&mut OsRng))
    }

    #[tokio::test]
    async fn clean_cross_settles_and_fills_both_sides() {
        let ledger = Arc::new(DeterministicLedger::new());
        let (buyer_key, buyer) = signer();
        let (seller_key, seller) = signer();
        ledger.fund(&buyer, "CQUOTE", 1_000_000_000);
        ledger.fund(&seller, "CBASE", 1_000_000_000);

        let (engine, _) = test_engine(ledger).await;

        let sell_req = signed_request(
            &seller_key,
            &seller,
            "s1",
            OrderSide::Sell,
            OrderType::Limit,
            Some(dec!(1.0)),
            dec!(10),
            TimeInForce::Gtc,
        );
        let sell_outcome = engine.submit(sell_req).await.unwrap();
        assert!(sell_outcome.trades.is_empty());

        let buy_req = signed_request(
            &buyer_key,
            &buyer,
            "b1",
            OrderSide::Buy,
            OrderType::Limit,
            Some(dec!(1.0)),
            dec!(10),
            TimeInForce::Gtc,
        );
        let buy_outcome = engine.submit(buy_req).await.unwrap();

        assert_eq!(buy_outcome.trades.len(), 1);
        assert_eq!(buy_outcome.trades[0].price, dec!(1.0));
        assert_eq!(buy_outcome.trades[0].quantity, dec!(10));
        assert_eq!(buy_outcome.order.status, OrderStatus::Filled);
        assert_eq!(buy_outcome.trades[0].settlement_status, SettlementStatus::Settled);
    }

    #[tokio::test]
    async fn duplicate_order_id_is_rejected() {
        let ledger = Arc::new(DeterministicLedger::new());
        let (key, account) = signer();
        ledger.fund(&account, "CBASE", 1_000_000_000);
        let (engine, _) = test_engine(ledger).await;

        let req = signed_request(
            &key,
            &account,
            "dup-1",
            OrderSide::Sell,
            OrderType::Limit,
            Some(dec!(1.0)),
            dec!(5),
            TimeInForce::Gtc,
        );
        engine.submit(req.clone()).await.unwrap();
        let result = engine.submit(req).await;
        assert!(matches!(result, Err(AppError::DuplicateOrderId(_))));
    }

    #[tokio::test]
    async fn insufficient_funds_rejects_before_any_state_change() {
        let ledger = Arc::new(DeterministicLedger::new());
        let (key, account) = signer();
        let (engine, _) = test_engine(ledger).await;

        let req = signed_request(
            &key,
            &account,
            "o1",
            OrderSide::Sell,
            OrderType::Limit,
            Some(dec!(1.0)),
            dec!(5),
            TimeInForce::Gtc,
        );
        let result = engine.submit(req).await;
        assert!(matches!(result, Err(AppError::InsufficientFunds(_))));
        assert!(!engine.book.has_order("o1"));
    }

    #[tokio::test]
    async fn cancel_is_idempotent_on_a_terminal_order() {
        let ledger = Arc::new(DeterministicLedger::new());
        let (key, account) = signer();
        ledger.fund(&account, "CBASE", 1_000_000_000);
        let (engine, _) = test_engine(ledger).await;

        let req = signed_request(
            &key,
            &account,
            "o1",
            OrderSide::Sell,
            OrderType::Limit,
            Some(dec!(1.0)),
            dec!(5),
            TimeInForce::Gtc,
        );
        engine.submit(req).await.unwrap();

        let mut cancel_req = CancelOrderRequest {
            order_id: "o1".into(),
            account: account.clone(),
            timestamp: 1_700_000_100,
            signature: String::new(),
        };
        let digest = crate::auth::canonical::cancel_digest(&cancel_req);
        let sig = key.sign(&digest);
        cancel_req.signature =
            base64::Engine::encode(&base64::engine::general_purpose::STANDARD, sig.to_bytes());

        let first = engine.cancel(cancel_req.clone()).await.unwrap();
        assert_eq!(first.status, OrderStatus::Cancelled);
        let second = engine.cancel(cancel_req).await.unwrap();
        assert_eq!(second.status, OrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn settlement_failure_compensates_and_forfeits_priority() {
        let ledger = Arc::new(DeterministicLedger::new());
        let (buyer_key, buyer) = signer();
        let (seller_key, seller) = signer();
        ledger.fund(&buyer, "CQUOTE", 1_000_000_000);
        ledger.fund(&seller, "CBASE", 1_000_000_000);
        ledger.fail_next_settle.store(true, Ordering::SeqCst);

        let (engine, _) = test_engine(ledger.clone()).await;

        let sell_req = signed_request(
            &seller_key,
            &seller,
            "s1",
            OrderSide::Sell,
            OrderType::Limit,
            Some(dec!(1.0)),
            dec!(10),
            TimeInForce::Gtc,
        );
        engine.submit(sell_req).await.unwrap();

        let buy_req = signed_request(
            &buyer_key,
            &buyer,
            "b1",
            OrderSide::Buy,
            OrderType::Limit,
            Some(dec!(1.0)),
            dec!(10),
            TimeInForce::Gtc,
        );
        let outcome = engine.submit(buy_req).await.unwrap();

        assert_eq!(outcome.trades.len(), 1);
        assert_eq!(outcome.trades[0].settlement_status, SettlementStatus::Failed);
        // Both orders lose their fill and rest again at their original price.
        assert!(engine.book.has_order("b1"));
        assert!(engine.book.has_order("s1"));
        assert_eq!(outcome.order.filled_quantity, dec!(0));
    }

    #[tokio::test]
    async fn fok_unfillable_rejects_before_any_state_change() {
        let ledger = Arc::new(DeterministicLedger::new());
        let (seller_key, seller) = signer();
        let (buyer_key, buyer) = signer();
        ledger.fund(&seller, "CBASE", 1_000_000_000);
        ledger.fund(&buyer, "CQUOTE", 1_000_000_000);
        let (engine, _) = test_engine(ledger).await;

        let ask = signed_request(
            &seller_key,
            &seller,
            "a1",
            OrderSide::Sell,
            OrderType::Limit,
            Some(dec!(1.0)),
            dec!(7),
            TimeInForce::Gtc,
        );
        engine.submit(ask).await.unwrap();

        let fok_buy = signed_request(
            &buyer_key,
            &buyer,
            "b1",
            OrderSide::Buy,
            OrderType::Limit,
            Some(dec!(1.0)),
            dec!(10),
            TimeInForce::Fok,
        );
        let result = engine.submit(fok_buy).await;

        assert!(matches!(result, Err(AppError::FOKUnfillable)));
        assert!(!engine.book.has_order("b1"));
        // The resting ask is untouched: still 7 available at 1.00.
        assert_eq!(engine.book.snapshot(5).asks[0].quantity, dec!(7));
    }

    #[tokio::test]
    async fn ioc_residual_partially_fills_and_never_rests() {
        let ledger = Arc::new(DeterministicLedger::new());
        let (seller_key, seller) = signer();
        let (buyer_key, buyer) = signer();
        ledger.fund(&seller, "CBASE", 1_000_000_000);
        ledger.fund(&buyer, "CQUOTE", 1_000_000_000);
        let (engine, _) = test_engine(ledger).await;

        let ask = signed_request(
            &seller_key,
            &seller,
            "a1",
            OrderSide::Sell,
            OrderType::Limit,
            Some(dec!(1.0)),
            dec!(4),
            TimeInForce::Gtc,
        );
        engine.submit(ask).await.unwrap();

        let ioc_buy = signed_request(
            &buyer_key,
            &buyer,
            "b1",
            OrderSide::Buy,
            OrderType::Limit,
            Some(dec!(1.0)),
            dec!(10),
            TimeInForce::Ioc,
        );
        let outcome = engine.submit(ioc_buy).await.unwrap();

        assert_eq!(outcome.trades.len(), 1);
        assert_eq!(outcome.trades[0].quantity, dec!(4));
        assert_eq!(outcome.order.status, OrderStatus::PartiallyFilled);
        assert!(!engine.book.has_order("b1"));
    }

    #[tokio::test]
    async fn self_trade_is_skipped_and_both_orders_remain_live() {
        let ledger = Arc::new(DeterministicLedger::new());
        let (key, account) = signer();
        ledger.fund(&account, "CQUOTE", 1_000_000_000);
        ledger.fund(&account, "CBASE", 1_000_000_000);
        let (engine, _) = test_engine(ledger).await;

        let resting_buy = signed_request(
            &key,
            &account,
            "b1",
            OrderSide::Buy,
            OrderType::Limit,
            Some(dec!(1.0)),
            dec!(5),
            TimeInForce::Gtc,
        );
        engine.submit(resting_buy).await.unwrap();

        let crossing_sell = signed_request(
            &key,
            &account,
            "s1",
            OrderSide::Sell,
            OrderType::Limit,
            Some(dec!(0.99)),
            dec!(5),
            TimeInForce::Gtc,
        );
        let outcome = engine.submit(crossing_sell).await.unwrap();

        assert!(outcome.trades.is_empty());
        assert!(engine.book.has_order("b1"));
        assert!(engine.book.has_order("s1"));
    }

    #[tokio::test]
    async fn market_buy_walks_price_levels_in_time_priority() {
        let ledger = Arc::new(DeterministicLedger::new());
        let (m1_key, m1) = signer();
        let (m2_key, m2) = signer();
        let (m3_key, m3) = signer();
        let (buyer_key, buyer) = signer();
        for seller in [&m1, &m2, &m3] {
            ledger.fund(seller, "CBASE", 1_000_000_000);
        }
        ledger.fund(&buyer, "CQUOTE", 1_000_000_000);
        let (engine, _) = test_engine(ledger).await;

        engine
            .submit(signed_request(
                &m1_key,
                &m1,
                "m1",
                OrderSide::Sell,
                OrderType::Limit,
                Some(dec!(1.00)),
                dec!(1),
                TimeInForce::Gtc,
            ))
            .await
            .unwrap();
        engine
            .submit(signed_request(
                &m2_key,
                &m2,
                "m2",
                OrderSide::Sell,
                OrderType::Limit,
                Some(dec!(1.00)),
                dec!(1),
                TimeInForce::Gtc,
            ))
            .await
            .unwrap();
        engine
            .submit(signed_request(
                &m3_key,
                &m3,
                "m3",
                OrderSide::Sell,
                OrderType::Limit,
                Some(dec!(1.01)),
                dec!(1),
                TimeInForce::Gtc,
            ))
            .await
            .unwrap();

        let market_buy = signed_request(
            &buyer_key,
            &buyer,
            "b1",
            OrderSide::Buy,
            OrderType::Market,
            None,
            dec!(1.5),
            TimeInForce::Ioc,
        );
        let outcome = engine.submit(market_buy).await.unwrap();

        assert_eq!(outcome.trades.len(), 2);
        assert_eq!(outcome.trades[0].price, dec!(1.00));
        assert_eq!(outcome.trades[0].quantity, dec!(1));
        assert_eq!(outcome.trades[0].sell_order_id, "m1");
        assert_eq!(outcome.trades[1].price, dec!(1.00));
        assert_eq!(outcome.trades[1].quantity, dec!(0.5));
        assert_eq!(outcome.trades[1].sell_order_id, "m2");
        assert!(engine.book.has_order("m2"));
        assert!(engine.book.has_order("m3"));
    }
}
