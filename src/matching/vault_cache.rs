//! Vault State Cache (C3): per-(account, token) balances pulled from the
//! ledger with a short TTL, plus the reservation accounting that keeps two
//! accepted orders from oversubscribing the same deposited funds.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use rust_decimal::Decimal;

use crate::ledger::client::{LedgerClient, LedgerError};

#[derive(Debug, Clone)]
struct CacheEntry {
    committed: Decimal,
    reserved: Decimal,
    fetched_at: Instant,
}

pub struct VaultCache {
    ledger: Arc<dyn LedgerClient>,
    ttl: Duration,
    entries: DashMap<(String, String), CacheEntry>,
}

impl VaultCache {
    pub fn new(ledger: Arc<dyn LedgerClient>, ttl: Duration) -> Self {
        Self {
            ledger,
            ttl,
            entries: DashMap::new(),
        }
    }

    fn is_stale(entry: &CacheEntry, ttl: Duration) -> bool {
        entry.fetched_at.elapsed() >= ttl
    }

    /// Returns the committed/reserved pair, refreshing from the ledger on
    /// a miss or expired TTL. Reservations survive a refresh — only
    /// `committed` is replaced with on-chain truth.
    async fn load(&self, account: &str, token: &str) -> Result<CacheEntry, LedgerError> {
        let key = (account.to_string(), token.to_string());

        if let Some(entry) = self.entries.get(&key) {
            if !Self::is_stale(&entry, self.ttl) {
                crate::metrics::record_vault_cache_hit();
                return Ok(entry.clone());
            }
        }
        crate::metrics::record_vault_cache_miss();

        let raw_balance = self.ledger.get_balance(account, token).await?;
        let committed = Decimal::from_i128_with_scale(raw_balance, 0)
            / Decimal::from(crate::ledger::contract::STROOP_SCALE);

        let reserved = self
            .entries
            .get(&key)
            .map(|e| e.reserved)
            .unwrap_or(Decimal::ZERO);

        let entry = CacheEntry {
            committed,
            reserved,
            fetched_at: Instant::now(),
        };
        self.entries.insert(key, entry.clone());
        Ok(entry)
    }

    /// `available = committed - reserved`, clamped at 0. Callers treat a
    /// negative `committed - reserved` (a race with an off-engine
    /// withdrawal) as zero available capacity rather than panicking.
    pub async fn available(&self, account: &str, token: &str) -> Result<Decimal, LedgerError> {
        let entry = self.load(account, token).await?;
        Ok((entry.committed - entry.reserved).max(Decimal::ZERO))
    }

    /// Adds to `reserved` without touching `committed`. Called at order
    /// acceptance once admission has already checked `available`.
    pub fn reserve(&self, account: &str, token: &str, amount: Decimal) {
        let key = (account.to_string(), token.to_string());
        let mut entry = self.entries.entry(key).or_insert_with(|| CacheEntry {
            committed: Decimal::ZERO,
            reserved: Decimal::ZERO,
            fetched_at: Instant::now(),
        });
        entry.reserved += amount;
    }

    /// Subtracts from `reserved`, clamped at 0 — an over-release is a
    /// logic bug elsewhere, not something this cache should propagate as
    /// an error.
    pub fn release(&self, account: &str, token: &str, amount: Decimal) {
        let key = (account.to_string(), token.to_string());
        if let Some(mut entry) = self.entries.get_mut(&key) {
            entry.reserved = (entry.reserved - amount).max(Decimal::ZERO);
        }
    }

    /// Adjusts the cached `committed` balance by `delta` without touching
    /// `reserved` or re-reading the ledger. The engine applies this
    /// optimistically the moment a trade settles (and reverses it if
    /// settlement later fails), so a follow-on order in the same batch
    /// sees the post-trade balance before the TTL would otherwise expire.
    pub fn apply_delta(&self, account: &str, token: &str, delta: Decimal) {
        let key = (account.to_string(), token.to_string());
        let mut entry = self.entries.entry(key).or_insert_with(|| CacheEntry {
            committed: Decimal::ZERO,
            reserved: Decimal::ZERO,
            fetched_at: Instant::now(),
        });
        entry.committed += delta;
    }

    /// Forces the next `available`/`reserve` call to re-read from the
    /// ledger. Called after a settlement succeeds and on admin request.
    pub fn invalidate(&self, account: &str, token: &str) {
        self.entries.remove(&(account.to_string(), token.to_string()));
    }

    /// Evicts every cached entry. Supports deterministic E2E testing via
    /// `POST /api/v1/admin/clear_cache`.
    pub fn clear(&self) {
        self.entries.clear();
    }

    pub async fn refresh(&self, account: &str, token: &str) -> Result<(), LedgerError> {
        self.entries.remove(&(account.to_string(), token.to_string()));
        self.load(account, token).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::client::TransactionOutcome;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicI64, Ordering};

    struct FixedLedger {
        balance_stroops: AtomicI64,
        calls: AtomicI64,
    }

    #[async_trait]
    impl LedgerClient for FixedLedger {
        async fn get_balance(&self, _account: &str, _token: &str) -> Result<i128, LedgerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.balance_stroops.load(Ordering::SeqCst) as i128)
        }
        async fn get_pair_config(&self) -> Result<crate::ledger::client::PairConfig, LedgerError> {
            Ok(crate::ledger::client::PairConfig {
                base_symbol: "XLM".into(),
                base_address: "BASE".into(),
                quote_symbol: "USDC".into(),
                quote_address: "QUOTE".into(),
            })
        }
        async fn simulate_settle_trade(
            &self,
            _invocation_xdr: &str,
        ) -> Result<crate::ledger::client::SimulationResult, LedgerError> {
            unimplemented!("not exercised by vault cache tests")
        }
        async fn submit_transaction(&self, _signed_envelope_xdr: &str) -> Result<String, LedgerError> {
            unimplemented!("not exercised by vault cache tests")
        }
        async fn poll_transaction(&self, _tx_hash: &str) -> Result<TransactionOutcome, LedgerError> {
            unimplemented!("not exercised by vault cache tests")
        }
    }

    #[tokio::test]
    async fn reservation_reduces_available_without_touching_committed() {
        let ledger = Arc::new(FixedLedger {
            balance_stroops: AtomicI64::new(1_000_000_000),
            calls: AtomicI64::new(0),
        });
        let cache = VaultCache::new(ledger, Duration::from_secs(30));

        let available = cache.available("GA", "CBASE").await.unwrap();
        assert_eq!(available, dec!(100));

        cache.reserve("GA", "CBASE", dec!(40));
        let available = cache.available("GA", "CBASE").await.unwrap();
        assert_eq!(available, dec!(60));

        cache.release("GA", "CBASE", dec!(40));
        let available = cache.available("GA", "CBASE").await.unwrap();
        assert_eq!(available, dec!(100));
    }

    #[tokio::test]
    async fn cache_hit_does_not_call_the_ledger_again_within_ttl() {
        let ledger = Arc::new(FixedLedger {
            balance_stroops: AtomicI64::new(1_000_000_000),
            calls: AtomicI64::new(0),
        });
        let cache = VaultCache::new(ledger.clone(), Duration::from_secs(30));

        cache.available("GA", "CBASE").await.unwrap();
        cache.available("GA", "CBASE").await.unwrap();
        assert_eq!(ledger.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn over_release_clamps_reserved_at_zero() {
        let ledger = Arc::new(FixedLedger {
            balance_stroops: AtomicI64::new(1_000_000_000),
            calls: AtomicI64::new(0),
        });
        let cache = VaultCache::new(ledger, Duration::from_secs(30));
        cache.reserve("GA", "CBASE", dec!(10));
        cache.release("GA", "CBASE", dec!(999));
        let available = cache.available("GA", "CBASE").await.unwrap();
        assert_eq!(available, dec!(100));
    }

    #[tokio::test]
    async fn apply_delta_adjusts_committed_without_a_ledger_round_trip() {
        let ledger = Arc::new(FixedLedger {
            balance_stroops: AtomicI64::new(1_000_000_000),
            calls: AtomicI64::new(0),
        });
        let cache = VaultCache::new(ledger.clone(), Duration::from_secs(30));

        cache.available("GA", "CBASE").await.unwrap();
        cache.apply_delta("GA", "CBASE", dec!(-30));
        let available = cache.available("GA", "CBASE").await.unwrap();

        assert_eq!(available, dec!(70));
        assert_eq!(ledger.calls.load(Ordering::SeqCst), 1);
    }
}
