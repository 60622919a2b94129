//! Domain-level wrapper around [`LedgerClient`]: builds `settle_trade`
//! invocations, drives the simulate/sign/submit/poll pipeline with bounded
//! retry and an overall timeout, and classifies failures the way C5 needs
//! to choose between retrying and compensating.

use std::time::Duration;

use ed25519_dalek::{Signer, SigningKey};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use super::client::{LedgerClient, LedgerError, PairConfig, TransactionOutcome};

/// Stroop scaling factor: the ledger's smallest integer unit per whole
/// token, matching the same factor `matching::types::PRICE_SCALE` uses for
/// price levels.
pub const STROOP_SCALE: i64 = 10_000_000;

#[derive(Debug, Clone)]
pub struct SettlementInstruction {
    pub trade_id: [u8; 32],
    pub buy_account: String,
    pub sell_account: String,
    pub base_token: String,
    pub quote_token: String,
    pub base_amount_stroops: i128,
    pub quote_amount_stroops: i128,
    pub timestamp: i64,
}

impl SettlementInstruction {
    pub fn build(
        trade_id: [u8; 32],
        buy_account: String,
        sell_account: String,
        base_token: String,
        quote_token: String,
        price: Decimal,
        quantity: Decimal,
        timestamp: i64,
    ) -> Self {
        let base_amount = (quantity * Decimal::from(STROOP_SCALE))
            .round()
            .to_i128()
            .expect("base amount fits in i128 stroops");
        let quote_amount = (quantity * price * Decimal::from(STROOP_SCALE))
            .round()
            .to_i128()
            .expect("quote amount fits in i128 stroops");

        Self {
            trade_id,
            buy_account,
            sell_account,
            base_token,
            quote_token,
            base_amount_stroops: base_amount,
            quote_amount_stroops: quote_amount,
            timestamp,
        }
    }

    /// Placeholder XDR-shaped invocation payload. The real contract
    /// envelope format is out of scope (spec treats the ledger's
    /// transaction envelope as a black-box collaborator); this crate only
    /// needs a stable string to pass through simulate/sign/submit.
    fn invocation_payload(&self) -> String {
        format!(
            "settle_trade({},{},{},{},{},{},{})",
            hex::encode(self.trade_id),
            self.buy_account,
            self.sell_account,
            self.base_token,
            self.quote_token,
            self.base_amount_stroops,
            self.quote_amount_stroops
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementFailureKind {
    InsufficientVaultBalance,
    UnauthorizedMatcher,
    Revoked,
    NetworkError,
    Timeout,
}

#[derive(Debug, Clone)]
pub enum SettlementOutcome {
    Success { tx_id: String },
    Failed(SettlementFailureKind),
}

fn classify(err: &LedgerError) -> SettlementFailureKind {
    match err {
        LedgerError::Timeout => SettlementFailureKind::Timeout,
        LedgerError::Network(_) => SettlementFailureKind::NetworkError,
        LedgerError::ContractError(msg) => {
            let lower = msg.to_lowercase();
            if lower.contains("balance") {
                SettlementFailureKind::InsufficientVaultBalance
            } else if lower.contains("matcher") || lower.contains("unauthorized") {
                SettlementFailureKind::UnauthorizedMatcher
            } else if lower.contains("revoke") {
                SettlementFailureKind::Revoked
            } else {
                SettlementFailureKind::NetworkError
            }
        }
        LedgerError::InvalidResponse(_) => SettlementFailureKind::NetworkError,
    }
}

pub struct ContractClient {
    ledger: std::sync::Arc<dyn LedgerClient>,
    signing_key: SigningKey,
    settlement_timeout: Duration,
    max_retries: u32,
}

impl ContractClient {
    pub fn new(
        ledger: std::sync::Arc<dyn LedgerClient>,
        signing_key: SigningKey,
        settlement_timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            signing_key,
            settlement_timeout,
            max_retries: 4,
        }
    }

    pub async fn get_balance(&self, account: &str, token: &str) -> Result<i128, LedgerError> {
        self.ledger.get_balance(account, token).await
    }

    pub async fn get_pair_config(&self) -> Result<PairConfig, LedgerError> {
        self.ledger.get_pair_config().await
    }

    /// Runs the simulate -> apply transaction-data -> sign -> submit -> poll
    /// pipeline for one trade, bounded by `settlement_timeout` overall and
    /// retrying transient network/timeout failures with exponential
    /// backoff. Contract-level rejections (insufficient balance,
    /// unauthorized matcher, revoked access) are not retried.
    pub async fn settle_trade(&self, instruction: &SettlementInstruction) -> SettlementOutcome {
        let pipeline = tokio::time::timeout(self.settlement_timeout, self.run_pipeline(instruction));
        match pipeline.await {
            Ok(outcome) => outcome,
            Err(_) => SettlementOutcome::Failed(SettlementFailureKind::Timeout),
        }
    }

    async fn run_pipeline(&self, instruction: &SettlementInstruction) -> SettlementOutcome {
        let mut attempt = 0u32;
        loop {
            match self.try_once(instruction).await {
                Ok(tx_id) => return SettlementOutcome::Success { tx_id },
                Err(err) => {
                    let kind = classify(&err);
                    let retryable = matches!(
                        kind,
                        SettlementFailureKind::NetworkError | SettlementFailureKind::Timeout
                    );
                    tracing::warn!(trade_id = %hex::encode(instruction.trade_id), error = %err, attempt, "settlement attempt failed");
                    attempt += 1;
                    if !retryable || attempt >= self.max_retries {
                        return SettlementOutcome::Failed(kind);
                    }
                    let backoff = Duration::from_millis(100 * 2u64.pow(attempt));
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    async fn try_once(&self, instruction: &SettlementInstruction) -> Result<String, LedgerError> {
        let payload = instruction.invocation_payload();

        tracing::debug!(trade_id = %hex::encode(instruction.trade_id), "simulating settlement");
        let simulation = self.ledger.simulate_settle_trade(&payload).await?;

        let prepared = match simulation.transaction_data {
            Some(data) => format!("{payload}|{data}"),
            None => payload,
        };

        tracing::debug!(trade_id = %hex::encode(instruction.trade_id), "signing settlement");
        let signature = self.signing_key.sign(prepared.as_bytes());
        let signed_envelope = format!("{prepared}|sig={}", hex::encode(signature.to_bytes()));

        tracing::debug!(trade_id = %hex::encode(instruction.trade_id), "submitting settlement");
        let tx_hash = self.ledger.submit_transaction(&signed_envelope).await?;

        self.poll_until_terminal(&tx_hash).await?;
        Ok(tx_hash)
    }

    async fn poll_until_terminal(&self, tx_hash: &str) -> Result<(), LedgerError> {
        const POLL_INTERVAL: Duration = Duration::from_millis(250);
        const MAX_POLLS: u32 = 40;

        for _ in 0..MAX_POLLS {
            match self.ledger.poll_transaction(tx_hash).await? {
                TransactionOutcome::Success => return Ok(()),
                TransactionOutcome::Failed => {
                    return Err(LedgerError::ContractError("transaction failed on-chain".into()))
                }
                TransactionOutcome::Pending => tokio::time::sleep(POLL_INTERVAL).await,
            }
        }
        Err(LedgerError::Timeout)
    }
}
