//! Transport to the ledger's JSON-RPC endpoint (Soroban RPC). The engine
//! only ever calls `get_balance` and `settle_trade`'s supporting
//! simulate/submit/poll primitives — `deposit`/`withdraw`/
//! `set_matching_engine` are administrative bootstrap operations, out of
//! scope here.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger rpc network error: {0}")]
    Network(String),
    #[error("ledger rpc timed out")]
    Timeout,
    #[error("ledger rpc returned an unexpected response: {0}")]
    InvalidResponse(String),
    #[error("contract rejected the call: {0}")]
    ContractError(String),
}

#[derive(Debug, Clone)]
pub struct SimulationResult {
    pub transaction_data: Option<String>,
    pub min_resource_fee: i64,
}

/// The contract's reported trading-pair configuration: both the symbolic
/// name a client addresses the market by and the on-chain address the
/// engine actually reserves and settles against. Queried once at startup
/// (spec.md §4.4 point 4) — additional pairs are rejected, never resolved
/// mid-process.
#[derive(Debug, Clone)]
pub struct PairConfig {
    pub base_symbol: String,
    pub base_address: String,
    pub quote_symbol: String,
    pub quote_address: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionOutcome {
    Success,
    Failed,
    Pending,
}

/// Everything the matching core needs from the ledger's RPC transport,
/// abstracted behind a trait so settlement and admission tests can run
/// against a deterministic in-memory double instead of a live network.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn get_balance(&self, account: &str, token: &str) -> Result<i128, LedgerError>;

    async fn get_pair_config(&self) -> Result<PairConfig, LedgerError>;

    async fn simulate_settle_trade(&self, invocation_xdr: &str) -> Result<SimulationResult, LedgerError>;

    /// Submits a signed transaction envelope, returning its hash.
    async fn submit_transaction(&self, signed_envelope_xdr: &str) -> Result<String, LedgerError>;

    async fn poll_transaction(&self, tx_hash: &str) -> Result<TransactionOutcome, LedgerError>;
}

/// Minimal JSON-RPC 2.0 envelope, matching the Soroban RPC wire format.
#[derive(Debug, Serialize)]
struct RpcRequest<'a, P: Serialize> {
    jsonrpc: &'a str,
    id: u64,
    method: &'a str,
    params: P,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<R> {
    result: Option<R>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    message: String,
}

pub struct HttpLedgerClient {
    http: reqwest::Client,
    rpc_url: String,
    contract_id: String,
}

impl HttpLedgerClient {
    pub fn new(rpc_url: String, contract_id: String, request_timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .expect("reqwest client builds with a fixed timeout");
        Self {
            http,
            rpc_url,
            contract_id,
        }
    }

    async fn call<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        params: P,
    ) -> Result<R, LedgerError> {
        let body = RpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method,
            params,
        };

        let resp = self
            .http
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LedgerError::Timeout
                } else {
                    LedgerError::Network(e.to_string())
                }
            })?;

        let parsed: RpcResponse<R> = resp
            .json()
            .await
            .map_err(|e| LedgerError::InvalidResponse(e.to_string()))?;

        if let Some(err) = parsed.error {
            return Err(LedgerError::ContractError(err.message));
        }
        parsed
            .result
            .ok_or_else(|| LedgerError::InvalidResponse("missing result field".into()))
    }
}

#[async_trait]
impl LedgerClient for HttpLedgerClient {
    async fn get_balance(&self, account: &str, token: &str) -> Result<i128, LedgerError> {
        #[derive(Serialize)]
        struct Params<'a> {
            contract: &'a str,
            account: &'a str,
            token: &'a str,
        }
        #[derive(Deserialize)]
        struct Balance {
            balance: String,
        }
        let balance: Balance = self
            .call(
                "getBalance",
                Params {
                    contract: &self.contract_id,
                    account,
                    token,
                },
            )
            .await?;
        balance
            .balance
            .parse()
            .map_err(|_| LedgerError::InvalidResponse("non-integer balance".into()))
    }

    async fn get_pair_config(&self) -> Result<PairConfig, LedgerError> {
        #[derive(Serialize)]
        struct Params<'a> {
            contract: &'a str,
        }
        #[derive(Deserialize)]
        struct Pair {
            token_a_symbol: String,
            token_a_address: String,
            token_b_symbol: String,
            token_b_address: String,
        }
        let pair: Pair = self
            .call(
                "getContractConfig",
                Params {
                    contract: &self.contract_id,
                },
            )
            .await?;
        Ok(PairConfig {
            base_symbol: pair.token_a_symbol,
            base_address: pair.token_a_address,
            quote_symbol: pair.token_b_symbol,
            quote_address: pair.token_b_address,
        })
    }

    async fn simulate_settle_trade(
        &self,
        invocation_xdr: &str,
    ) -> Result<SimulationResult, LedgerError> {
        #[derive(Serialize)]
        struct Params<'a> {
            transaction: &'a str,
        }
        #[derive(Deserialize)]
        struct Sim {
            transaction_data: Option<String>,
            min_resource_fee: i64,
        }
        let sim: Sim = self
            .call(
                "simulateTransaction",
                Params {
                    transaction: invocation_xdr,
                },
            )
            .await?;
        Ok(SimulationResult {
            transaction_data: sim.transaction_data,
            min_resource_fee: sim.min_resource_fee,
        })
    }

    async fn submit_transaction(&self, signed_envelope_xdr: &str) -> Result<String, LedgerError> {
        #[derive(Serialize)]
        struct Params<'a> {
            transaction: &'a str,
        }
        #[derive(Deserialize)]
        struct Submitted {
            hash: String,
        }
        let submitted: Submitted = self
            .call(
                "sendTransaction",
                Params {
                    transaction: signed_envelope_xdr,
                },
            )
            .await?;
        Ok(submitted.hash)
    }

    async fn poll_transaction(&self, tx_hash: &str) -> Result<TransactionOutcome, LedgerError> {
        #[derive(Serialize)]
        struct Params<'a> {
            hash: &'a str,
        }
        #[derive(Deserialize)]
        struct Status {
            status: String,
        }
        let status: Status = self
            .call("getTransaction", Params { hash: tx_hash })
            .await?;
        Ok(match status.status.as_str() {
            "SUCCESS" => TransactionOutcome::Success,
            "FAILED" => TransactionOutcome::Failed,
            _ => TransactionOutcome::Pending,
        })
    }
}
