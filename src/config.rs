//! Process configuration, loaded once at startup.

use std::time::Duration;

use serde::Deserialize;

use crate::matching::types::SelfTradePolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Contract address the engine talks to; the traded pair is derived
    /// from its reported `token_a`/`token_b` configuration at startup.
    pub settlement_contract_id: String,
    /// Engine's Ed25519 signing key (hex-encoded 32-byte seed) used to
    /// authorise `settle_trade` calls.
    pub matching_engine_signing_key: String,
    pub soroban_rpc_url: String,
    /// Domain separator folded into every signed envelope and settlement
    /// transaction.
    pub network_passphrase: String,
    #[serde(default = "default_rest_port")]
    pub rest_port: u16,
    #[serde(default = "default_balance_cache_ttl_seconds")]
    pub balance_cache_ttl_seconds: u64,
    #[serde(default = "default_settlement_timeout_seconds")]
    pub settlement_timeout_seconds: u64,
    #[serde(default)]
    pub self_trade_policy: SelfTradePolicy,
    #[serde(default = "default_admission_rpc_timeout_ms")]
    pub admission_rpc_timeout_ms: u64,
    #[serde(default = "default_orderbook_snapshot_depth")]
    pub orderbook_snapshot_depth: usize,
}

fn default_rest_port() -> u16 {
    8080
}

fn default_balance_cache_ttl_seconds() -> u64 {
    30
}

fn default_settlement_timeout_seconds() -> u64 {
    30
}

fn default_admission_rpc_timeout_ms() -> u64 {
    5_000
}

fn default_orderbook_snapshot_depth() -> usize {
    20
}

impl AppConfig {
    /// Layers environment variables (via `dotenvy`-populated process env)
    /// over the crate's defaults using the `config` crate, the way the
    /// teacher service loads its own `AppConfig`.
    pub fn load() -> anyhow::Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::Environment::default().separator("__"));

        let raw = builder.build()?;
        let cfg: Self = raw.try_deserialize()?;
        Ok(cfg)
    }

    pub fn balance_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.balance_cache_ttl_seconds)
    }

    pub fn settlement_timeout(&self) -> Duration {
        Duration::from_secs(self.settlement_timeout_seconds)
    }

    pub fn admission_rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.admission_rpc_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_env_omits_optional_keys() {
        std::env::set_var("SETTLEMENT_CONTRACT_ID", "CCONTRACT");
        std::env::set_var("MATCHING_ENGINE_SIGNING_KEY", "deadbeef");
        std::env::set_var("SOROBAN_RPC_URL", "https://rpc.example.org");
        std::env::set_var("NETWORK_PASSPHRASE", "Test SDF Network ; September 2015");
        std::env::remove_var("REST_PORT");

        let cfg = AppConfig::load().expect("config should load from env");
        assert_eq!(cfg.rest_port, default_rest_port());
        assert_eq!(cfg.balance_cache_ttl_seconds, 30);
    }
}
