pub mod client;
pub mod contract;

pub use client::{LedgerClient, LedgerError, PairConfig};
pub use contract::{ContractClient, SettlementInstruction, SettlementOutcome};
