pub mod engine;
pub mod orderbook;
pub mod types;
pub mod vault_cache;

pub use engine::{EngineStats, MatchingEngine, SubmitOutcome};
pub use orderbook::{OrderBook, OrderBookSnapshot};
pub use types::SelfTradePolicy;
pub use vault_cache::VaultCache;
