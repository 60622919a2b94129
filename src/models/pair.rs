//! Asset pair types.
//!
//! An asset pair is accepted at the API boundary as a pair of short
//! symbolic token strings (e.g. `"XLM"`/`"USDC"`) and resolved once, at
//! startup, to the contract's on-chain token addresses. Everywhere past
//! admission the resolved form is what flows through the engine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Asset pair as accepted from a client: symbolic, unresolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetPair {
    pub base: String,
    pub quote: String,
}

impl AssetPair {
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            quote: quote.into(),
        }
    }
}

impl fmt::Display for AssetPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

/// A pair resolved against the contract's reported token configuration.
///
/// The engine only ever matches and settles in terms of this form; the
/// symbolic `AssetPair` exists solely to let clients address a market by
/// name and to round-trip through the signed order envelope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedPair {
    pub symbolic: AssetPair,
    pub base_address: String,
    pub quote_address: String,
}
