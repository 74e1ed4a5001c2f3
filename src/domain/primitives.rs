//! Domain primitives: TimeMs, MarketSymbol, PositionRef.

use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};

/// Time in milliseconds since Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeMs(pub i64);

impl TimeMs {
    /// Create a TimeMs from milliseconds.
    pub fn new(ms: i64) -> Self {
        TimeMs(ms)
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        TimeMs(chrono::Utc::now().timestamp_millis())
    }

    /// Get the underlying milliseconds value.
    pub fn as_ms(&self) -> i64 {
        self.0
    }
}

/// Market trading-pair symbol (e.g., "WBTC/USD").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MarketSymbol(pub String);

impl MarketSymbol {
    pub fn new(symbol: impl Into<String>) -> Self {
        MarketSymbol(symbol.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MarketSymbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A position referenced by its owner and on-chain id within a market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PositionRef {
    pub owner: Address,
    pub position_id: U256,
}

impl PositionRef {
    pub fn new(owner: Address, position_id: U256) -> Self {
        Self { owner, position_id }
    }
}
