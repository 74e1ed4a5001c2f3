//! Immutable set of monitored markets, built once at startup.

use crate::domain::MarketSymbol;
use alloy::primitives::Address;
use std::collections::HashMap;
use tokio::sync::{Mutex, MutexGuard};

/// A monitored market: trading-pair symbol and contract address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Market {
    pub symbol: MarketSymbol,
    pub address: Address,
}

impl Market {
    pub fn new(symbol: impl Into<String>, address: Address) -> Self {
        Self {
            symbol: MarketSymbol::new(symbol),
            address,
        }
    }
}

#[derive(Debug)]
struct Entry {
    market: Market,
    checkpoint_lock: Mutex<()>,
}

/// Markets in configuration order, each with its checkpoint lock.
///
/// Shared by `Arc` between the scheduler and the reactor.
#[derive(Debug)]
pub struct MarketRegistry {
    entries: Vec<Entry>,
    by_symbol: HashMap<MarketSymbol, usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Duplicate market symbol: {0}")]
    DuplicateSymbol(MarketSymbol),
}

impl MarketRegistry {
    pub fn new(markets: Vec<Market>) -> Result<Self, RegistryError> {
        let mut by_symbol = HashMap::with_capacity(markets.len());
        let mut entries = Vec::with_capacity(markets.len());
        for (i, market) in markets.into_iter().enumerate() {
            if by_symbol.insert(market.symbol.clone(), i).is_some() {
                return Err(RegistryError::DuplicateSymbol(market.symbol));
            }
            entries.push(Entry {
                market,
                checkpoint_lock: Mutex::new(()),
            });
        }
        Ok(Self { entries, by_symbol })
    }

    pub fn get(&self, symbol: &MarketSymbol) -> Option<&Market> {
        self.by_symbol.get(symbol).map(|&i| &self.entries[i].market)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Market> {
        self.entries.iter().map(|e| &e.market)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialize checkpoint read-modify-write for one market.
    ///
    /// Returns `None` for unknown symbols.
    pub async fn lock_checkpoint(&self, symbol: &MarketSymbol) -> Option<MutexGuard<'_, ()>> {
        let i = *self.by_symbol.get(symbol)?;
        Some(self.entries[i].checkpoint_lock.lock().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn registry() -> MarketRegistry {
        MarketRegistry::new(vec![
            Market::new("WBTC/USD", Address::repeat_byte(0x01)),
            Market::new("ETH/USD", Address::repeat_byte(0x02)),
        ])
        .unwrap()
    }

    #[test]
    fn preserves_configuration_order() {
        let symbols: Vec<_> = registry()
            .iter()
            .map(|m| m.symbol.as_str().to_string())
            .collect();
        assert_eq!(symbols, vec!["WBTC/USD", "ETH/USD"]);
    }

    #[test]
    fn rejects_duplicate_symbols() {
        let result = MarketRegistry::new(vec![
            Market::new("WBTC/USD", Address::repeat_byte(0x01)),
            Market::new("WBTC/USD", Address::repeat_byte(0x02)),
        ]);
        assert_eq!(
            result.unwrap_err(),
            RegistryError::DuplicateSymbol(MarketSymbol::new("WBTC/USD"))
        );
    }

    #[test]
    fn lookup_by_symbol() {
        let reg = registry();
        let m = reg.get(&MarketSymbol::new("ETH/USD")).unwrap();
        assert_eq!(m.address, Address::repeat_byte(0x02));
        assert!(reg.get(&MarketSymbol::new("SOL/USD")).is_none());
    }

    #[tokio::test]
    async fn checkpoint_lock_is_exclusive_per_market() {
        let reg = Arc::new(registry());
        let wbtc = MarketSymbol::new("WBTC/USD");
        let eth = MarketSymbol::new("ETH/USD");

        let guard = reg.lock_checkpoint(&wbtc).await.unwrap();

        // Other markets are unaffected.
        let other = tokio::time::timeout(Duration::from_millis(50), reg.lock_checkpoint(&eth)).await;
        assert!(other.is_ok());

        let reg2 = reg.clone();
        let wbtc2 = wbtc.clone();
        let waiter = tokio::spawn(async move {
            let _g = reg2.lock_checkpoint(&wbtc2).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
    }
}
