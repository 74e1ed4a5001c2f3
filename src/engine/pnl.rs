//! Aggregate unrealized profit and loss over open positions.

use crate::domain::{to_token_units, Decimal, ScaleError};
use alloy::primitives::U256;

/// Current cost basis and mark value of one position, both raw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CostValuePair {
    pub cost: U256,
    pub value: U256,
}

impl CostValuePair {
    pub fn new(cost: U256, value: U256) -> Self {
        Self { cost, value }
    }
}

/// Market-wide unrealized PnL in token units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UnrealizedPnl {
    pub profit: Decimal,
    pub loss: Decimal,
}

impl UnrealizedPnl {
    /// Profit minus loss.
    pub fn net(&self) -> Decimal {
        self.profit - self.loss
    }
}

/// Net each pair's value against its cost and sum gains and losses apart.
///
/// Sums are taken on raw amounts and converted to token units once.
pub fn aggregate_pnl(pairs: &[CostValuePair]) -> Result<UnrealizedPnl, ScaleError> {
    let (profit, loss) = pairs
        .iter()
        .fold((U256::ZERO, U256::ZERO), |(profit, loss), pair| {
            if pair.value > pair.cost {
                (profit.saturating_add(pair.value - pair.cost), loss)
            } else {
                (profit, loss.saturating_add(pair.cost - pair.value))
            }
        });

    Ok(UnrealizedPnl {
        profit: to_token_units(profit)?,
        loss: to_token_units(loss)?,
    })
}
