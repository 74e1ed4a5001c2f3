//! Snapshot documents produced by the poll scheduler and the build reactor.

use super::{Decimal, MarketSymbol, TimeMs};
use alloy::primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Number of collateral histogram buckets.
pub const BUCKET_COUNT: usize = 5;

/// Per-market cursor and running mint/burn totals in token units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferCheckpoint {
    pub market: MarketSymbol,
    pub last_block_number: u64,
    pub total_burnt: Decimal,
    pub total_minted: Decimal,
    pub updated_at: TimeMs,
}

impl TransferCheckpoint {
    /// Zero-initialized baseline for a market seen for the first time.
    pub fn baseline(market: MarketSymbol) -> Self {
        Self {
            market,
            last_block_number: 0,
            total_burnt: Decimal::zero(),
            total_minted: Decimal::zero(),
            updated_at: TimeMs::now(),
        }
    }
}

/// Counts of open positions per collateral bucket, one document per cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionHistogram {
    pub id: Uuid,
    pub market: MarketSymbol,
    pub taken_at: TimeMs,
    pub counts: [u32; BUCKET_COUNT],
}

impl PositionHistogram {
    pub fn new(market: MarketSymbol, counts: [u32; BUCKET_COUNT]) -> Self {
        Self {
            id: Uuid::new_v4(),
            market,
            taken_at: TimeMs::now(),
            counts,
        }
    }

    pub fn total(&self) -> u32 {
        self.counts.iter().sum()
    }
}

/// Aggregate unrealized profit and loss of a market, in token units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UPnLSnapshot {
    pub id: Uuid,
    pub market: MarketSymbol,
    pub taken_at: TimeMs,
    pub total_unrealized_profit: Decimal,
    pub total_unrealized_loss: Decimal,
}

impl UPnLSnapshot {
    pub fn new(market: MarketSymbol, profit: Decimal, loss: Decimal) -> Self {
        Self {
            id: Uuid::new_v4(),
            market,
            taken_at: TimeMs::now(),
            total_unrealized_profit: profit,
            total_unrealized_loss: loss,
        }
    }
}

/// Point-in-time record of a newly built position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSnapshot {
    /// Stable dedup key, see [`BuildSnapshot::compute_event_key`].
    pub event_key: String,
    pub market: MarketSymbol,
    pub taken_at: TimeMs,
    pub block_number: u64,
    pub sender: Address,
    pub position_id: U256,
    /// Capacity in token units.
    pub cap_oi: Decimal,
    /// Position open interest in token units.
    pub user_oi: Decimal,
    pub collateral_in_ovl: Decimal,
    pub percentage_of_cap_oi_bought: Decimal,
}

impl BuildSnapshot {
    /// Compute a stable unique key for a Build event.
    ///
    /// Priority: `txhash:logindex` (if both present) > truncated SHA-256 of
    /// (market, sender, position id, user OI, block).
    pub fn compute_event_key(
        market: &MarketSymbol,
        sender: &Address,
        position_id: U256,
        user_oi: U256,
        block_number: u64,
        tx_hash: Option<B256>,
        log_index: Option<u64>,
    ) -> String {
        if let (Some(tx), Some(idx)) = (tx_hash, log_index) {
            return format!("{:#x}:{}", tx, idx);
        }

        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        for part in [
            market.as_str().to_string(),
            format!("{:#x}", sender),
            position_id.to_string(),
            user_oi.to_string(),
            block_number.to_string(),
        ] {
            hasher.update((part.len() as u64).to_be_bytes());
            hasher.update(part.as_bytes());
        }
        let digest = hasher.finalize();
        format!("h:{}", hex::encode(&digest[..16]))
    }
}
