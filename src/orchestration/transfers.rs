use crate::chain::{abi, ChainLog, ChainReader};
use crate::db::CheckpointStore;
use crate::domain::{to_token_units, Decimal, ScaleError, TimeMs, TransferCheckpoint};
use crate::error::MonitorError;
use crate::metrics::Metrics;
use crate::registry::{Market, MarketRegistry};
use alloy::primitives::{Address, U256};
use std::sync::Arc;
use tracing::{debug, info};

/// Where a scan resumes relative to the checkpoint block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanBoundary {
    /// Rescan the checkpoint block; transfers in it are counted again.
    #[default]
    Inclusive,
    /// Start one block after the checkpoint.
    Exclusive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccumulationOutcome {
    /// First observation of the market; a zero checkpoint was stored.
    Initialized(TransferCheckpoint),
    /// Totals and cursor moved forward by the given amounts.
    Advanced {
        checkpoint: TransferCheckpoint,
        minted: Decimal,
        burnt: Decimal,
    },
}

impl AccumulationOutcome {
    pub fn checkpoint(&self) -> &TransferCheckpoint {
        match self {
            AccumulationOutcome::Initialized(cp) => cp,
            AccumulationOutcome::Advanced { checkpoint, .. } => checkpoint,
        }
    }
}

/// Incrementally sums OVL mints into and burns out of each market.
#[derive(Clone)]
pub struct TransferAccumulator {
    chain: ChainReader,
    store: Arc<dyn CheckpointStore>,
    registry: Arc<MarketRegistry>,
    token: Address,
    boundary: ScanBoundary,
}

impl TransferAccumulator {
    pub fn new(
        chain: ChainReader,
        store: Arc<dyn CheckpointStore>,
        registry: Arc<MarketRegistry>,
        token: Address,
        boundary: ScanBoundary,
    ) -> Self {
        Self {
            chain,
            store,
            registry,
            token,
            boundary,
        }
    }

    /// Advance the market's checkpoint to the current head.
    ///
    /// On any failure the stored checkpoint is left as it was.
    pub async fn accumulate(&self, market: &Market) -> Result<AccumulationOutcome, MonitorError> {
        let _guard = self.registry.lock_checkpoint(&market.symbol).await;

        let Some(current) = self.store.get_checkpoint(&market.symbol).await? else {
            let baseline = TransferCheckpoint::baseline(market.symbol.clone());
            self.store.upsert_checkpoint(&baseline).await?;
            info!(market = %market.symbol, "transfer checkpoint initialized");
            return Ok(AccumulationOutcome::Initialized(baseline));
        };

        let head = self
            .chain
            .block_number()
            .await
            .map_err(MonitorError::ChainQuery)?;
        let from = match self.boundary {
            ScanBoundary::Inclusive => current.last_block_number,
            ScanBoundary::Exclusive => current.last_block_number.saturating_add(1),
        };

        let (minted_raw, burnt_raw) = if from > head {
            (U256::ZERO, U256::ZERO)
        } else {
            let mints = self
                .chain
                .get_logs(&abi::mint_filter(self.token, market.address).up_to(head), from)
                .await
                .map_err(MonitorError::ChainQuery)?;
            let burns = self
                .chain
                .get_logs(&abi::burn_filter(self.token, market.address).up_to(head), from)
                .await
                .map_err(MonitorError::ChainQuery)?;
            (sum_amounts(&mints)?, sum_amounts(&burns)?)
        };

        let minted = to_token_units(minted_raw)?;
        let burnt = to_token_units(burnt_raw)?;
        let next = TransferCheckpoint {
            market: current.market.clone(),
            // A lagging node must not move the cursor backwards.
            last_block_number: current.last_block_number.max(head),
            total_minted: current
                .total_minted
                .checked_add(minted)
                .ok_or(ScaleError::OutOfRange(minted_raw))?,
            total_burnt: current
                .total_burnt
                .checked_add(burnt)
                .ok_or(ScaleError::OutOfRange(burnt_raw))?,
            updated_at: TimeMs::now(),
        };
        self.store.upsert_checkpoint(&next).await?;

        debug!(
            market = %market.symbol,
            from_block = from,
            block = next.last_block_number,
            minted = %minted,
            burnt = %burnt,
            "transfer checkpoint advanced"
        );
        Metrics::transfer_totals(
            market.symbol.as_str(),
            next.total_minted.to_f64_lossy(),
            next.total_burnt.to_f64_lossy(),
        );

        Ok(AccumulationOutcome::Advanced {
            checkpoint: next,
            minted,
            burnt,
        })
    }
}

fn sum_amounts(logs: &[ChainLog]) -> Result<U256, MonitorError> {
    logs.iter().try_fold(U256::ZERO, |acc, log| {
        let amount = abi::decode_transfer_amount(log).map_err(MonitorError::Decode)?;
        Ok(acc.saturating_add(amount))
    })
}
