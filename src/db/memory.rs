//! In-process store used when persistence is disabled.

use super::store::{CheckpointStore, SnapshotSink, StoreError};
use crate::domain::{
    BuildSnapshot, MarketSymbol, PositionHistogram, TransferCheckpoint, UPnLSnapshot,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tracing::info;

#[derive(Debug, Default)]
struct MemoryState {
    checkpoints: HashMap<MarketSymbol, TransferCheckpoint>,
    builds: Vec<BuildSnapshot>,
    build_keys: HashSet<String>,
    histograms: Vec<PositionHistogram>,
    upnls: Vec<UPnLSnapshot>,
    fail_writes: bool,
}

/// Keeps checkpoints and snapshots in memory and logs every document.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail until reset.
    pub fn fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    pub fn builds(&self) -> Vec<BuildSnapshot> {
        self.lock().builds.clone()
    }

    pub fn histograms(&self) -> Vec<PositionHistogram> {
        self.lock().histograms.clone()
    }

    pub fn upnls(&self) -> Vec<UPnLSnapshot> {
        self.lock().upnls.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn writable(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>, StoreError> {
        let state = self.lock();
        if state.fail_writes {
            return Err(StoreError::Unavailable("writes disabled".to_string()));
        }
        Ok(state)
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn get_checkpoint(
        &self,
        market: &MarketSymbol,
    ) -> Result<Option<TransferCheckpoint>, StoreError> {
        Ok(self.lock().checkpoints.get(market).cloned())
    }

    async fn upsert_checkpoint(&self, checkpoint: &TransferCheckpoint) -> Result<(), StoreError> {
        self.writable()?
            .checkpoints
            .insert(checkpoint.market.clone(), checkpoint.clone());
        info!(
            market = %checkpoint.market,
            block = checkpoint.last_block_number,
            minted = %checkpoint.total_minted,
            burnt = %checkpoint.total_burnt,
            "transfer checkpoint"
        );
        Ok(())
    }
}

#[async_trait]
impl SnapshotSink for MemoryStore {
    async fn record_build(&self, snapshot: &BuildSnapshot) -> Result<bool, StoreError> {
        let mut state = self.writable()?;
        if !state.build_keys.insert(snapshot.event_key.clone()) {
            return Ok(false);
        }
        state.builds.push(snapshot.clone());
        info!(
            market = %snapshot.market,
            block = snapshot.block_number,
            sender = %snapshot.sender,
            cap_oi = %snapshot.cap_oi,
            user_oi = %snapshot.user_oi,
            collateral = %snapshot.collateral_in_ovl,
            pct = %snapshot.percentage_of_cap_oi_bought,
            "build snapshot"
        );
        Ok(true)
    }

    async fn record_position_histogram(
        &self,
        histogram: &PositionHistogram,
    ) -> Result<(), StoreError> {
        self.writable()?.histograms.push(histogram.clone());
        info!(market = %histogram.market, counts = ?histogram.counts, "position histogram");
        Ok(())
    }

    async fn record_upnl(&self, snapshot: &UPnLSnapshot) -> Result<(), StoreError> {
        self.writable()?.upnls.push(snapshot.clone());
        info!(
            market = %snapshot.market,
            profit = %snapshot.total_unrealized_profit,
            loss = %snapshot.total_unrealized_loss,
            "upnl snapshot"
        );
        Ok(())
    }
}
