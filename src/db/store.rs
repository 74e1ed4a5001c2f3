use crate::domain::{
    BuildSnapshot, MarketSymbol, PositionHistogram, TransferCheckpoint, UPnLSnapshot,
};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Corrupt row in {table}: {message}")]
    Corrupt {
        table: &'static str,
        message: String,
    },
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Cannot create database directory {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Durable per-market transfer cursor.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn get_checkpoint(
        &self,
        market: &MarketSymbol,
    ) -> Result<Option<TransferCheckpoint>, StoreError>;

    /// Insert or replace the checkpoint of `checkpoint.market`.
    async fn upsert_checkpoint(&self, checkpoint: &TransferCheckpoint) -> Result<(), StoreError>;
}

/// Append-only sink for snapshot documents.
#[async_trait]
pub trait SnapshotSink: Send + Sync {
    /// Append a build snapshot.
    ///
    /// # Returns
    /// `false` if a snapshot with the same event key was already recorded.
    async fn record_build(&self, snapshot: &BuildSnapshot) -> Result<bool, StoreError>;

    async fn record_position_histogram(
        &self,
        histogram: &PositionHistogram,
    ) -> Result<(), StoreError>;

    async fn record_upnl(&self, snapshot: &UPnLSnapshot) -> Result<(), StoreError>;
}
