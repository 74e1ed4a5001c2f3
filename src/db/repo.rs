//! Repository layer for database operations.

use super::store::{CheckpointStore, SnapshotSink, StoreError};
use crate::domain::{
    BuildSnapshot, Decimal, MarketSymbol, PositionHistogram, TimeMs, TransferCheckpoint,
    UPnLSnapshot, BUCKET_COUNT,
};
use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use uuid::Uuid;

/// Repository for database operations.
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    /// Build snapshots of a market in block order.
    ///
    /// # Errors
    /// Returns an error if the query fails or a row cannot be parsed.
    pub async fn list_builds(
        &self,
        market: &MarketSymbol,
    ) -> Result<Vec<BuildSnapshot>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT event_key, market, taken_at, block_number, sender, position_id,
                   cap_oi, user_oi, collateral_in_ovl, percentage_of_cap_oi_bought
            FROM builds
            WHERE market = ?
            ORDER BY block_number ASC, id ASC
            "#,
        )
        .bind(market.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(build_from_row).collect()
    }

    /// Most recent histogram of a market, if any.
    ///
    /// # Errors
    /// Returns an error if the query fails or a row cannot be parsed.
    pub async fn latest_position_histogram(
        &self,
        market: &MarketSymbol,
    ) -> Result<Option<PositionHistogram>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, market, taken_at, bucket_0_10, bucket_10_20, bucket_20_100,
                   bucket_100_500, bucket_500_1000
            FROM positions
            WHERE market = ?
            ORDER BY taken_at DESC, rowid DESC
            LIMIT 1
            "#,
        )
        .bind(market.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| -> Result<PositionHistogram, StoreError> {
            let mut counts = [0u32; BUCKET_COUNT];
            for (i, column) in [
                "bucket_0_10",
                "bucket_10_20",
                "bucket_20_100",
                "bucket_100_500",
                "bucket_500_1000",
            ]
            .iter()
            .enumerate()
            {
                let n: i64 = r.get(*column);
                counts[i] = u32::try_from(n).map_err(|_| corrupt("positions", column, n))?;
            }
            Ok(PositionHistogram {
                id: parse_uuid("positions", &r)?,
                market: MarketSymbol::new(r.get::<String, _>("market")),
                taken_at: TimeMs::new(r.get("taken_at")),
                counts,
            })
        })
        .transpose()
    }

    /// Most recent uPnL snapshot of a market, if any.
    ///
    /// # Errors
    /// Returns an error if the query fails or a row cannot be parsed.
    pub async fn latest_upnl(
        &self,
        market: &MarketSymbol,
    ) -> Result<Option<UPnLSnapshot>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, market, taken_at, total_unrealized_profit, total_unrealized_loss
            FROM upnls
            WHERE market = ?
            ORDER BY taken_at DESC, rowid DESC
            LIMIT 1
            "#,
        )
        .bind(market.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| -> Result<UPnLSnapshot, StoreError> {
            Ok(UPnLSnapshot {
                id: parse_uuid("upnls", &r)?,
                market: MarketSymbol::new(r.get::<String, _>("market")),
                taken_at: TimeMs::new(r.get("taken_at")),
                total_unrealized_profit: parse_decimal("upnls", &r, "total_unrealized_profit")?,
                total_unrealized_loss: parse_decimal("upnls", &r, "total_unrealized_loss")?,
            })
        })
        .transpose()
    }

    /// Number of rows in a snapshot table for a market.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn count_rows(
        &self,
        table: SnapshotTable,
        market: &MarketSymbol,
    ) -> Result<i64, StoreError> {
        let sql = match table {
            SnapshotTable::Builds => "SELECT COUNT(*) FROM builds WHERE market = ?",
            SnapshotTable::Positions => "SELECT COUNT(*) FROM positions WHERE market = ?",
            SnapshotTable::Upnls => "SELECT COUNT(*) FROM upnls WHERE market = ?",
        };
        let (count,): (i64,) = sqlx::query_as(sql)
            .bind(market.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

/// Append-only snapshot tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotTable {
    Builds,
    Positions,
    Upnls,
}

#[async_trait]
impl CheckpointStore for Repository {
    async fn get_checkpoint(
        &self,
        market: &MarketSymbol,
    ) -> Result<Option<TransferCheckpoint>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT market, last_block_number, total_burnt, total_minted, updated_at
            FROM transfers
            WHERE market = ?
            "#,
        )
        .bind(market.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| -> Result<TransferCheckpoint, StoreError> {
            let block: i64 = r.get("last_block_number");
            Ok(TransferCheckpoint {
                market: MarketSymbol::new(r.get::<String, _>("market")),
                last_block_number: u64::try_from(block)
                    .map_err(|_| corrupt("transfers", "last_block_number", block))?,
                total_burnt: parse_decimal("transfers", &r, "total_burnt")?,
                total_minted: parse_decimal("transfers", &r, "total_minted")?,
                updated_at: TimeMs::new(r.get("updated_at")),
            })
        })
        .transpose()
    }

    async fn upsert_checkpoint(&self, checkpoint: &TransferCheckpoint) -> Result<(), StoreError> {
        let block = to_sql_block("transfers", checkpoint.last_block_number)?;
        sqlx::query(
            r#"
            INSERT INTO transfers (market, last_block_number, total_burnt, total_minted, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(market) DO UPDATE SET
                last_block_number = excluded.last_block_number,
                total_burnt = excluded.total_burnt,
                total_minted = excluded.total_minted,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(checkpoint.market.as_str())
        .bind(block)
        .bind(checkpoint.total_burnt.to_canonical_string())
        .bind(checkpoint.total_minted.to_canonical_string())
        .bind(checkpoint.updated_at.as_ms())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl SnapshotSink for Repository {
    async fn record_build(&self, snapshot: &BuildSnapshot) -> Result<bool, StoreError> {
        let block = to_sql_block("builds", snapshot.block_number)?;
        let result = sqlx::query(
            r#"
            INSERT INTO builds (
                event_key, market, taken_at, block_number, sender, position_id,
                cap_oi, user_oi, collateral_in_ovl, percentage_of_cap_oi_bought
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(event_key) DO NOTHING
            "#,
        )
        .bind(snapshot.event_key.as_str())
        .bind(snapshot.market.as_str())
        .bind(snapshot.taken_at.as_ms())
        .bind(block)
        .bind(format!("{:#x}", snapshot.sender))
        .bind(snapshot.position_id.to_string())
        .bind(snapshot.cap_oi.to_canonical_string())
        .bind(snapshot.user_oi.to_canonical_string())
        .bind(snapshot.collateral_in_ovl.to_canonical_string())
        .bind(snapshot.percentage_of_cap_oi_bought.to_canonical_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_position_histogram(
        &self,
        histogram: &PositionHistogram,
    ) -> Result<(), StoreError> {
        let [b0, b1, b2, b3, b4] = histogram.counts;
        sqlx::query(
            r#"
            INSERT INTO positions (
                id, market, taken_at, bucket_0_10, bucket_10_20, bucket_20_100,
                bucket_100_500, bucket_500_1000
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(histogram.id.to_string())
        .bind(histogram.market.as_str())
        .bind(histogram.taken_at.as_ms())
        .bind(i64::from(b0))
        .bind(i64::from(b1))
        .bind(i64::from(b2))
        .bind(i64::from(b3))
        .bind(i64::from(b4))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_upnl(&self, snapshot: &UPnLSnapshot) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO upnls (id, market, taken_at, total_unrealized_profit, total_unrealized_loss)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(snapshot.id.to_string())
        .bind(snapshot.market.as_str())
        .bind(snapshot.taken_at.as_ms())
        .bind(snapshot.total_unrealized_profit.to_canonical_string())
        .bind(snapshot.total_unrealized_loss.to_canonical_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn build_from_row(r: &SqliteRow) -> Result<BuildSnapshot, StoreError> {
    let sender: String = r.get("sender");
    let position_id: String = r.get("position_id");
    let block: i64 = r.get("block_number");

    Ok(BuildSnapshot {
        event_key: r.get("event_key"),
        market: MarketSymbol::new(r.get::<String, _>("market")),
        taken_at: TimeMs::new(r.get("taken_at")),
        block_number: u64::try_from(block).map_err(|_| corrupt("builds", "block_number", block))?,
        sender: Address::from_str(&sender).map_err(|_| corrupt("builds", "sender", &sender))?,
        position_id: U256::from_str(&position_id)
            .map_err(|_| corrupt("builds", "position_id", &position_id))?,
        cap_oi: parse_decimal("builds", r, "cap_oi")?,
        user_oi: parse_decimal("builds", r, "user_oi")?,
        collateral_in_ovl: parse_decimal("builds", r, "collateral_in_ovl")?,
        percentage_of_cap_oi_bought: parse_decimal("builds", r, "percentage_of_cap_oi_bought")?,
    })
}

fn parse_decimal(table: &'static str, r: &SqliteRow, column: &str) -> Result<Decimal, StoreError> {
    let s: String = r.get(column);
    Decimal::from_str_canonical(&s).map_err(|_| corrupt(table, column, &s))
}

fn parse_uuid(table: &'static str, r: &SqliteRow) -> Result<Uuid, StoreError> {
    let s: String = r.get("id");
    Uuid::parse_str(&s).map_err(|_| corrupt(table, "id", &s))
}

fn to_sql_block(table: &'static str, block: u64) -> Result<i64, StoreError> {
    i64::try_from(block).map_err(|_| corrupt(table, "block_number", block))
}

fn corrupt(table: &'static str, column: &str, value: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt {
        table,
        message: format!("invalid {} value {}", column, value),
    }
}
