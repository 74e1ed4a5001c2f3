//! Domain types for market statistics.
//!
//! This module provides:
//! - Lossless numeric handling via Decimal wrapper
//! - The single 1e18 scale conversion point (`units`)
//! - Domain primitives: TimeMs, MarketSymbol, PositionRef
//! - Snapshot documents: checkpoints, histograms, uPnL and build records

pub mod decimal;
pub mod primitives;
pub mod snapshot;
pub mod units;

pub use decimal::Decimal;
pub use primitives::{MarketSymbol, PositionRef, TimeMs};
pub use snapshot::{BuildSnapshot, PositionHistogram, TransferCheckpoint, UPnLSnapshot, BUCKET_COUNT};
pub use units::{to_token_units, ScaleError};
