//! Pure computations over per-cycle position data.

pub mod bucketizer;
pub mod pnl;

pub use bucketizer::{bucketize, BUCKET_BOUNDS};
pub use pnl::{aggregate_pnl, CostValuePair, UnrealizedPnl};
