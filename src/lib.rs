pub mod api;
pub mod chain;
pub mod config;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod orchestration;
pub mod registry;

pub use chain::{ChainAccess, ChainError, ChainReader, MockChain, RpcChain};
pub use config::{Config, PersistenceMode};
pub use db::{init_db, MemoryStore, Repository};
pub use domain::{
    BuildSnapshot, Decimal, MarketSymbol, PositionHistogram, PositionRef, TimeMs,
    TransferCheckpoint, UPnLSnapshot,
};
pub use error::MonitorError;
pub use metrics::Metrics;
pub use registry::{Market, MarketRegistry};
