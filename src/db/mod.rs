//! Persistence for checkpoints and snapshot documents.
//!
//! This module provides:
//! - The `CheckpointStore` and `SnapshotSink` seams used by the core
//! - SQLite initialization, pragmas and migrations
//! - `Repository` (SQLite) and `MemoryStore` (persistence disabled)

pub mod memory;
pub mod migrations;
pub mod repo;
pub mod store;

pub use memory::MemoryStore;
pub use migrations::init_db;
pub use repo::Repository;
pub use store::{CheckpointStore, SnapshotSink, StoreError};
