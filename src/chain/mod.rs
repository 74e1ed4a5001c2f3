//! Chain access abstraction: historical logs, read-only calls, batched calls,
//! and block height.

use alloy::primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use std::fmt;

pub mod abi;
pub mod mock;
pub mod reader;
pub mod rpc;

pub use mock::MockChain;
pub use reader::ChainReader;
pub use rpc::RpcChain;

/// Filter for historical event logs emitted by one contract.
///
/// `topics[i] == None` matches any value at position `i`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    pub address: Address,
    pub topics: Vec<Option<B256>>,
    /// Inclusive upper bound; `None` means the chain head.
    pub to_block: Option<u64>,
}

impl LogFilter {
    pub fn new(address: Address, topics: Vec<Option<B256>>) -> Self {
        Self {
            address,
            topics,
            to_block: None,
        }
    }

    pub fn up_to(mut self, block: u64) -> Self {
        self.to_block = Some(block);
        self
    }

    /// Whether a log satisfies this filter (block range excluded).
    pub fn matches(&self, log: &ChainLog) -> bool {
        if log.address != self.address {
            return false;
        }
        self.topics.iter().enumerate().all(|(i, wanted)| match wanted {
            None => true,
            Some(topic) => log.topics.get(i) == Some(topic),
        })
    }
}

/// A historical event log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: u64,
    pub transaction_hash: Option<B256>,
    pub log_index: Option<u64>,
}

/// Read-only access to an EVM chain.
///
/// Implementations must be safe for concurrent use; independent batches carry
/// no ordering guarantee relative to each other.
#[async_trait]
pub trait ChainAccess: Send + Sync + fmt::Debug {
    /// Fetch logs matching `filter` from `from_block` (inclusive).
    async fn get_logs(&self, filter: &LogFilter, from_block: u64)
        -> Result<Vec<ChainLog>, ChainError>;

    /// Execute a read-only call against `to` and return the raw return data.
    async fn call(&self, to: Address, calldata: Bytes) -> Result<Bytes, ChainError>;

    /// Execute many read-only calls in one round trip.
    ///
    /// # Returns
    /// Return data in the same order as `calls`.
    async fn batch_call(&self, calls: Vec<(Address, Bytes)>) -> Result<Vec<Bytes>, ChainError>;

    /// Current chain height.
    async fn block_number(&self) -> Result<u64, ChainError>;
}

/// Error type for chain access operations.
#[derive(Debug, Clone)]
pub enum ChainError {
    /// Network error (e.g., connection refused, DNS failure)
    NetworkError(String),
    /// HTTP error (e.g., 5xx from the RPC gateway)
    HttpError { status: u16, message: String },
    /// JSON-RPC error object returned by the node
    RpcError { code: i64, message: String },
    /// Malformed or undecodable response
    ParseError(String),
    /// Rate limit exceeded
    RateLimited,
    /// The call did not complete within the configured bound
    Timeout { op: &'static str, after_ms: u64 },
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            ChainError::HttpError { status, message } => {
                write!(f, "HTTP error {}: {}", status, message)
            }
            ChainError::RpcError { code, message } => write!(f, "RPC error {}: {}", code, message),
            ChainError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            ChainError::RateLimited => write!(f, "Rate limited"),
            ChainError::Timeout { op, after_ms } => {
                write!(f, "Timed out after {}ms: {}", after_ms, op)
            }
        }
    }
}

impl std::error::Error for ChainError {}
