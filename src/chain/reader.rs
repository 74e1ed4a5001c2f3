use super::{ChainAccess, ChainError, ChainLog, LogFilter};
use alloy::primitives::{Address, Bytes};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Shared chain handle that bounds every call with a timeout.
///
/// Cheap to clone; the scheduler and every reactor task hold one.
#[derive(Debug, Clone)]
pub struct ChainReader {
    inner: Arc<dyn ChainAccess>,
    timeout: Duration,
}

impl ChainReader {
    pub fn new(inner: Arc<dyn ChainAccess>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub async fn get_logs(
        &self,
        filter: &LogFilter,
        from_block: u64,
    ) -> Result<Vec<ChainLog>, ChainError> {
        debug!(address = %filter.address, from_block, to_block = ?filter.to_block, "eth_getLogs");
        self.bounded("eth_getLogs", self.inner.get_logs(filter, from_block))
            .await
    }

    pub async fn call(&self, to: Address, calldata: Bytes) -> Result<Bytes, ChainError> {
        self.bounded("eth_call", self.inner.call(to, calldata)).await
    }

    pub async fn batch_call(
        &self,
        calls: Vec<(Address, Bytes)>,
    ) -> Result<Vec<Bytes>, ChainError> {
        debug!(calls = calls.len(), "batched eth_call");
        self.bounded("batch eth_call", self.inner.batch_call(calls))
            .await
    }

    pub async fn block_number(&self) -> Result<u64, ChainError> {
        self.bounded("eth_blockNumber", self.inner.block_number())
            .await
    }

    async fn bounded<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = Result<T, ChainError>>,
    ) -> Result<T, ChainError> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(ChainError::Timeout {
                op,
                after_ms: self.timeout.as_millis() as u64,
            }),
        }
    }
}
