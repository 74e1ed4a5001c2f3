//! Mock chain for testing without network calls.

use super::abi::{self, Build, Transfer};
use super::{ChainAccess, ChainError, ChainLog, LogFilter};
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Default)]
struct MockState {
    logs: Vec<ChainLog>,
    responses: HashMap<(Address, Bytes), Bytes>,
    block_number: u64,
    fail_logs: bool,
    fail_block_number: bool,
    fail_batches: bool,
    delay: Option<Duration>,
    get_logs_calls: usize,
    batch_calls: usize,
    next_log_index: u64,
}

/// Mock chain that serves predefined logs and call results.
///
/// Calls without a configured response fail like a reverted `eth_call`.
#[derive(Debug, Default)]
pub struct MockChain {
    state: Mutex<MockState>,
}

impl MockChain {
    /// Create a new mock chain at block 0 with no logs.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_block_number(self, block: u64) -> Self {
        self.set_block_number(block);
        self
    }

    pub fn with_log(self, log: ChainLog) -> Self {
        self.push_log(log);
        self
    }

    pub fn with_uint_response(self, to: Address, calldata: Bytes, value: U256) -> Self {
        self.set_uint_response(to, calldata, value);
        self
    }

    pub fn with_response(self, to: Address, calldata: Bytes, ret: Bytes) -> Self {
        self.lock().responses.insert((to, calldata), ret);
        self
    }

    pub fn set_block_number(&self, block: u64) {
        self.lock().block_number = block;
    }

    pub fn push_log(&self, mut log: ChainLog) {
        let mut state = self.lock();
        if log.log_index.is_none() {
            log.log_index = Some(state.next_log_index);
            state.next_log_index += 1;
        }
        state.logs.push(log);
    }

    pub fn set_uint_response(&self, to: Address, calldata: Bytes, value: U256) {
        self.lock()
            .responses
            .insert((to, calldata), abi::encode_uint_return(value));
    }

    pub fn fail_logs(&self, fail: bool) {
        self.lock().fail_logs = fail;
    }

    pub fn fail_block_number(&self, fail: bool) {
        self.lock().fail_block_number = fail;
    }

    pub fn fail_batches(&self, fail: bool) {
        self.lock().fail_batches = fail;
    }

    /// Delay applied before every operation completes.
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.lock().delay = delay;
    }

    pub fn get_logs_calls(&self) -> usize {
        self.lock().get_logs_calls
    }

    pub fn batch_calls(&self) -> usize {
        self.lock().batch_calls
    }

    /// A Build log emitted by `market`.
    pub fn build_log(
        market: Address,
        sender: Address,
        position_id: u64,
        user_oi: U256,
        block_number: u64,
    ) -> ChainLog {
        let event = Build {
            sender,
            positionId: U256::from(position_id),
            oi: user_oi,
            debt: U256::ZERO,
            isLong: true,
            price: U256::from(1u64),
        };
        let data = event.encode_log_data();
        ChainLog {
            address: market,
            topics: data.topics().to_vec(),
            data: data.data.clone(),
            block_number,
            transaction_hash: None,
            log_index: None,
        }
    }

    /// A token Transfer log.
    pub fn transfer_log(
        token: Address,
        from: Address,
        to: Address,
        amount: U256,
        block_number: u64,
    ) -> ChainLog {
        let event = Transfer {
            from,
            to,
            value: amount,
        };
        let data = event.encode_log_data();
        ChainLog {
            address: token,
            topics: data.topics().to_vec(),
            data: data.data.clone(),
            block_number,
            transaction_hash: Some(B256::with_last_byte(block_number as u8)),
            log_index: None,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn maybe_delay(&self) {
        let delay = self.lock().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl ChainAccess for MockChain {
    async fn get_logs(
        &self,
        filter: &LogFilter,
        from_block: u64,
    ) -> Result<Vec<ChainLog>, ChainError> {
        self.maybe_delay().await;
        let mut state = self.lock();
        state.get_logs_calls += 1;
        if state.fail_logs {
            return Err(ChainError::NetworkError("mock getLogs failure".to_string()));
        }

        let mut logs: Vec<ChainLog> = state
            .logs
            .iter()
            .filter(|log| {
                filter.matches(log)
                    && log.block_number >= from_block
                    && filter.to_block.map_or(true, |to| log.block_number <= to)
            })
            .cloned()
            .collect();
        logs.sort_by_key(|l| (l.block_number, l.log_index));
        Ok(logs)
    }

    async fn call(&self, to: Address, calldata: Bytes) -> Result<Bytes, ChainError> {
        self.maybe_delay().await;
        self.lock()
            .responses
            .get(&(to, calldata))
            .cloned()
            .ok_or_else(|| ChainError::RpcError {
                code: -32000,
                message: "execution reverted".to_string(),
            })
    }

    async fn batch_call(&self, calls: Vec<(Address, Bytes)>) -> Result<Vec<Bytes>, ChainError> {
        self.maybe_delay().await;
        let mut state = self.lock();
        state.batch_calls += 1;
        if state.fail_batches {
            return Err(ChainError::NetworkError("mock batch failure".to_string()));
        }

        calls
            .into_iter()
            .map(|key| {
                state
                    .responses
                    .get(&key)
                    .cloned()
                    .ok_or_else(|| ChainError::RpcError {
                        code: -32000,
                        message: "execution reverted".to_string(),
                    })
            })
            .collect()
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        self.maybe_delay().await;
        let state = self.lock();
        if state.fail_block_number {
            return Err(ChainError::NetworkError("mock blockNumber failure".to_string()));
        }
        Ok(state.block_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::abi::build_filter;

    #[tokio::test]
    async fn test_get_logs_filters_by_block_range() {
        let market = Address::repeat_byte(0x02);
        let mock = MockChain::new()
            .with_log(MockChain::build_log(market, Address::ZERO, 1, U256::from(1), 5))
            .with_log(MockChain::build_log(market, Address::ZERO, 2, U256::from(1), 10));

        let logs = mock.get_logs(&build_filter(market), 6).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].block_number, 10);

        let bounded = build_filter(market).up_to(9);
        assert!(mock.get_logs(&bounded, 6).await.unwrap().is_empty());
        assert_eq!(mock.get_logs_calls(), 2);
    }

    #[tokio::test]
    async fn test_get_logs_assigns_log_indexes() {
        let market = Address::repeat_byte(0x02);
        let mock = MockChain::new()
            .with_log(MockChain::build_log(market, Address::ZERO, 1, U256::from(1), 5))
            .with_log(MockChain::build_log(market, Address::ZERO, 2, U256::from(1), 5));

        let logs = mock.get_logs(&build_filter(market), 0).await.unwrap();
        assert_eq!(logs[0].log_index, Some(0));
        assert_eq!(logs[1].log_index, Some(1));
    }

    #[tokio::test]
    async fn test_unconfigured_call_reverts() {
        let mock = MockChain::new();
        let err = mock.call(Address::ZERO, Bytes::new()).await.unwrap_err();
        assert!(matches!(err, ChainError::RpcError { .. }));
    }

    #[tokio::test]
    async fn test_batch_call_preserves_order() {
        let a = Address::repeat_byte(0x01);
        let mock = MockChain::new()
            .with_uint_response(a, Bytes::from(vec![1u8]), U256::from(10))
            .with_uint_response(a, Bytes::from(vec![2u8]), U256::from(20));

        let out = mock
            .batch_call(vec![(a, Bytes::from(vec![2u8])), (a, Bytes::from(vec![1u8]))])
            .await
            .unwrap();
        assert_eq!(abi::decode_cost(&out[0]).unwrap(), U256::from(20));
        assert_eq!(abi::decode_cost(&out[1]).unwrap(), U256::from(10));
        assert_eq!(mock.batch_calls(), 1);
    }
}
