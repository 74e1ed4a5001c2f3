use crate::chain::{abi, ChainReader};
use crate::domain::PositionRef;
use crate::engine::CostValuePair;
use crate::error::MonitorError;
use alloy::primitives::{Address, Bytes, U256};
use tracing::debug;

/// Resolves current cost and value of many positions in one batched call
/// against the state contract.
#[derive(Debug, Clone)]
pub struct CostValueResolver {
    chain: ChainReader,
    state_contract: Address,
}

impl CostValueResolver {
    pub fn new(chain: ChainReader, state_contract: Address) -> Self {
        Self {
            chain,
            state_contract,
        }
    }

    /// Raw costs, index-aligned with `positions`.
    pub async fn resolve_costs(
        &self,
        market: Address,
        positions: &[PositionRef],
    ) -> Result<Vec<U256>, MonitorError> {
        let calls = positions
            .iter()
            .map(|p| abi::encode_cost(market, p))
            .collect();
        let returns = self.submit(calls).await?;
        returns.iter().map(|r| decode(abi::decode_cost, r)).collect()
    }

    /// Raw values, index-aligned with `positions`.
    pub async fn resolve_values(
        &self,
        market: Address,
        positions: &[PositionRef],
    ) -> Result<Vec<U256>, MonitorError> {
        let calls = positions
            .iter()
            .map(|p| abi::encode_value(market, p))
            .collect();
        let returns = self.submit(calls).await?;
        returns.iter().map(|r| decode(abi::decode_value, r)).collect()
    }

    /// Cost and value of every position in a single round trip.
    pub async fn resolve(
        &self,
        market: Address,
        positions: &[PositionRef],
    ) -> Result<Vec<CostValuePair>, MonitorError> {
        let calls = positions
            .iter()
            .flat_map(|p| [abi::encode_cost(market, p), abi::encode_value(market, p)])
            .collect();
        let returns = self.submit(calls).await?;

        returns
            .chunks_exact(2)
            .map(|pair| -> Result<CostValuePair, MonitorError> {
                Ok(CostValuePair::new(
                    decode(abi::decode_cost, &pair[0])?,
                    decode(abi::decode_value, &pair[1])?,
                ))
            })
            .collect()
    }

    async fn submit(&self, calldata: Vec<Bytes>) -> Result<Vec<Bytes>, MonitorError> {
        if calldata.is_empty() {
            return Ok(Vec::new());
        }
        let expected = calldata.len();
        debug!(calls = expected, "resolving positions");

        let calls = calldata
            .into_iter()
            .map(|data| (self.state_contract, data))
            .collect();
        let returns = self
            .chain
            .batch_call(calls)
            .await
            .map_err(MonitorError::from_call)?;

        if returns.len() != expected {
            return Err(MonitorError::Decode(format!(
                "batch returned {} results for {} calls",
                returns.len(),
                expected
            )));
        }
        Ok(returns)
    }
}

fn decode(
    decoder: fn(&[u8]) -> Result<U256, String>,
    data: &Bytes,
) -> Result<U256, MonitorError> {
    decoder(data).map_err(MonitorError::Decode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChain;
    use std::sync::Arc;
    use std::time::Duration;

    const STATE: Address = Address::repeat_byte(0xc3);
    const MARKET: Address = Address::repeat_byte(0x02);

    fn position(id: u64) -> PositionRef {
        PositionRef::new(Address::repeat_byte(0x0a), U256::from(id))
    }

    fn resolver(mock: Arc<MockChain>) -> CostValueResolver {
        CostValueResolver::new(ChainReader::new(mock, Duration::from_secs(1)), STATE)
    }

    fn mock_with_positions(entries: &[(u64, u64, u64)]) -> Arc<MockChain> {
        let mock = MockChain::new();
        for &(id, cost, value) in entries {
            mock.set_uint_response(STATE, abi::encode_cost(MARKET, &position(id)), U256::from(cost));
            mock.set_uint_response(
                STATE,
                abi::encode_value(MARKET, &position(id)),
                U256::from(value),
            );
        }
        Arc::new(mock)
    }

    #[tokio::test]
    async fn empty_input_makes_no_call() {
        let mock = Arc::new(MockChain::new());
        let r = resolver(mock.clone());
        assert!(r.resolve_costs(MARKET, &[]).await.unwrap().is_empty());
        assert!(r.resolve(MARKET, &[]).await.unwrap().is_empty());
        assert_eq!(mock.batch_calls(), 0);
    }

    #[tokio::test]
    async fn outputs_follow_input_order() {
        let mock = mock_with_positions(&[(1, 10, 15), (2, 20, 5), (3, 30, 30)]);
        let r = resolver(mock.clone());
        let positions = [position(3), position(1), position(2)];

        let costs = r.resolve_costs(MARKET, &positions).await.unwrap();
        assert_eq!(costs, vec![U256::from(30), U256::from(10), U256::from(20)]);

        let values = r.resolve_values(MARKET, &positions).await.unwrap();
        assert_eq!(values, vec![U256::from(30), U256::from(15), U256::from(5)]);
        assert_eq!(mock.batch_calls(), 2);
    }

    #[tokio::test]
    async fn resolve_uses_one_round_trip() {
        let mock = mock_with_positions(&[(1, 10, 15), (2, 20, 5)]);
        let r = resolver(mock.clone());

        let pairs = r.resolve(MARKET, &[position(1), position(2)]).await.unwrap();
        assert_eq!(
            pairs,
            vec![
                CostValuePair::new(U256::from(10), U256::from(15)),
                CostValuePair::new(U256::from(20), U256::from(5)),
            ]
        );
        assert_eq!(mock.batch_calls(), 1);
    }

    #[tokio::test]
    async fn batch_failure_is_a_call_error() {
        let mock = mock_with_positions(&[(1, 10, 15)]);
        mock.fail_batches(true);
        let err = resolver(mock).resolve_costs(MARKET, &[position(1)]).await.unwrap_err();
        assert!(matches!(err, MonitorError::ChainCall(_)));
    }

    #[tokio::test]
    async fn undecodable_element_is_a_decode_error() {
        let mock = MockChain::new().with_response(
            STATE,
            abi::encode_cost(MARKET, &position(1)),
            Bytes::from(vec![0u8; 3]),
        );
        let err = resolver(Arc::new(mock))
            .resolve_costs(MARKET, &[position(1)])
            .await
            .unwrap_err();
        assert!(matches!(err, MonitorError::Decode(_)));
    }

    #[tokio::test]
    async fn slow_batch_times_out_as_call_error() {
        let mock = mock_with_positions(&[(1, 10, 15)]);
        mock.set_delay(Some(Duration::from_millis(200)));
        let r = CostValueResolver::new(
            ChainReader::new(mock, Duration::from_millis(20)),
            STATE,
        );
        let err = r.resolve_costs(MARKET, &[position(1)]).await.unwrap_err();
        assert!(matches!(
            err,
            MonitorError::ChainCall(crate::chain::ChainError::Timeout { .. })
        ));
    }
}
