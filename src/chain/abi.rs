//! Contract bindings for the OVL token, OverlayV1 markets, and the state
//! contract, plus helpers for filters and calldata.

use super::{ChainLog, LogFilter};
use crate::domain::PositionRef;
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::sol;
use alloy::sol_types::{SolCall, SolEvent};

sol! {
    event Transfer(address indexed from, address indexed to, uint256 value);

    event Build(
        address indexed sender,
        uint256 positionId,
        uint256 oi,
        uint256 debt,
        bool isLong,
        uint256 price
    );

    function cost(address market, address owner, uint256 id) external view returns (uint256);
    function value(address market, address owner, uint256 id) external view returns (uint256);
    function capOi(address market) external view returns (uint256);
}

/// Decoded fields of a Build event the reactor and scheduler use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildLog {
    pub sender: Address,
    pub position_id: U256,
    pub user_oi: U256,
    pub block_number: u64,
    pub transaction_hash: Option<B256>,
    pub log_index: Option<u64>,
}

impl BuildLog {
    pub fn position(&self) -> PositionRef {
        PositionRef::new(self.sender, self.position_id)
    }
}

/// All Build events of a market.
pub fn build_filter(market: Address) -> LogFilter {
    LogFilter::new(market, vec![Some(Build::SIGNATURE_HASH)])
}

/// Token transfers from the zero address to `market`.
pub fn mint_filter(token: Address, market: Address) -> LogFilter {
    LogFilter::new(
        token,
        vec![
            Some(Transfer::SIGNATURE_HASH),
            Some(Address::ZERO.into_word()),
            Some(market.into_word()),
        ],
    )
}

/// Token transfers from `market` to the zero address.
pub fn burn_filter(token: Address, market: Address) -> LogFilter {
    LogFilter::new(
        token,
        vec![
            Some(Transfer::SIGNATURE_HASH),
            Some(market.into_word()),
            Some(Address::ZERO.into_word()),
        ],
    )
}

pub fn decode_build(log: &ChainLog) -> Result<BuildLog, String> {
    let event = Build::decode_raw_log(log.topics.iter().copied(), &log.data, true)
        .map_err(|e| format!("invalid Build log at block {}: {}", log.block_number, e))?;
    Ok(BuildLog {
        sender: event.sender,
        position_id: event.positionId,
        user_oi: event.oi,
        block_number: log.block_number,
        transaction_hash: log.transaction_hash,
        log_index: log.log_index,
    })
}

/// Raw (1e18-scaled) amount of a Transfer log.
pub fn decode_transfer_amount(log: &ChainLog) -> Result<U256, String> {
    Transfer::decode_raw_log(log.topics.iter().copied(), &log.data, true)
        .map(|event| event.value)
        .map_err(|e| format!("invalid Transfer log at block {}: {}", log.block_number, e))
}

pub fn encode_cost(market: Address, position: &PositionRef) -> Bytes {
    costCall {
        market,
        owner: position.owner,
        id: position.position_id,
    }
    .abi_encode()
    .into()
}

pub fn encode_value(market: Address, position: &PositionRef) -> Bytes {
    valueCall {
        market,
        owner: position.owner,
        id: position.position_id,
    }
    .abi_encode()
    .into()
}

pub fn encode_cap_oi(market: Address) -> Bytes {
    capOiCall { market }.abi_encode().into()
}

pub fn decode_cost(data: &[u8]) -> Result<U256, String> {
    costCall::abi_decode_returns(data, true)
        .map(|r| r._0)
        .map_err(|e| format!("invalid cost return: {}", e))
}

pub fn decode_value(data: &[u8]) -> Result<U256, String> {
    valueCall::abi_decode_returns(data, true)
        .map(|r| r._0)
        .map_err(|e| format!("invalid value return: {}", e))
}

pub fn decode_cap_oi(data: &[u8]) -> Result<U256, String> {
    capOiCall::abi_decode_returns(data, true)
        .map(|r| r._0)
        .map_err(|e| format!("invalid capOi return: {}", e))
}

/// ABI encoding of a single `uint256` return value.
pub fn encode_uint_return(value: U256) -> Bytes {
    Bytes::from(value.to_be_bytes::<32>().to_vec())
}
