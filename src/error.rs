use crate::chain::ChainError;
use crate::db::StoreError;
use crate::domain::{MarketSymbol, ScaleError};
use thiserror::Error;

/// Failure of one market's cycle step or one build reaction.
///
/// Caught at the per-market or per-event boundary, logged and counted;
/// never propagated past the scheduler or the reactor.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Contract call failed: {0}")]
    ChainCall(ChainError),
    #[error("Log query failed: {0}")]
    ChainQuery(ChainError),
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),
    #[error("Market {0} reports zero open interest capacity")]
    ZeroCapacity(MarketSymbol),
    #[error("Scale error: {0}")]
    Scale(#[from] ScaleError),
}

impl MonitorError {
    /// Short label used for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            MonitorError::ChainCall(_) => "chain_call",
            MonitorError::ChainQuery(_) => "chain_query",
            MonitorError::Decode(_) => "decode",
            MonitorError::Persistence(_) => "persistence",
            MonitorError::ZeroCapacity(_) => "zero_capacity",
            MonitorError::Scale(_) => "scale",
        }
    }

    /// A failed batch call. Malformed responses are decode errors.
    pub fn from_call(err: ChainError) -> Self {
        match err {
            ChainError::ParseError(msg) => MonitorError::Decode(msg),
            other => MonitorError::ChainCall(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_failures_are_decode_errors() {
        let err = MonitorError::from_call(ChainError::ParseError("bad hex".to_string()));
        assert_eq!(err.kind(), "decode");

        let err = MonitorError::from_call(ChainError::RateLimited);
        assert_eq!(err.kind(), "chain_call");
    }

    #[test]
    fn display_includes_cause() {
        let err = MonitorError::ChainQuery(ChainError::Timeout {
            op: "eth_getLogs",
            after_ms: 100,
        });
        assert_eq!(
            err.to_string(),
            "Log query failed: Timed out after 100ms: eth_getLogs"
        );
        let err = MonitorError::ZeroCapacity(MarketSymbol::new("ETH/USD"));
        assert_eq!(
            err.to_string(),
            "Market ETH/USD reports zero open interest capacity"
        );
    }
}
