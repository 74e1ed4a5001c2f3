//! JSON-RPC over HTTP implementation of [`ChainAccess`].

use super::{ChainAccess, ChainError, ChainLog, LogFilter};
use alloy::primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use reqwest::Client;
use serde_json::{json, Value};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

/// Total time spent retrying rate-limited requests before giving up.
const RATE_LIMIT_BUDGET: Duration = Duration::from_secs(5);

/// Chain access through a plain JSON-RPC HTTP endpoint.
///
/// Batched calls are sent as a single JSON-RPC batch request.
#[derive(Debug, Clone)]
pub struct RpcChain {
    client: Client,
    url: String,
}

impl RpcChain {
    pub fn new(url: String) -> Self {
        Self {
            client: Client::new(),
            url,
        }
    }

    async fn post(&self, payload: Value) -> Result<Value, ChainError> {
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(RATE_LIMIT_BUDGET),
            ..Default::default()
        };

        // Only 429 is retried; every other failure surfaces to the caller.
        retry(backoff, || async {
            let response = self
                .client
                .post(&self.url)
                .json(&payload)
                .send()
                .await
                .map_err(|e| backoff::Error::permanent(ChainError::NetworkError(e.to_string())))?;

            let status = response.status();
            if status == 429 {
                warn!("RPC endpoint rate limited, backing off");
                return Err(backoff::Error::transient(ChainError::RateLimited));
            }
            if !status.is_success() {
                return Err(backoff::Error::permanent(ChainError::HttpError {
                    status: status.as_u16(),
                    message: if status.is_server_error() {
                        "Server error".to_string()
                    } else {
                        "Client error".to_string()
                    },
                }));
            }

            response
                .json::<Value>()
                .await
                .map_err(|e| backoff::Error::permanent(ChainError::ParseError(e.to_string())))
        })
        .await
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, ChainError> {
        debug!(method, "JSON-RPC request");
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let response = self.post(payload).await?;
        take_result(response)
    }
}

#[async_trait]
impl ChainAccess for RpcChain {
    async fn get_logs(
        &self,
        filter: &LogFilter,
        from_block: u64,
    ) -> Result<Vec<ChainLog>, ChainError> {
        let result = self
            .request("eth_getLogs", json!([filter_params(filter, from_block)]))
            .await?;

        result
            .as_array()
            .ok_or_else(|| ChainError::ParseError("Expected array of logs".to_string()))?
            .iter()
            .map(parse_log)
            .collect()
    }

    async fn call(&self, to: Address, calldata: Bytes) -> Result<Bytes, ChainError> {
        let result = self
            .request("eth_call", json!([call_object(to, &calldata), "latest"]))
            .await?;
        parse_bytes(&result)
    }

    async fn batch_call(&self, calls: Vec<(Address, Bytes)>) -> Result<Vec<Bytes>, ChainError> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }

        let batch: Vec<Value> = calls
            .iter()
            .enumerate()
            .map(|(id, (to, calldata))| {
                json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "method": "eth_call",
                    "params": [call_object(*to, calldata), "latest"],
                })
            })
            .collect();

        let response = self.post(Value::Array(batch)).await?;
        let mut items = response
            .as_array()
            .cloned()
            .ok_or_else(|| ChainError::ParseError("Expected batch response array".to_string()))?;

        if items.len() != calls.len() {
            return Err(ChainError::ParseError(format!(
                "Batch response has {} items, expected {}",
                items.len(),
                calls.len()
            )));
        }

        // Nodes may answer a batch out of order.
        items.sort_by_key(|item| item.get("id").and_then(Value::as_u64).unwrap_or(u64::MAX));

        items
            .into_iter()
            .enumerate()
            .map(|(expected, item)| {
                let id = item.get("id").and_then(Value::as_u64);
                if id != Some(expected as u64) {
                    return Err(ChainError::ParseError(format!(
                        "Missing batch response for id {}",
                        expected
                    )));
                }
                parse_bytes(&take_result(item)?)
            })
            .collect()
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        let result = self.request("eth_blockNumber", json!([])).await?;
        parse_quantity(&result)
    }
}

fn filter_params(filter: &LogFilter, from_block: u64) -> Value {
    let topics: Vec<Value> = filter
        .topics
        .iter()
        .map(|t| match t {
            Some(topic) => Value::String(format!("{:#x}", topic)),
            None => Value::Null,
        })
        .collect();
    let to_block = match filter.to_block {
        Some(block) => format!("{:#x}", block),
        None => "latest".to_string(),
    };
    json!({
        "address": format!("{:#x}", filter.address),
        "topics": topics,
        "fromBlock": format!("{:#x}", from_block),
        "toBlock": to_block,
    })
}

fn call_object(to: Address, calldata: &Bytes) -> Value {
    json!({
        "to": format!("{:#x}", to),
        "data": format!("0x{}", hex::encode(calldata)),
    })
}

fn take_result(response: Value) -> Result<Value, ChainError> {
    if let Some(err) = response.get("error") {
        return Err(ChainError::RpcError {
            code: err.get("code").and_then(Value::as_i64).unwrap_or(0),
            message: err
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
        });
    }
    response
        .get("result")
        .cloned()
        .ok_or_else(|| ChainError::ParseError("Missing result field".to_string()))
}

fn parse_bytes(value: &Value) -> Result<Bytes, ChainError> {
    let s = value
        .as_str()
        .ok_or_else(|| ChainError::ParseError("Expected hex string".to_string()))?;
    hex::decode(s.trim_start_matches("0x"))
        .map(Bytes::from)
        .map_err(|e| ChainError::ParseError(format!("Invalid hex data: {}", e)))
}

fn parse_quantity(value: &Value) -> Result<u64, ChainError> {
    let s = value
        .as_str()
        .ok_or_else(|| ChainError::ParseError("Expected hex quantity".to_string()))?;
    u64::from_str_radix(s.trim_start_matches("0x"), 16)
        .map_err(|e| ChainError::ParseError(format!("Invalid quantity {}: {}", s, e)))
}

fn parse_b256(value: &Value) -> Result<B256, ChainError> {
    let s = value
        .as_str()
        .ok_or_else(|| ChainError::ParseError("Expected 32-byte hex".to_string()))?;
    B256::from_str(s).map_err(|e| ChainError::ParseError(format!("Invalid hash {}: {}", s, e)))
}

fn parse_log(log_json: &Value) -> Result<ChainLog, ChainError> {
    let address = log_json
        .get("address")
        .and_then(Value::as_str)
        .ok_or_else(|| ChainError::ParseError("Missing address field".to_string()))
        .and_then(|s| {
            Address::from_str(s)
                .map_err(|e| ChainError::ParseError(format!("Invalid address: {}", e)))
        })?;

    let topics = log_json
        .get("topics")
        .and_then(Value::as_array)
        .ok_or_else(|| ChainError::ParseError("Missing topics field".to_string()))?
        .iter()
        .map(parse_b256)
        .collect::<Result<Vec<_>, _>>()?;

    let data = parse_bytes(
        log_json
            .get("data")
            .ok_or_else(|| ChainError::ParseError("Missing data field".to_string()))?,
    )?;

    let block_number = parse_quantity(
        log_json
            .get("blockNumber")
            .ok_or_else(|| ChainError::ParseError("Missing blockNumber field".to_string()))?,
    )?;

    let transaction_hash = log_json
        .get("transactionHash")
        .filter(|v| !v.is_null())
        .map(parse_b256)
        .transpose()?;
    let log_index = log_json
        .get("logIndex")
        .filter(|v| !v.is_null())
        .map(parse_quantity)
        .transpose()?;

    Ok(ChainLog {
        address,
        topics,
        data,
        block_number,
        transaction_hash,
        log_index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_valid() {
        let log_json = json!({
            "address": "0xc28350047d006ed387b0f210d4ea3218137a8a38",
            "topics": [format!("{:#x}", B256::repeat_byte(0x11))],
            "data": "0x0a",
            "blockNumber": "0x10",
            "transactionHash": format!("{:#x}", B256::repeat_byte(0x22)),
            "logIndex": "0x3"
        });

        let log = parse_log(&log_json).unwrap();
        assert_eq!(log.block_number, 16);
        assert_eq!(log.topics, vec![B256::repeat_byte(0x11)]);
        assert_eq!(log.data, Bytes::from(vec![0x0a]));
        assert_eq!(log.transaction_hash, Some(B256::repeat_byte(0x22)));
        assert_eq!(log.log_index, Some(3));
    }

    #[test]
    fn test_parse_log_pending_fields() {
        let log_json = json!({
            "address": "0xc28350047d006ed387b0f210d4ea3218137a8a38",
            "topics": [],
            "data": "0x",
            "blockNumber": "0x1",
            "transactionHash": null,
            "logIndex": null
        });
        let log = parse_log(&log_json).unwrap();
        assert!(log.transaction_hash.is_none());
        assert!(log.log_index.is_none());
    }

    #[test]
    fn test_take_result_surfaces_rpc_error() {
        let response = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {"code": -32000, "message": "execution reverted"}
        });
        match take_result(response) {
            Err(ChainError::RpcError { code, message }) => {
                assert_eq!(code, -32000);
                assert_eq!(message, "execution reverted");
            }
            other => panic!("Expected RpcError, got {:?}", other),
        }
    }

    #[test]
    fn test_filter_params_encode_wildcards_and_range() {
        let filter = LogFilter::new(Address::ZERO, vec![Some(B256::ZERO), None]).up_to(255);
        let params = filter_params(&filter, 16);
        assert_eq!(params["fromBlock"], "0x10");
        assert_eq!(params["toBlock"], "0xff");
        assert!(params["topics"][1].is_null());
    }

    #[test]
    fn test_parse_quantity_rejects_garbage() {
        assert!(parse_quantity(&json!("0xzz")).is_err());
        assert!(parse_quantity(&json!(12)).is_err());
    }
}
