use crate::orchestration::{OverlapPolicy, ScanBoundary};
use crate::registry::Market;
use alloy::primitives::Address;
use serde::de::{Deserialize, Deserializer, MapAccess, Visitor};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default state contract on Arbitrum One.
pub const DEFAULT_STATE_CONTRACT: &str = "0xC3cB99652111e7828f38544E3e94c714D8F9a51a";

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    pub rpc_url: String,
    pub token_address: Address,
    pub state_contract: Address,
    pub markets: Vec<Market>,
    pub poll_interval: Duration,
    pub build_poll_interval: Duration,
    pub rpc_timeout: Duration,
    pub overlap_policy: OverlapPolicy,
    pub persistence: PersistenceMode,
    pub upnl_enabled: bool,
    pub scan_boundary: ScanBoundary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistenceMode {
    /// Checkpoints and snapshots go to SQLite.
    Enabled,
    /// Everything stays in memory; snapshots are only logged.
    Disabled,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = env_map
            .get("PORT")
            .map(|s| s.as_str())
            .unwrap_or("8080")
            .parse::<u16>()
            .map_err(|_| {
                ConfigError::InvalidValue("PORT".to_string(), "must be a valid u16".to_string())
            })?;

        let database_path = env_map
            .get("DATABASE_PATH")
            .cloned()
            .unwrap_or_else(|| "data/ovlstats.db".to_string());

        let rpc_url = env_map
            .get("RPC_URL")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("RPC_URL".to_string()))?;

        let token_address = parse_address(
            "TOKEN_CONTRACT_ADDRESS",
            env_map
                .get("TOKEN_CONTRACT_ADDRESS")
                .ok_or_else(|| ConfigError::MissingEnv("TOKEN_CONTRACT_ADDRESS".to_string()))?,
        )?;

        let state_contract = parse_address(
            "STATE_CONTRACT_ADDRESS",
            env_map
                .get("STATE_CONTRACT_ADDRESS")
                .map(|s| s.as_str())
                .unwrap_or(DEFAULT_STATE_CONTRACT),
        )?;

        let markets = parse_markets_from_map(&env_map)?;

        let poll_interval =
            Duration::from_secs(parse_positive(&env_map, "POLL_INTERVAL_SECS", 100)?);
        let build_poll_interval =
            Duration::from_millis(parse_positive(&env_map, "BUILD_POLL_INTERVAL_MS", 4_000)?);
        let rpc_timeout = Duration::from_millis(parse_positive(&env_map, "RPC_TIMEOUT_MS", 10_000)?);

        let overlap_policy = match env_map
            .get("OVERLAP_POLICY")
            .map(|s| s.as_str())
            .unwrap_or("skip")
        {
            "skip" => OverlapPolicy::SkipIfBusy,
            "queue" => OverlapPolicy::Queue,
            other => {
                return Err(ConfigError::InvalidValue(
                    "OVERLAP_POLICY".to_string(),
                    format!("must be skip or queue, got {}", other),
                ))
            }
        };

        let persistence = match env_map
            .get("PERSISTENCE")
            .map(|s| s.as_str())
            .unwrap_or("enabled")
        {
            "enabled" => PersistenceMode::Enabled,
            "disabled" => PersistenceMode::Disabled,
            other => {
                return Err(ConfigError::InvalidValue(
                    "PERSISTENCE".to_string(),
                    format!("must be enabled or disabled, got {}", other),
                ))
            }
        };

        let upnl_enabled = match env_map
            .get("UPNL_ENABLED")
            .map(|s| s.as_str())
            .unwrap_or("true")
        {
            "true" | "1" => true,
            "false" | "0" => false,
            other => {
                return Err(ConfigError::InvalidValue(
                    "UPNL_ENABLED".to_string(),
                    format!("must be true or false, got {}", other),
                ))
            }
        };

        let scan_boundary = match env_map
            .get("TRANSFER_SCAN_BOUNDARY")
            .map(|s| s.as_str())
            .unwrap_or("inclusive")
        {
            "inclusive" => ScanBoundary::Inclusive,
            "exclusive" => ScanBoundary::Exclusive,
            other => {
                return Err(ConfigError::InvalidValue(
                    "TRANSFER_SCAN_BOUNDARY".to_string(),
                    format!("must be inclusive or exclusive, got {}", other),
                ))
            }
        };

        Ok(Config {
            port,
            database_path,
            rpc_url,
            token_address,
            state_contract,
            markets,
            poll_interval,
            build_poll_interval,
            rpc_timeout,
            overlap_policy,
            persistence,
            upnl_enabled,
            scan_boundary,
        })
    }
}

fn parse_address(key: &str, value: &str) -> Result<Address, ConfigError> {
    Address::from_str(value.trim()).map_err(|_| {
        ConfigError::InvalidValue(key.to_string(), format!("not a valid address: {}", value))
    })
}

fn parse_positive(
    env_map: &HashMap<String, String>,
    key: &str,
    default: u64,
) -> Result<u64, ConfigError> {
    let value = match env_map.get(key) {
        Some(s) => s.parse::<u64>().map_err(|_| {
            ConfigError::InvalidValue(key.to_string(), "must be a valid u64".to_string())
        })?,
        None => default,
    };
    if value == 0 {
        return Err(ConfigError::InvalidValue(
            key.to_string(),
            "must be greater than zero".to_string(),
        ));
    }
    Ok(value)
}

/// Markets from `MARKETS` (`SYM=0xaddr,...`) or, if unset, the JSON object in
/// `MARKETS_FILE`.
fn parse_markets_from_map(env_map: &HashMap<String, String>) -> Result<Vec<Market>, ConfigError> {
    let (key, pairs) = if let Some(list) = env_map.get("MARKETS") {
        let pairs = list
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|entry| {
                entry
                    .split_once('=')
                    .map(|(sym, addr)| (sym.trim().to_string(), addr.trim().to_string()))
                    .ok_or_else(|| {
                        ConfigError::InvalidValue(
                            "MARKETS".to_string(),
                            format!("expected SYMBOL=ADDRESS, got {}", entry),
                        )
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        ("MARKETS", pairs)
    } else if let Some(file_path) = env_map.get("MARKETS_FILE") {
        let content = std::fs::read_to_string(file_path).map_err(|_| {
            ConfigError::InvalidValue(
                "MARKETS_FILE".to_string(),
                "file not found or unreadable".to_string(),
            )
        })?;
        let MarketEntries(pairs) = serde_json::from_str(&content).map_err(|e| {
            ConfigError::InvalidValue(
                "MARKETS_FILE".to_string(),
                format!("expected a JSON object of symbol to address: {}", e),
            )
        })?;
        ("MARKETS_FILE", pairs)
    } else {
        return Err(ConfigError::MissingEnv("MARKETS".to_string()));
    };

    if pairs.is_empty() {
        return Err(ConfigError::InvalidValue(
            key.to_string(),
            "at least one market is required".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    pairs
        .into_iter()
        .map(|(symbol, addr)| {
            if symbol.is_empty() || !seen.insert(symbol.clone()) {
                return Err(ConfigError::InvalidValue(
                    key.to_string(),
                    format!("empty or duplicate market symbol: {:?}", symbol),
                ));
            }
            Ok(Market::new(symbol, parse_address(key, &addr)?))
        })
        .collect()
}

/// Entries of a JSON markets object in file order, repeated keys included.
struct MarketEntries(Vec<(String, String)>);

impl<'de> Deserialize<'de> for MarketEntries {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = MarketEntries;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an object mapping market symbols to address strings")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<MarketEntries, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(entry) = map.next_entry::<String, String>()? {
                    entries.push(entry);
                }
                Ok(MarketEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}
