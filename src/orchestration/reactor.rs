//! Real-time reaction to Build events, one supervised pipeline per market.
//!
//! A watcher polls each market's Build logs and feeds a channel; a worker
//! drains it and records a snapshot per event. Failures and panics while
//! handling an event are contained to that event. A panic anywhere else in
//! the pipeline restarts only that market's pipeline.

use crate::chain::abi::{self, BuildLog};
use crate::chain::ChainReader;
use crate::db::SnapshotSink;
use crate::domain::{to_token_units, BuildSnapshot, Decimal, ScaleError, TimeMs};
use crate::error::MonitorError;
use crate::metrics::Metrics;
use crate::registry::{Market, MarketRegistry};
use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use futures::FutureExt;
use rust_decimal::Decimal as RustDecimal;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Decimal places kept in the capacity percentage.
const PERCENT_SCALE: u32 = 6;

const CHANNEL_CAPACITY: usize = 256;

/// A Build event observed on a market.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildNotification {
    pub market: Market,
    pub build: BuildLog,
}

/// Handles one Build notification.
#[async_trait]
pub trait BuildHandler: Send + Sync {
    async fn handle(&self, notification: &BuildNotification) -> Result<(), MonitorError>;
}

/// Computes and records a [`BuildSnapshot`] for each new position.
#[derive(Clone)]
pub struct BuildReactor {
    chain: ChainReader,
    sink: Arc<dyn SnapshotSink>,
    state_contract: Address,
}

impl BuildReactor {
    pub fn new(chain: ChainReader, sink: Arc<dyn SnapshotSink>, state_contract: Address) -> Self {
        Self {
            chain,
            sink,
            state_contract,
        }
    }

    /// Read the market's capacity and the position's cost, then record the
    /// snapshot.
    pub async fn react(
        &self,
        market: &Market,
        build: &BuildLog,
    ) -> Result<BuildSnapshot, MonitorError> {
        let position = build.position();
        let (cap_ret, cost_ret) = tokio::try_join!(
            self.chain
                .call(self.state_contract, abi::encode_cap_oi(market.address)),
            self.chain
                .call(self.state_contract, abi::encode_cost(market.address, &position)),
        )
        .map_err(MonitorError::from_call)?;

        let cap_oi = abi::decode_cap_oi(&cap_ret).map_err(MonitorError::Decode)?;
        let cost = abi::decode_cost(&cost_ret).map_err(MonitorError::Decode)?;
        if cap_oi.is_zero() {
            return Err(MonitorError::ZeroCapacity(market.symbol.clone()));
        }

        let snapshot = BuildSnapshot {
            event_key: BuildSnapshot::compute_event_key(
                &market.symbol,
                &build.sender,
                build.position_id,
                build.user_oi,
                build.block_number,
                build.transaction_hash,
                build.log_index,
            ),
            market: market.symbol.clone(),
            taken_at: TimeMs::now(),
            block_number: build.block_number,
            sender: build.sender,
            position_id: build.position_id,
            cap_oi: to_token_units(cap_oi)?,
            user_oi: to_token_units(build.user_oi)?,
            collateral_in_ovl: to_token_units(cost)?,
            percentage_of_cap_oi_bought: percentage_of_cap(build.user_oi, cap_oi)?,
        };

        if self.sink.record_build(&snapshot).await? {
            Metrics::build_recorded(
                market.symbol.as_str(),
                snapshot.percentage_of_cap_oi_bought.to_f64_lossy(),
            );
            info!(
                market = %market.symbol,
                block = snapshot.block_number,
                sender = %snapshot.sender,
                pct = %snapshot.percentage_of_cap_oi_bought,
                "build recorded"
            );
        } else {
            debug!(market = %market.symbol, key = %snapshot.event_key, "duplicate build ignored");
        }
        Ok(snapshot)
    }
}

#[async_trait]
impl BuildHandler for BuildReactor {
    async fn handle(&self, notification: &BuildNotification) -> Result<(), MonitorError> {
        self.react(&notification.market, &notification.build)
            .await
            .map(|_| ())
    }
}

/// `user_oi * 100 / cap_oi` on raw amounts, truncated to six decimals.
fn percentage_of_cap(user_oi: U256, cap_oi: U256) -> Result<Decimal, ScaleError> {
    let scaled = user_oi
        .checked_mul(U256::from(100u64 * 10u64.pow(PERCENT_SCALE)))
        .ok_or(ScaleError::OutOfRange(user_oi))?;
    let quotient = scaled / cap_oi;
    i128::try_from(quotient)
        .ok()
        .and_then(|q| RustDecimal::try_from_i128_with_scale(q, PERCENT_SCALE).ok())
        .map(Decimal::new)
        .ok_or(ScaleError::OutOfRange(user_oi))
}

/// Runs one watcher/worker pipeline per market and restarts a pipeline that
/// panics.
pub struct ReactorSupervisor {
    chain: ChainReader,
    handler: Arc<dyn BuildHandler>,
    poll_interval: Duration,
    start_block: Option<u64>,
    restart_delay: Duration,
}

impl ReactorSupervisor {
    pub fn new(chain: ChainReader, handler: Arc<dyn BuildHandler>, poll_interval: Duration) -> Self {
        Self {
            chain,
            handler,
            poll_interval,
            start_block: None,
            restart_delay: Duration::from_secs(1),
        }
    }

    /// Watch from `block` instead of the head at startup.
    pub fn starting_at(mut self, block: u64) -> Self {
        self.start_block = Some(block);
        self
    }

    pub fn with_restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    /// Spawn one supervised pipeline per market.
    pub fn spawn(self, registry: &MarketRegistry) -> Vec<JoinHandle<()>> {
        let this = Arc::new(self);
        registry
            .iter()
            .cloned()
            .map(|market| {
                let this = this.clone();
                tokio::spawn(async move { this.supervise(market).await })
            })
            .collect()
    }

    async fn supervise(&self, market: Market) {
        let next_block = Arc::new(AtomicU64::new(0));
        let mut started = false;

        loop {
            let run = self.run_pipeline(&market, next_block.clone(), &mut started);
            match AssertUnwindSafe(run).catch_unwind().await {
                Ok(()) => warn!(market = %market.symbol, "build pipeline stopped, restarting"),
                Err(panic) => {
                    error!(
                        market = %market.symbol,
                        panic = %panic_message(panic.as_ref()),
                        "build pipeline panicked, restarting"
                    );
                    Metrics::error(market.symbol.as_str(), "panic");
                }
            }
            tokio::time::sleep(self.restart_delay).await;
        }
    }

    async fn run_pipeline(&self, market: &Market, next_block: Arc<AtomicU64>, started: &mut bool) {
        if !*started {
            let first = match self.start_block {
                Some(block) => block,
                None => self.wait_for_head(market).await.saturating_add(1),
            };
            next_block.store(first, Ordering::SeqCst);
            *started = true;
            info!(market = %market.symbol, from_block = first, "watching builds");
        }

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::join!(
            self.watch(market, next_block, tx),
            drain(self.handler.as_ref(), rx)
        );
    }

    async fn wait_for_head(&self, market: &Market) -> u64 {
        let mut backoff = watcher_backoff(self.poll_interval);
        loop {
            match self.chain.block_number().await {
                Ok(head) => return head,
                Err(e) => {
                    warn!(market = %market.symbol, op = "eth_blockNumber", error = %e, "head read failed");
                    Metrics::error(market.symbol.as_str(), "chain_query");
                    tokio::time::sleep(backoff.next_backoff().unwrap_or(self.poll_interval)).await;
                }
            }
        }
    }

    /// Poll for Build logs in `[next_block, head]` and forward them.
    async fn watch(
        &self,
        market: &Market,
        next_block: Arc<AtomicU64>,
        tx: mpsc::Sender<BuildNotification>,
    ) {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut backoff = watcher_backoff(self.poll_interval);

        loop {
            interval.tick().await;
            match self.poll_once(market, next_block.load(Ordering::SeqCst)).await {
                Ok(None) => backoff.reset(),
                Ok(Some((head, builds))) => {
                    backoff.reset();
                    for build in builds {
                        let notification = BuildNotification {
                            market: market.clone(),
                            build,
                        };
                        if tx.send(notification).await.is_err() {
                            return;
                        }
                    }
                    next_block.store(head.saturating_add(1), Ordering::SeqCst);
                }
                Err(e) => {
                    warn!(market = %market.symbol, op = "watch_builds", error = %e, "build poll failed");
                    Metrics::error(market.symbol.as_str(), e.kind());
                    let delay = backoff.next_backoff().unwrap_or(self.poll_interval);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn poll_once(
        &self,
        market: &Market,
        from: u64,
    ) -> Result<Option<(u64, Vec<BuildLog>)>, MonitorError> {
        let head = self
            .chain
            .block_number()
            .await
            .map_err(MonitorError::ChainQuery)?;
        if head < from {
            return Ok(None);
        }

        let logs = self
            .chain
            .get_logs(&abi::build_filter(market.address).up_to(head), from)
            .await
            .map_err(MonitorError::ChainQuery)?;

        let mut builds = Vec::with_capacity(logs.len());
        for log in &logs {
            match abi::decode_build(log) {
                Ok(build) => builds.push(build),
                Err(e) => {
                    warn!(market = %market.symbol, block = log.block_number, error = %e, "skipping undecodable build log");
                    Metrics::error(market.symbol.as_str(), "decode");
                }
            }
        }
        Ok(Some((head, builds)))
    }
}

/// Handle notifications until the channel closes, containing failures and
/// panics to the event that caused them.
async fn drain(handler: &dyn BuildHandler, mut rx: mpsc::Receiver<BuildNotification>) {
    while let Some(notification) = rx.recv().await {
        let symbol = notification.market.symbol.clone();
        match AssertUnwindSafe(handler.handle(&notification))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(
                    market = %symbol,
                    op = "react_build",
                    block = notification.build.block_number,
                    error = %e,
                    "build reaction failed"
                );
                Metrics::error(symbol.as_str(), e.kind());
            }
            Err(panic) => {
                error!(
                    market = %symbol,
                    block = notification.build.block_number,
                    panic = %panic_message(panic.as_ref()),
                    "build reaction panicked"
                );
                Metrics::error(symbol.as_str(), "panic");
            }
        }
    }
}

fn watcher_backoff(base: Duration) -> ExponentialBackoff {
    let mut backoff = ExponentialBackoff {
        initial_interval: base,
        max_interval: base.saturating_mul(8),
        max_elapsed_time: None,
        ..Default::default()
    };
    backoff.reset();
    backoff
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChain;
    use crate::db::MemoryStore;
    use crate::domain::units::from_whole_tokens;
    use crate::domain::PositionRef;
    use std::sync::Mutex;

    const STATE: Address = Address::repeat_byte(0xc3);
    const MARKET: Address = Address::repeat_byte(0x02);
    const SENDER: Address = Address::repeat_byte(0x0a);

    fn dec(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn market() -> Market {
        Market::new("WBTC/USD", MARKET)
    }

    fn build(position_id: u64, user_oi: U256, block: u64) -> BuildLog {
        BuildLog {
            sender: SENDER,
            position_id: U256::from(position_id),
            user_oi,
            block_number: block,
            transaction_hash: None,
            log_index: Some(position_id),
        }
    }

    fn chain_with(cap_oi: U256, position_id: u64, cost: U256) -> Arc<MockChain> {
        let position = PositionRef::new(SENDER, U256::from(position_id));
        Arc::new(
            MockChain::new()
                .with_uint_response(STATE, abi::encode_cap_oi(MARKET), cap_oi)
                .with_uint_response(STATE, abi::encode_cost(MARKET, &position), cost),
        )
    }

    fn reactor(chain: Arc<MockChain>, store: Arc<MemoryStore>) -> BuildReactor {
        BuildReactor::new(
            ChainReader::new(chain, Duration::from_secs(1)),
            store,
            STATE,
        )
    }

    #[test]
    fn percentage_uses_raw_amounts() {
        let pct = percentage_of_cap(from_whole_tokens(25), from_whole_tokens(1000)).unwrap();
        assert_eq!(pct, dec("2.5"));

        let pct = percentage_of_cap(U256::from(1u64), U256::from(3u64)).unwrap();
        assert_eq!(pct, dec("33.333333"));
    }

    #[test]
    fn percentage_overflow_is_a_scale_error() {
        assert!(percentage_of_cap(U256::MAX, U256::from(1u64)).is_err());
    }

    #[test]
    fn panic_messages_are_extracted() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
        let boxed: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }

    #[tokio::test]
    async fn react_records_snapshot_in_token_units() {
        let chain = chain_with(from_whole_tokens(1000), 7, from_whole_tokens(12));
        let store = Arc::new(MemoryStore::new());
        let r = reactor(chain, store.clone());

        let snapshot = r
            .react(&market(), &build(7, from_whole_tokens(50), 42))
            .await
            .unwrap();
        assert_eq!(snapshot.cap_oi, dec("1000"));
        assert_eq!(snapshot.user_oi, dec("50"));
        assert_eq!(snapshot.collateral_in_ovl, dec("12"));
        assert_eq!(snapshot.percentage_of_cap_oi_bought, dec("5"));
        assert_eq!(snapshot.block_number, 42);
        assert_eq!(store.builds(), vec![snapshot]);
    }

    #[tokio::test]
    async fn repeated_event_is_recorded_once() {
        let chain = chain_with(from_whole_tokens(1000), 7, from_whole_tokens(12));
        let store = Arc::new(MemoryStore::new());
        let r = reactor(chain, store.clone());
        let b = build(7, from_whole_tokens(50), 42);

        r.react(&market(), &b).await.unwrap();
        r.react(&market(), &b).await.unwrap();
        assert_eq!(store.builds().len(), 1);
    }

    #[tokio::test]
    async fn zero_capacity_is_an_error() {
        let chain = chain_with(U256::ZERO, 7, from_whole_tokens(12));
        let store = Arc::new(MemoryStore::new());
        let err = reactor(chain, store.clone())
            .react(&market(), &build(7, from_whole_tokens(50), 42))
            .await
            .unwrap_err();
        assert!(matches!(err, MonitorError::ZeroCapacity(_)));
        assert!(store.builds().is_empty());
    }

    #[tokio::test]
    async fn failed_call_is_a_call_error() {
        // No cost response configured for position 8.
        let chain = chain_with(from_whole_tokens(1000), 7, from_whole_tokens(12));
        let err = reactor(chain, Arc::new(MemoryStore::new()))
            .react(&market(), &build(8, from_whole_tokens(50), 42))
            .await
            .unwrap_err();
        assert!(matches!(err, MonitorError::ChainCall(_)));
    }

    /// Panics on position id 1, records every id it sees.
    #[derive(Default)]
    struct FlakyHandler {
        seen: Mutex<Vec<u64>>,
    }

    #[async_trait]
    impl BuildHandler for FlakyHandler {
        async fn handle(&self, n: &BuildNotification) -> Result<(), MonitorError> {
            let id: u64 = n.build.position_id.to();
            self.seen.lock().unwrap().push(id);
            match id {
                1 => panic!("handler blew up"),
                2 => Err(MonitorError::Decode("bad".to_string())),
                _ => Ok(()),
            }
        }
    }

    #[tokio::test]
    async fn worker_survives_panics_and_errors() {
        let handler = FlakyHandler::default();
        let (tx, rx) = mpsc::channel(8);
        for id in [1u64, 2, 3] {
            tx.send(BuildNotification {
                market: market(),
                build: build(id, U256::from(1u64), 1),
            })
            .await
            .unwrap();
        }
        drop(tx);

        drain(&handler, rx).await;
        assert_eq!(*handler.seen.lock().unwrap(), vec![1, 2, 3]);
    }
}
