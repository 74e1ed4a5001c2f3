use super::resolver::CostValueResolver;
use super::transfers::{AccumulationOutcome, TransferAccumulator};
use crate::chain::{abi, ChainReader};
use crate::db::SnapshotSink;
use crate::domain::{
    to_token_units, Decimal, MarketSymbol, PositionHistogram, PositionRef, UPnLSnapshot,
    BUCKET_COUNT,
};
use crate::engine::{aggregate_pnl, bucketize, CostValuePair, UnrealizedPnl};
use crate::error::MonitorError;
use crate::metrics::{Metrics, ALL_MARKETS};
use crate::registry::{Market, MarketRegistry};
use alloy::primitives::U256;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

/// What a tick does when the previous one is still running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverlapPolicy {
    /// Return immediately without polling.
    #[default]
    SkipIfBusy,
    /// Wait for the running tick, then poll.
    Queue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerOptions {
    pub overlap: OverlapPolicy,
    pub upnl_enabled: bool,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            overlap: OverlapPolicy::SkipIfBusy,
            upnl_enabled: true,
        }
    }
}

/// Collateral and uPnL of a market's open positions, in tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionTotals {
    pub collateral: Decimal,
    /// `None` when uPnL is disabled.
    pub upnl: Option<UnrealizedPnl>,
}

/// Result of one market's cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketCycle {
    pub market: MarketSymbol,
    pub positions: usize,
    pub histogram: [u32; BUCKET_COUNT],
    pub totals: PositionTotals,
    pub transfers: AccumulationOutcome,
}

/// A market cycle that stopped at `op`.
#[derive(Debug)]
pub struct MarketFailure {
    pub market: MarketSymbol,
    pub op: &'static str,
    pub error: MonitorError,
    /// Set when the failure came after the position totals were recorded.
    pub recorded: Option<PositionTotals>,
}

#[derive(Debug, Default)]
pub struct TickReport {
    pub completed: Vec<MarketCycle>,
    pub failed: Vec<MarketFailure>,
    pub duration: Duration,
}

#[derive(Debug)]
pub enum TickOutcome {
    Skipped,
    Completed(TickReport),
}

/// Periodically polls every market: positions, histogram, uPnL and transfer
/// totals.
pub struct PollScheduler {
    chain: ChainReader,
    registry: Arc<MarketRegistry>,
    resolver: CostValueResolver,
    accumulator: TransferAccumulator,
    sink: Arc<dyn SnapshotSink>,
    options: SchedulerOptions,
    running: Mutex<()>,
}

impl PollScheduler {
    pub fn new(
        chain: ChainReader,
        registry: Arc<MarketRegistry>,
        resolver: CostValueResolver,
        accumulator: TransferAccumulator,
        sink: Arc<dyn SnapshotSink>,
        options: SchedulerOptions,
    ) -> Self {
        Self {
            chain,
            registry,
            resolver,
            accumulator,
            sink,
            options,
            running: Mutex::new(()),
        }
    }

    /// Run one cycle over all markets in registry order.
    ///
    /// A failing market is logged and counted, then the next market runs.
    pub async fn tick(&self) -> TickOutcome {
        let _running = match self.options.overlap {
            OverlapPolicy::SkipIfBusy => match self.running.try_lock() {
                Ok(guard) => guard,
                Err(_) => {
                    info!("previous tick still running, skipping");
                    Metrics::tick_skipped();
                    return TickOutcome::Skipped;
                }
            },
            OverlapPolicy::Queue => self.running.lock().await,
        };

        let started = Instant::now();
        let mut report = TickReport::default();
        for market in self.registry.iter() {
            match self.poll_market(market).await {
                Ok(cycle) => report.completed.push(cycle),
                Err(failure) => {
                    warn!(
                        market = %failure.market,
                        op = failure.op,
                        kind = failure.error.kind(),
                        error = %failure.error,
                        "market cycle failed"
                    );
                    Metrics::error(failure.market.as_str(), failure.error.kind());
                    if failure.recorded.is_none() {
                        Metrics::upnl_unknown(failure.market.as_str());
                    }
                    report.failed.push(failure);
                }
            }
        }
        self.publish_totals(&report);

        report.duration = started.elapsed();
        Metrics::tick_completed(report.duration.as_secs_f64());
        info!(
            completed = report.completed.len(),
            failed = report.failed.len(),
            duration_ms = report.duration.as_millis() as u64,
            "tick finished"
        );
        TickOutcome::Completed(report)
    }

    /// Poll one market: every Build since genesis, their cost (and value),
    /// the histogram and uPnL snapshots, then transfer totals.
    pub async fn poll_market(&self, market: &Market) -> Result<MarketCycle, MarketFailure> {
        let fail = |op: &'static str| {
            let symbol = market.symbol.clone();
            move |error: MonitorError| MarketFailure {
                market: symbol,
                op,
                error,
                recorded: None,
            }
        };

        let logs = self
            .chain
            .get_logs(&abi::build_filter(market.address), 0)
            .await
            .map_err(|e| fail("fetch_builds")(MonitorError::ChainQuery(e)))?;
        let positions = logs
            .iter()
            .map(|log| abi::decode_build(log).map(|b| b.position()))
            .collect::<Result<Vec<PositionRef>, _>>()
            .map_err(|e| fail("fetch_builds")(MonitorError::Decode(e)))?;

        let (costs, pairs): (Vec<U256>, Option<Vec<CostValuePair>>) = if self.options.upnl_enabled {
            let pairs = self
                .resolver
                .resolve(market.address, &positions)
                .await
                .map_err(fail("resolve_positions"))?;
            (pairs.iter().map(|p| p.cost).collect(), Some(pairs))
        } else {
            let costs = self
                .resolver
                .resolve_costs(market.address, &positions)
                .await
                .map_err(fail("resolve_positions"))?;
            (costs, None)
        };

        let collateral = to_token_units(
            costs
                .iter()
                .fold(U256::ZERO, |sum, cost| sum.saturating_add(*cost)),
        )
        .map_err(|e| fail("sum_collateral")(e.into()))?;

        let histogram = bucketize(&costs);
        self.sink
            .record_position_histogram(&PositionHistogram::new(market.symbol.clone(), histogram))
            .await
            .map_err(|e| fail("record_histogram")(e.into()))?;
        Metrics::position_buckets(market.symbol.as_str(), &histogram);
        Metrics::open_positions(market.symbol.as_str(), positions.len());
        Metrics::collateral(market.symbol.as_str(), collateral.to_f64_lossy());

        let upnl = match pairs {
            Some(pairs) => {
                let pnl = aggregate_pnl(&pairs).map_err(|e| fail("aggregate_pnl")(e.into()))?;
                self.sink
                    .record_upnl(&UPnLSnapshot::new(market.symbol.clone(), pnl.profit, pnl.loss))
                    .await
                    .map_err(|e| fail("record_upnl")(e.into()))?;
                Metrics::upnl(
                    market.symbol.as_str(),
                    pnl.profit.to_f64_lossy(),
                    pnl.loss.to_f64_lossy(),
                    collateral.to_f64_lossy(),
                );
                Some(pnl)
            }
            None => None,
        };

        let totals = PositionTotals { collateral, upnl };
        let transfers = self
            .accumulator
            .accumulate(market)
            .await
            .map_err(|error| MarketFailure {
                market: market.symbol.clone(),
                op: "accumulate_transfers",
                error,
                recorded: Some(totals),
            })?;

        info!(
            market = %market.symbol,
            positions = positions.len(),
            histogram = ?histogram,
            block = transfers.checkpoint().last_block_number,
            "market cycle complete"
        );
        Ok(MarketCycle {
            market: market.symbol.clone(),
            positions: positions.len(),
            histogram,
            totals,
            transfers,
        })
    }

    /// Publish the `ALL` samples. A sum missing a market is published as
    /// unknown rather than understated.
    fn publish_totals(&self, report: &TickReport) {
        let recorded = report
            .completed
            .iter()
            .map(|cycle| Some(cycle.totals))
            .chain(report.failed.iter().map(|failure| failure.recorded));

        let mut collateral = 0.0;
        let (mut profit, mut loss) = (0.0, 0.0);
        let mut known = true;
        for totals in recorded {
            match totals {
                Some(totals) => {
                    collateral += totals.collateral.to_f64_lossy();
                    if let Some(pnl) = totals.upnl {
                        profit += pnl.profit.to_f64_lossy();
                        loss += pnl.loss.to_f64_lossy();
                    }
                }
                None => known = false,
            }
        }
        if known {
            Metrics::collateral(ALL_MARKETS, collateral);
            if self.options.upnl_enabled {
                Metrics::upnl(ALL_MARKETS, profit, loss, collateral);
            }
        } else {
            Metrics::upnl_unknown(ALL_MARKETS);
        }

        if report.failed.is_empty() {
            let (minted, burnt) = report.completed.iter().fold((0.0, 0.0), |(m, b), cycle| {
                let checkpoint = cycle.transfers.checkpoint();
                (
                    m + checkpoint.total_minted.to_f64_lossy(),
                    b + checkpoint.total_burnt.to_f64_lossy(),
                )
            });
            Metrics::transfer_totals(ALL_MARKETS, minted, burnt);
        } else {
            Metrics::transfer_totals_unknown(ALL_MARKETS);
        }
    }

    /// Tick every `period`.
    ///
    /// Under `Queue` ticks run inline, so an overrunning tick delays the next
    /// one and at most one tick is ever pending. Under `SkipIfBusy` each tick
    /// gets its own task and finds the previous one still holding the gate.
    pub fn spawn(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            match self.options.overlap {
                OverlapPolicy::Queue => {
                    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    loop {
                        interval.tick().await;
                        self.tick().await;
                    }
                }
                OverlapPolicy::SkipIfBusy => {
                    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                    loop {
                        interval.tick().await;
                        let this = self.clone();
                        tokio::spawn(async move {
                            this.tick().await;
                        });
                    }
                }
            }
        })
    }
}
