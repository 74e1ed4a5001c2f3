//! Prometheus metrics for market statistics.
//!
//! Per-market gauges mirror the latest persisted numbers; counters and
//! histograms track scheduler and reactor health.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()`. A failure means a duplicate metric
//! name, which is a programming error that should crash at first use.

use crate::domain::BUCKET_COUNT;
use crate::engine::BUCKET_BOUNDS;
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram, register_histogram_vec,
    register_int_counter, register_int_gauge_vec, CounterVec, GaugeVec, Histogram, HistogramVec,
    IntCounter, IntGaugeVec, TextEncoder,
};

/// Cumulative OVL minted into a market, in tokens.
pub static TOKEN_MINTED: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "ovl_token_minted",
        "Cumulative OVL minted to the market",
        &["market"]
    )
    .unwrap()
});

/// Cumulative OVL burnt by a market, in tokens.
pub static TOKEN_BURNT: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "ovl_token_burnt",
        "Cumulative OVL burnt from the market",
        &["market"]
    )
    .unwrap()
});

pub static UPNL_PROFIT: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "ovl_upnl_profit",
        "Total unrealized profit of open positions",
        &["market"]
    )
    .unwrap()
});

pub static UPNL_LOSS: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "ovl_upnl_loss",
        "Total unrealized loss of open positions",
        &["market"]
    )
    .unwrap()
});

/// Collateral still held by open positions, in tokens.
pub static COLLATERAL: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "ovl_collateral",
        "Remaining collateral of open positions",
        &["market"]
    )
    .unwrap()
});

/// Net unrealized PnL as a fraction of remaining collateral.
pub static UPNL_PCT: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "ovl_upnl_pct",
        "Net unrealized PnL over remaining collateral",
        &["market"]
    )
    .unwrap()
});

/// Open positions per collateral bucket.
/// Labels: market, bucket (e.g. "10-20")
pub static POSITION_BUCKET: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "ovl_position_bucket",
        "Open positions per collateral bucket",
        &["market", "bucket"]
    )
    .unwrap()
});

pub static OPEN_POSITIONS: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "ovl_open_positions",
        "Positions seen in the last cycle",
        &["market"]
    )
    .unwrap()
});

/// Share of capacity taken by each new position, in percent.
pub static BUILD_CAP_OI_PCT: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "ovl_build_cap_oi_pct",
        "Percentage of cap OI bought per build",
        &["market"],
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0]
    )
    .unwrap()
});

pub static BUILDS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ovl_builds_total",
        "Build events recorded",
        &["market"]
    )
    .unwrap()
});

/// Failures by market and kind (chain_call, chain_query, decode, ...).
pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ovl_errors_total",
        "Failures caught at a market or event boundary",
        &["market", "kind"]
    )
    .unwrap()
});

pub static TICK_DURATION_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "ovl_tick_duration_seconds",
        "Wall time of one scheduler tick over all markets",
        vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]
    )
    .unwrap()
});

pub static TICKS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("ovl_ticks_total", "Scheduler ticks completed").unwrap()
});

pub static TICKS_SKIPPED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "ovl_ticks_skipped_total",
        "Scheduler ticks skipped because the previous tick was still running"
    )
    .unwrap()
});

/// Market label of the samples summed over every market.
pub const ALL_MARKETS: &str = "ALL";

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    pub fn transfer_totals(market: &str, minted: f64, burnt: f64) {
        TOKEN_MINTED.with_label_values(&[market]).set(minted);
        TOKEN_BURNT.with_label_values(&[market]).set(burnt);
    }

    /// Transfer totals are unknown, e.g. the `ALL` sum after a market failed.
    pub fn transfer_totals_unknown(market: &str) {
        Self::transfer_totals(market, f64::NAN, f64::NAN);
    }

    pub fn collateral(market: &str, collateral: f64) {
        COLLATERAL.with_label_values(&[market]).set(collateral);
    }

    /// Profit, loss and their net share of `collateral` (NaN without collateral).
    pub fn upnl(market: &str, profit: f64, loss: f64, collateral: f64) {
        UPNL_PROFIT.with_label_values(&[market]).set(profit);
        UPNL_LOSS.with_label_values(&[market]).set(loss);
        let pct = if collateral == 0.0 {
            f64::NAN
        } else {
            (profit - loss) / collateral
        };
        UPNL_PCT.with_label_values(&[market]).set(pct);
    }

    /// Mark the market's PnL and collateral as unknown after a failed cycle.
    pub fn upnl_unknown(market: &str) {
        Self::upnl(market, f64::NAN, f64::NAN, f64::NAN);
        Self::collateral(market, f64::NAN);
    }

    pub fn position_buckets(market: &str, counts: &[u32; BUCKET_COUNT]) {
        for ((lo, hi), count) in BUCKET_BOUNDS.iter().zip(counts) {
            let bucket = format!("{}-{}", lo, hi);
            POSITION_BUCKET
                .with_label_values(&[market, bucket.as_str()])
                .set(i64::from(*count));
        }
    }

    pub fn open_positions(market: &str, count: usize) {
        OPEN_POSITIONS
            .with_label_values(&[market])
            .set(count as i64);
    }

    pub fn build_recorded(market: &str, pct_of_cap: f64) {
        BUILDS_TOTAL.with_label_values(&[market]).inc();
        BUILD_CAP_OI_PCT
            .with_label_values(&[market])
            .observe(pct_of_cap);
    }

    pub fn error(market: &str, kind: &str) {
        ERRORS_TOTAL.with_label_values(&[market, kind]).inc();
    }

    pub fn tick_completed(duration_secs: f64) {
        TICKS_TOTAL.inc();
        TICK_DURATION_SECONDS.observe(duration_secs);
    }

    pub fn tick_skipped() {
        TICKS_SKIPPED_TOTAL.inc();
    }

    /// Current value of the error counter, for tests and health checks.
    pub fn error_count(market: &str, kind: &str) -> f64 {
        ERRORS_TOTAL.with_label_values(&[market, kind]).get()
    }

    /// Render the default registry in Prometheus text format.
    pub fn render() -> Result<String, prometheus::Error> {
        TextEncoder::new().encode_to_string(&prometheus::gather())
    }
}
