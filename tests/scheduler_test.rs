//! Poll scheduler cycles against a mock chain and a SQLite store.

use alloy::primitives::{Address, U256};
use ovlstats::chain::abi;
use ovlstats::db::repo::SnapshotTable;
use ovlstats::db::CheckpointStore;
use ovlstats::domain::units::from_whole_tokens;
use ovlstats::metrics::{UPNL_LOSS, UPNL_PROFIT};
use ovlstats::orchestration::{
    AccumulationOutcome, CostValueResolver, PollScheduler, ScanBoundary, SchedulerOptions,
    TickOutcome, TickReport, TransferAccumulator,
};
use ovlstats::{
    init_db, ChainReader, Decimal, Market, MarketRegistry, MarketSymbol, MockChain, MonitorError,
    PositionRef, Repository,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const STATE: Address = Address::repeat_byte(0xc3);
const TOKEN: Address = Address::repeat_byte(0x0e);
const WBTC: Address = Address::repeat_byte(0x21);
const ETH: Address = Address::repeat_byte(0x22);
const TRADER: Address = Address::repeat_byte(0x0a);

async fn setup_repo() -> (TempDir, Arc<Repository>) {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("test.db");
    let pool = tokio_test::assert_ok!(init_db(db_path.to_str().unwrap()).await);
    (dir, Arc::new(Repository::new(pool)))
}

fn scheduler(
    chain: Arc<MockChain>,
    repo: Arc<Repository>,
    markets: Vec<Market>,
    boundary: ScanBoundary,
) -> PollScheduler {
    let reader = ChainReader::new(chain, Duration::from_secs(2));
    let registry = Arc::new(MarketRegistry::new(markets).unwrap());
    PollScheduler::new(
        reader.clone(),
        registry.clone(),
        CostValueResolver::new(reader.clone(), STATE),
        TransferAccumulator::new(reader, repo.clone(), registry, TOKEN, boundary),
        repo,
        SchedulerOptions::default(),
    )
}

/// A chain with one WBTC/USD position costing 12 OVL and worth 15 OVL.
fn wbtc_chain() -> MockChain {
    let position = PositionRef::new(TRADER, U256::from(1));
    MockChain::new()
        .with_block_number(10)
        .with_log(MockChain::build_log(WBTC, TRADER, 1, from_whole_tokens(50), 3))
        .with_uint_response(STATE, abi::encode_cost(WBTC, &position), from_whole_tokens(12))
        .with_uint_response(STATE, abi::encode_value(WBTC, &position), from_whole_tokens(15))
}

async fn run(s: &PollScheduler) -> TickReport {
    match s.tick().await {
        TickOutcome::Completed(report) => report,
        TickOutcome::Skipped => panic!("tick unexpectedly skipped"),
    }
}

#[tokio::test]
async fn test_first_cycle_records_histogram_and_initializes_checkpoint() {
    let (_dir, repo) = setup_repo().await;
    let chain = Arc::new(wbtc_chain());
    let s = scheduler(
        chain,
        repo.clone(),
        vec![Market::new("WBTC/USD", WBTC)],
        ScanBoundary::Inclusive,
    );

    let report = run(&s).await;
    assert!(report.failed.is_empty());
    let cycle = &report.completed[0];
    assert_eq!(cycle.histogram, [0, 1, 0, 0, 0]);
    assert_eq!(cycle.positions, 1);
    assert!(matches!(cycle.transfers, AccumulationOutcome::Initialized(_)));

    let symbol = MarketSymbol::new("WBTC/USD");
    let histogram = repo.latest_position_histogram(&symbol).await.unwrap().unwrap();
    assert_eq!(histogram.counts, [0, 1, 0, 0, 0]);

    let upnl = repo.latest_upnl(&symbol).await.unwrap().unwrap();
    assert_eq!(upnl.total_unrealized_profit, Decimal::from(3u32));
    assert_eq!(upnl.total_unrealized_loss, Decimal::zero());

    let checkpoint = repo.get_checkpoint(&symbol).await.unwrap().unwrap();
    assert_eq!(checkpoint.last_block_number, 0);
    assert!(checkpoint.total_minted.is_zero());
    assert!(checkpoint.total_burnt.is_zero());
}

#[tokio::test]
async fn test_transfer_totals_accumulate_without_double_counting() {
    let (_dir, repo) = setup_repo().await;
    let chain = Arc::new(wbtc_chain());
    let s = scheduler(
        chain.clone(),
        repo.clone(),
        vec![Market::new("WBTC/USD", WBTC)],
        ScanBoundary::Inclusive,
    );
    let symbol = MarketSymbol::new("WBTC/USD");

    run(&s).await;

    chain.push_log(MockChain::transfer_log(TOKEN, Address::ZERO, WBTC, from_whole_tokens(100), 11));
    chain.push_log(MockChain::transfer_log(TOKEN, WBTC, Address::ZERO, from_whole_tokens(40), 12));
    chain.set_block_number(15);

    let report = run(&s).await;
    let checkpoint = report.completed[0].transfers.checkpoint();
    assert_eq!(checkpoint.last_block_number, 15);
    assert_eq!(checkpoint.total_minted, Decimal::from(100u32));
    assert_eq!(checkpoint.total_burnt, Decimal::from(40u32));

    // Head unchanged and nothing at the boundary block: totals stay put.
    run(&s).await;
    let stored = repo.get_checkpoint(&symbol).await.unwrap().unwrap();
    assert_eq!(stored.last_block_number, 15);
    assert_eq!(stored.total_minted, Decimal::from(100u32));
    assert_eq!(stored.total_burnt, Decimal::from(40u32));

    // One histogram and one uPnL document per cycle.
    assert_eq!(repo.count_rows(SnapshotTable::Positions, &symbol).await.unwrap(), 3);
    assert_eq!(repo.count_rows(SnapshotTable::Upnls, &symbol).await.unwrap(), 3);
}

#[tokio::test]
async fn test_exclusive_boundary_skips_checkpoint_block() {
    let (_dir, repo) = setup_repo().await;
    let chain = Arc::new(wbtc_chain());
    let s = scheduler(
        chain.clone(),
        repo.clone(),
        vec![Market::new("WBTC/USD", WBTC)],
        ScanBoundary::Exclusive,
    );

    run(&s).await;
    chain.push_log(MockChain::transfer_log(TOKEN, Address::ZERO, WBTC, from_whole_tokens(7), 12));
    chain.set_block_number(12);
    run(&s).await;
    run(&s).await;

    let stored = repo
        .get_checkpoint(&MarketSymbol::new("WBTC/USD"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.total_minted, Decimal::from(7u32));
}

#[tokio::test]
async fn test_failing_market_does_not_block_the_next() {
    let (_dir, repo) = setup_repo().await;
    // ETH/USD has a position whose cost the state contract cannot answer.
    let chain = Arc::new(
        wbtc_chain().with_log(MockChain::build_log(ETH, TRADER, 9, from_whole_tokens(5), 4)),
    );
    let s = scheduler(
        chain,
        repo.clone(),
        vec![
            Market::new("ISO-ETH/USD", ETH),
            Market::new("WBTC/USD", WBTC),
        ],
        ScanBoundary::Inclusive,
    );

    let report = run(&s).await;
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].market.as_str(), "ISO-ETH/USD");
    assert_eq!(report.failed[0].op, "resolve_positions");
    assert!(matches!(report.failed[0].error, MonitorError::ChainCall(_)));
    assert_eq!(report.completed.len(), 1);
    assert_eq!(report.completed[0].market.as_str(), "WBTC/USD");

    let failed = MarketSymbol::new("ISO-ETH/USD");
    assert!(repo.latest_position_histogram(&failed).await.unwrap().is_none());
    assert!(repo.get_checkpoint(&failed).await.unwrap().is_none());

    assert!(UPNL_PROFIT.with_label_values(&["ISO-ETH/USD"]).get().is_nan());
    assert!(UPNL_LOSS.with_label_values(&["ISO-ETH/USD"]).get().is_nan());
    assert_eq!(UPNL_PROFIT.with_label_values(&["WBTC/USD"]).get(), 3.0);
}

#[tokio::test]
async fn test_query_failure_leaves_checkpoint_untouched() {
    let (_dir, repo) = setup_repo().await;
    let chain = Arc::new(wbtc_chain());
    let s = scheduler(
        chain.clone(),
        repo.clone(),
        vec![Market::new("QF-WBTC/USD", WBTC)],
        ScanBoundary::Inclusive,
    );
    run(&s).await;

    chain.fail_logs(true);
    chain.set_block_number(20);
    let report = run(&s).await;
    assert_eq!(report.failed[0].op, "fetch_builds");

    let stored = repo
        .get_checkpoint(&MarketSymbol::new("QF-WBTC/USD"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.last_block_number, 0);
}
