use anyhow::Context;
use ovlstats::db::{CheckpointStore, SnapshotSink};
use ovlstats::orchestration::{
    BuildReactor, CostValueResolver, PollScheduler, ReactorSupervisor, SchedulerOptions,
    TransferAccumulator,
};
use ovlstats::{
    api, init_db, ChainReader, Config, MarketRegistry, MemoryStore, PersistenceMode, Repository,
    RpcChain,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    let config = Config::from_env().context("configuration error")?;
    let port = config.port;

    let handles = match config.persistence {
        PersistenceMode::Enabled => {
            let pool = init_db(&config.database_path)
                .await
                .with_context(|| format!("failed to initialize database {}", config.database_path))?;
            start(&config, Arc::new(Repository::new(pool)))?
        }
        PersistenceMode::Disabled => {
            tracing::info!("persistence disabled, snapshots are only logged");
            start(&config, Arc::new(MemoryStore::new()))?
        }
    };

    let app = api::create_router();
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await
        .context("server error")?;

    for handle in handles {
        handle.abort();
    }
    Ok(())
}

/// Spawn the poll scheduler and the build reactor over `store`.
fn start<S>(config: &Config, store: Arc<S>) -> anyhow::Result<Vec<JoinHandle<()>>>
where
    S: CheckpointStore + SnapshotSink + 'static,
{
    let chain = ChainReader::new(
        Arc::new(RpcChain::new(config.rpc_url.clone())),
        config.rpc_timeout,
    );
    let registry = Arc::new(MarketRegistry::new(config.markets.clone())?);
    let checkpoints: Arc<dyn CheckpointStore> = store.clone();
    let sink: Arc<dyn SnapshotSink> = store;

    let scheduler = Arc::new(PollScheduler::new(
        chain.clone(),
        registry.clone(),
        CostValueResolver::new(chain.clone(), config.state_contract),
        TransferAccumulator::new(
            chain.clone(),
            checkpoints,
            registry.clone(),
            config.token_address,
            config.scan_boundary,
        ),
        sink.clone(),
        SchedulerOptions {
            overlap: config.overlap_policy,
            upnl_enabled: config.upnl_enabled,
        },
    ));

    let reactor = Arc::new(BuildReactor::new(chain.clone(), sink, config.state_contract));
    let supervisor = ReactorSupervisor::new(chain, reactor, config.build_poll_interval);

    tracing::info!(
        markets = registry.len(),
        poll_interval_secs = config.poll_interval.as_secs(),
        "starting monitors"
    );

    let mut handles = supervisor.spawn(&registry);
    handles.push(scheduler.spawn(config.poll_interval));
    Ok(handles)
}
