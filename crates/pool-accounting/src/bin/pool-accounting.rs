use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pool_accounting::{
    database::{MemoryStore, RedisStore, Store},
    metrics::{metrics_handler, register_metrics},
    oracle::NodeOracle,
    PoolConfig, PoolCoordinator,
};

#[derive(Parser, Debug)]
#[clap(name = "pool-accounting")]
#[clap(about = "Mining pool share windowing and reward settlement", long_about = None)]
struct Args {
    /// Redis URL for state storage
    #[clap(long, env = "POOL_REDIS_URL", default_value = "redis://localhost:6379")]
    redis_url: String,

    /// Keep all state in memory instead of Redis
    #[clap(long, env = "POOL_MEMORY_STORE")]
    memory_store: bool,

    /// Full node REST API used to check block confirmations
    #[clap(long, env = "POOL_NODE_URL", default_value = "http://127.0.0.1:9053")]
    node_url: String,

    /// Node request timeout in seconds
    #[clap(long, env = "POOL_NODE_TIMEOUT_SECS", default_value = "10")]
    node_timeout_secs: u64,

    /// Pool name
    #[clap(long, env = "POOL_NAME", default_value = "Mining Pool")]
    pool_name: String,

    /// Reward algorithm: PROP, PPS or PPLNS
    #[clap(long, env = "POOL_ALGORITHM", default_value = "PROP")]
    algorithm: String,

    /// Block reward in atomic units
    #[clap(long, env = "POOL_BLOCK_REWARD", default_value = "67500000000")]
    block_reward: u64,

    /// PPS payment per valid share weight
    #[clap(long, env = "POOL_PPS_RATE", default_value = "1000000")]
    pps_rate: u64,

    /// Number of most recent shares counted by PPLNS
    #[clap(long, env = "POOL_PPLNS_N", default_value = "1000")]
    pplns_n: usize,

    /// Share weighting: count or difficulty
    #[clap(long, env = "POOL_SHARE_WEIGHTING", default_value = "count")]
    share_weighting: String,

    /// Count invalid shares in the split denominator
    #[clap(long, env = "POOL_PENALIZE_INVALID")]
    penalize_invalid: bool,

    /// Pool fee in basis points
    #[clap(long, env = "POOL_FEE_BPS", default_value = "0")]
    pool_fee_bps: u32,

    /// Maximum credit per miner per window
    #[clap(long, env = "POOL_MAX_REWARD_PER_MINER")]
    max_reward_per_miner: Option<u64>,

    /// Block depth required before a window settles
    #[clap(long, env = "POOL_CONFIRMATIONS", default_value = "720")]
    confirmations_required: u64,

    /// Seconds between confirmation passes
    #[clap(long, env = "POOL_CONFIRMATION_POLL_SECS", default_value = "60")]
    confirmation_poll_secs: u64,

    /// Confirmed balance at which the threshold sweep pays a miner
    #[clap(long, env = "POOL_WITHDRAW_THRESHOLD", default_value = "1000000000")]
    withdraw_threshold: u64,

    /// Lowest sweep threshold a miner may choose
    #[clap(long, env = "POOL_MIN_WITHDRAW_THRESHOLD", default_value = "100000000")]
    min_withdraw_threshold: u64,

    /// Highest sweep threshold a miner may choose
    #[clap(long, env = "POOL_MAX_WITHDRAW_THRESHOLD", default_value = "10000000000000")]
    max_withdraw_threshold: u64,

    /// Create miners on their first share
    #[clap(long, env = "POOL_AUTO_REGISTER_MINERS")]
    auto_register_miners: bool,

    /// HTTP bind address for /metrics and /health
    #[clap(long, env = "POOL_HTTP_BIND", default_value = "0.0.0.0:8080")]
    http_bind: SocketAddr,
}

impl Args {
    fn pool_config(&self) -> anyhow::Result<PoolConfig> {
        let config = PoolConfig {
            pool_name: self.pool_name.clone(),
            algorithm: self.algorithm.parse()?,
            block_reward: self.block_reward,
            pps_rate: self.pps_rate,
            pplns_n: self.pplns_n,
            share_weighting: self.share_weighting.parse()?,
            penalize_invalid: self.penalize_invalid,
            pool_fee_bps: self.pool_fee_bps,
            max_reward_per_miner: self.max_reward_per_miner,
            confirmations_required: self.confirmations_required,
            confirmation_poll_secs: self.confirmation_poll_secs,
            withdraw_threshold: self.withdraw_threshold,
            min_withdraw_threshold: self.min_withdraw_threshold,
            max_withdraw_threshold: self.max_withdraw_threshold,
            auto_register_miners: self.auto_register_miners,
        };
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = args.pool_config()?;

    info!("Starting {} accounting", config.pool_name);
    info!(
        "Reward algorithm {}, {} confirmations required",
        config.algorithm, config.confirmations_required
    );

    register_metrics().context("registering metrics")?;

    let oracle = Arc::new(NodeOracle::new(
        &args.node_url,
        Duration::from_secs(args.node_timeout_secs),
    )?);
    info!("Checking confirmations against {}", args.node_url);

    if args.memory_store {
        warn!("Using in-memory store, state is lost on shutdown");
        run(Arc::new(MemoryStore::new()), oracle, config, args.http_bind).await
    } else {
        info!("Redis URL: {}", args.redis_url);
        let store = RedisStore::new(&args.redis_url)
            .await
            .context("connecting to redis")?;
        run(Arc::new(store), oracle, config, args.http_bind).await
    }
}

async fn run<S: Store>(
    store: Arc<S>,
    oracle: Arc<NodeOracle>,
    config: PoolConfig,
    http_bind: SocketAddr,
) -> anyhow::Result<()> {
    let poll_every = Duration::from_secs(config.confirmation_poll_secs);
    let coordinator = Arc::new(PoolCoordinator::new(store, oracle, config)?);

    let window = coordinator.current_window().await?;
    info!("Window {} is open", window.id);

    let poller = coordinator.clone();
    let confirmations = tokio::spawn(async move {
        let mut interval = tokio::time::interval(poll_every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(e) = poller.poll_confirmations().await {
                error!("Confirmation pass failed: {}", e);
            }
        }
    });

    let router = axum::Router::new()
        .route("/metrics", axum::routing::get(|| async { metrics_handler() }))
        .route("/health", axum::routing::get(|| async { "OK" }));

    let listener = tokio::net::TcpListener::bind(http_bind)
        .await
        .with_context(|| format!("binding {}", http_bind))?;
    info!("HTTP listening on {}", http_bind);

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Received shutdown signal");
        })
        .await?;

    confirmations.abort();
    info!("Pool accounting shutting down");
    Ok(())
}
