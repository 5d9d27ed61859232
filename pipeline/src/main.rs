use anyhow::Result;
use chrono::Utc;
use common::{Direction, Signal};
use execution::{
    BrokerRegistry, BrokerRoute, ExecutionLedger, InMemoryLedger, OrderRouter, PaperBroker,
    PgLedger, Reconciler,
};
use pipeline::config::{load_config, PipelineConfig};
use pipeline::{
    signal_channel, LogSink, PipelineCoordinator, PipelineMetrics, SignalSender,
    StaticSnapshotProvider,
};
use rust_decimal::Decimal;
use signal_validation::risk::MarketState;
use signal_validation::{InMemorySignalCache, RiskEngine, SignalValidator};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    fmt().with_max_level(Level::INFO).init();

    let config_path =
        std::env::var("PIPELINE_CONFIG").unwrap_or_else(|_| "pipeline.toml".to_string());
    let config = match load_config(&config_path) {
        Ok(config) => {
            info!("Loaded configuration from {}", config_path);
            config
        }
        Err(e) => {
            warn!("Could not load {} ({}), using defaults", config_path, e);
            PipelineConfig::default()
        }
    };

    let metrics = Arc::new(PipelineMetrics::new()?);

    // Ledger: Postgres when configured, in-memory otherwise
    let ledger: Arc<dyn ExecutionLedger> = match &config.database_url {
        Some(url) => {
            let pool = Arc::new(
                PgPoolOptions::new()
                    .max_connections(5)
                    .connect(url)
                    .await?,
            );
            let pg = PgLedger::new(pool);
            pg.initialize().await?;
            info!("Using Postgres execution ledger");
            Arc::new(pg)
        }
        None => {
            info!("Using in-memory execution ledger");
            Arc::new(InMemoryLedger::new())
        }
    };

    let mut registry = BrokerRegistry::new();
    registry.register(Arc::new(PaperBroker::new("paper")));
    for route in &config.brokers {
        let mut broker_route = BrokerRoute::new(&route.primary);
        for fallback in &route.fallbacks {
            broker_route = broker_route.with_fallback(fallback);
        }
        registry.set_route(&route.asset_class, broker_route);
    }
    let registry = Arc::new(registry);

    // Resolve submissions left open by a previous run before consuming
    let reconciler = Reconciler::new(ledger.clone(), registry.clone(), config.reconciler.clone());
    let recovered = reconciler.recover().await?;
    if recovered > 0 {
        info!("Reconciled {} open submission(s) from previous run", recovered);
    }

    let validator = Arc::new(SignalValidator::new(
        Arc::new(InMemorySignalCache::new(config.cache_ttl_secs)),
        RiskEngine::new(config.policy.clone()),
    ));
    let router = Arc::new(OrderRouter::new(
        ledger.clone(),
        registry,
        config.router.clone(),
    ));

    let snapshots = Arc::new(StaticSnapshotProvider::new(Decimal::from(100_000)));
    seed_demo_markets(&snapshots);

    let coordinator = Arc::new(PipelineCoordinator::new(
        validator,
        router,
        ledger,
        snapshots,
        Arc::new(LogSink),
        metrics.clone(),
        config.coordinator.clone(),
    ));

    let (sender, source) = signal_channel(config.queue_buffer);
    let sender = sender.with_depth_gauge(metrics.queue_depth.clone());
    let source = source.with_depth_gauge(metrics.queue_depth.clone());

    let mut workers = Vec::new();
    for _ in 0..config.workers {
        let coordinator = coordinator.clone();
        let source = source.clone();
        workers.push(tokio::spawn(async move { coordinator.run(source).await }));
    }
    info!("Pipeline started with {} worker(s)", config.workers);

    if std::env::args().any(|arg| arg == "--demo") {
        run_demo(&sender).await?;
        tokio::time::sleep(Duration::from_secs(1)).await;
    } else {
        tokio::signal::ctrl_c().await?;
        info!("Shutdown signal received");
    }

    // Dropping the producer closes the queue; workers drain and exit
    drop(sender);
    for worker in workers {
        let _ = worker.await;
    }

    match metrics.render() {
        Ok(text) => info!("Final metrics:\n{}", text),
        Err(e) => warn!("Failed to render metrics: {}", e),
    }
    Ok(())
}

fn seed_demo_markets(snapshots: &StaticSnapshotProvider) {
    snapshots.set_market(
        "BTC/USDT",
        MarketState {
            last_price: Decimal::from(65_000),
            atr: Decimal::from(800),
            volatility: 0.025,
            volume_usd_24h: 12_000_000.0,
            news_blackout_until: None,
        },
    );
    snapshots.set_market(
        "ETH/USDT",
        MarketState {
            last_price: Decimal::from(3_200),
            atr: Decimal::from(60),
            volatility: 0.030,
            volume_usd_24h: 6_500_000.0,
            news_blackout_until: None,
        },
    );
    snapshots.set_market(
        "AAPL",
        MarketState {
            last_price: Decimal::from(230),
            atr: Decimal::from(4),
            volatility: 0.012,
            volume_usd_24h: 9_000_000.0,
            news_blackout_until: None,
        },
    );
}

/// Push a handful of signals through the pipeline: one clean buy, one clean
/// sell, one duplicate and one below the confidence floor.
async fn run_demo(sender: &SignalSender) -> Result<()> {
    info!("Running in demo mode");

    sender
        .send(demo_signal("BTC/USDT", Direction::Buy, 0.90, 0.95))
        .await?;
    sender
        .send(demo_signal("ETH/USDT", Direction::Sell, -0.70, 0.80))
        .await?;
    sender
        .send(demo_signal("BTC/USDT", Direction::Buy, 0.88, 0.92))
        .await?;
    sender
        .send(demo_signal("AAPL", Direction::Buy, 0.75, 0.60))
        .await?;

    Ok(())
}

fn demo_signal(instrument: &str, direction: Direction, score: f64, confidence: f64) -> Signal {
    Signal {
        id: Uuid::new_v4(),
        instrument: instrument.to_string(),
        timeframe: "1h".to_string(),
        direction,
        score,
        confidence,
        generated_at: Utc::now(),
        source_model_id: "demo".to_string(),
    }
}
