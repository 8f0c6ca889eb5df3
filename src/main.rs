//! Crash game server
//!
//! Runs the round engine, the price refresher and the HTTP/WebSocket API in
//! one process until Ctrl+C or SIGTERM.

use clap::Parser;
use crashline::{
    api::{ApiServer, AppState, WebSocketManager},
    config::{ConfigLoader, StorageBackend},
    game_store::{GameStore, MemoryGameStore, RocksGameStore},
    games::{BetCashoutCoordinator, RoundLifecycleManager, RoundTable},
    metrics::EngineMetrics,
    prices::{CoinGeckoSource, PriceCache},
    EventBroadcaster, RocksStorage,
};
use std::sync::Arc;
use tokio::{signal, sync::broadcast};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "crash-server")]
#[command(about = "Crash betting round engine with HTTP and WebSocket API", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(long)]
    config: Option<String>,

    /// API server host
    #[arg(long)]
    host: Option<String>,

    /// API server port
    #[arg(long)]
    port: Option<u16>,

    /// Database directory
    #[arg(long)]
    db_path: Option<String>,

    /// Keep all state in memory
    #[arg(long)]
    in_memory: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "crashline=info,crash_server=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();

    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config {
        loader = loader.with_path(path);
    }
    let mut config = loader.load()?;

    if let Some(host) = args.host {
        config.api.host = host;
    }
    if let Some(port) = args.port {
        config.api.port = port;
    }
    if let Some(db_path) = args.db_path {
        config.storage.data_directory = db_path;
    }
    if args.in_memory {
        config.storage.backend = StorageBackend::Memory;
    }
    if config.game.ensure_server_seed() {
        warn!("No server seed configured; generated a random one for this run");
    }

    let metrics = Arc::new(EngineMetrics::new()?);
    let events = EventBroadcaster::default();
    let table = Arc::new(RoundTable::new());

    let mut last_round_id = 0;
    let store: Arc<dyn GameStore> = match config.storage.backend {
        StorageBackend::Rocksdb => {
            info!("Opening database: {}", config.storage.data_directory);
            let storage = RocksStorage::open(
                &config.storage.data_directory,
                config.storage.clear_on_start,
            )?;
            let store = RocksGameStore::new(storage);
            if let Some(latest) = store.recent_rounds(1)?.first() {
                last_round_id = latest.round_id;
            }
            Arc::new(store)
        }
        StorageBackend::Memory => {
            warn!("Using in-memory storage; wallets and rounds are lost on exit");
            Arc::new(MemoryGameStore::new())
        }
    };

    let source = CoinGeckoSource::new(
        config.prices.source_url.clone(),
        config.prices.request_timeout(),
    )?;
    let prices = Arc::new(
        PriceCache::new(Arc::new(source), &config.prices).with_metrics(metrics.clone()),
    );

    let coordinator = Arc::new(
        BetCashoutCoordinator::new(
            table.clone(),
            store.clone(),
            prices.clone(),
            events.clone(),
            config.game.starting_balance,
        )
        .with_metrics(metrics.clone()),
    );
    let engine = Arc::new(
        RoundLifecycleManager::new(table, store, events.clone(), &config.game)
            .with_metrics(metrics.clone())
            .resume_after(last_round_id),
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let refresher = prices.spawn_refresher(shutdown_tx.subscribe());
    let engine_task = engine.spawn(shutdown_tx.subscribe());

    let state = Arc::new(AppState {
        coordinator,
        websocket_manager: Arc::new(WebSocketManager::new(events)),
        metrics,
        version: env!("CARGO_PKG_VERSION").to_string(),
    });

    let server = ApiServer::new(config.api.clone(), state);
    let mut server_shutdown = shutdown_tx.subscribe();
    let server_task = tokio::spawn(async move {
        server
            .run(async move {
                let _ = server_shutdown.recv().await;
            })
            .await
    });

    shutdown_signal().await;
    info!("Shutting down");
    let _ = shutdown_tx.send(());

    if let Err(e) = server_task.await? {
        warn!("API server exited with error: {}", e);
    }
    engine_task.await?;
    refresher.await?;

    info!("Crash server stopped");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C signal"),
        _ = terminate => info!("Received terminate signal"),
    }
}
