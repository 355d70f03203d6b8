use std::sync::Arc;

use clap::Parser;
use countdown_core::{CountdownConfig, DurableStore, FileStore, NullSink, PgSnapshotSink, SnapshotSink};
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use countdown_server::server;
use countdown_server::subsystems::registry::CoordinatorRegistry;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "countdown.toml")]
    config: String,

    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Load config
    let config = match CountdownConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Init logging: RUST_LOG wins, config level is the fallback
    let default_level = config
        .service
        .log_level
        .parse()
        .unwrap_or(tracing::Level::INFO);
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(default_level.into()))
        .init();

    let store = FileStore::new(&config.storage.data_dir);
    if let Err(e) = store.health_check().await {
        eprintln!("Data directory {} is not writable: {}", config.storage.data_dir, e);
        std::process::exit(1);
    }

    // Snapshot sink is optional; without a database the coordinators still commit locally
    let pool = match &config.database {
        Some(db) => match countdown_core::db::create_pool(db).await {
            Ok(p) => Some(p),
            Err(e) => {
                eprintln!("Failed to connect to database: {}", e);
                std::process::exit(1);
            }
        },
        None => None,
    };

    if args.health {
        println!("✅ Data directory writable: {}", config.storage.data_dir);
        match &pool {
            Some(pool) => match countdown_core::db::health_check(pool).await {
                Ok(v) => println!("✅ PostgreSQL connected: {}", v),
                Err(e) => {
                    println!("❌ PostgreSQL connection failed: {}", e);
                    std::process::exit(1);
                }
            },
            None => println!("➖ No [database] configured, snapshot sink disabled"),
        }

        println!("✅ Countdown health check passed");
        return Ok(());
    }

    let sink: Arc<dyn SnapshotSink> = match pool {
        Some(pool) => Arc::new(PgSnapshotSink::initialize(pool).await?),
        None => {
            tracing::warn!("No [database] configured; snapshots and audit events will be discarded");
            Arc::new(NullSink)
        }
    };
    let store: Arc<dyn DurableStore> = Arc::new(store);

    let registry = Arc::new(
        CoordinatorRegistry::new(store, sink, config.coordinator.mailbox_capacity)
            .with_idle_timeout(config.coordinator.idle_timeout()),
    );
    tracing::info!(
        store = registry.store_name(),
        sink = registry.sink_name(),
        data_dir = %config.storage.data_dir,
        idle_timeout_secs = config.coordinator.idle_timeout_secs,
        "Coordinator registry ready"
    );

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    // HTTP REST API, if enabled
    if config.http.enabled {
        let http_registry = registry.clone();
        let http_config = config.clone();
        let http_shutdown = tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) =
                countdown_server::http::start_http_server(http_registry, http_config, http_shutdown)
                    .await
            {
                tracing::error!("HTTP server error: {}", e);
            }
        });
    }

    let socket_path = config.service.socket_path.clone();
    server::run_unix_server(&socket_path, registry, tx.subscribe()).await?;

    Ok(())
}
