//! # sqlfan API server
//!
//! Multi-target SQL fan-out: batches of SQL statements executed against
//! many MySQL databases concurrently, with per-statement result tables and
//! live progress.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p sqlfan-api -- --port 9092
//! ```

use sqlfan_api::{app, config::Config};
use sqlfan_runner::{IntervalScheduler, LogOnlyDocJob};
use sqlfan_shared::config_cache::ConfigCache;
use sqlfan_shared::db::store::{open_store, StoreConfig};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sqlfan_api=info,sqlfan_runner=info,sqlfan_shared=info,tower_http=info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("sqlfan API server v{} starting", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env();

    // a store failure is fatal: exit non-zero
    let pool = open_store(&StoreConfig::default()).await?;

    let configs = Arc::new(ConfigCache::new(pool.clone()));
    configs.init_defaults().await?;
    tracing::info!("Config cache initialized");

    // one handler instance serves both the scheduler and the manual trigger
    let doc_handler: Arc<dyn sqlfan_runner::DocJobHandler> = Arc::new(LogOnlyDocJob);

    let scheduler = Arc::new(IntervalScheduler::new(pool.clone(), doc_handler.clone()));
    let scheduler_shutdown = scheduler.shutdown_token();
    let scheduler_handle = scheduler.start();

    let state = app::AppState::new(pool, configs, doc_handler);
    let router = app::build_router(state);

    let bind_addr = config.bind_address();
    tracing::info!("Server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // stop the tick; dispatched jobs run to completion on the runtime
    scheduler_shutdown.cancel();
    let _ = scheduler_handle.await;

    tracing::info!("Server shut down gracefully");
    Ok(())
}

/// Graceful shutdown handler
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C signal handler");
    tracing::info!("Shutdown signal received, shutting down");
}
