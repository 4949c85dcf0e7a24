#![doc = include_str!("../README.md")]

mod server;

use anyhow::Context;
use clap::Parser;
use idalloc::{
    Engine, RequestContext,
    cache::{CacheTierRef, MemoryCache, RedisCache},
    store::{DurableStoreRef, MemoryStore, SqliteStore},
};
use server::config::{CliArgs, ServerConfig, Storage};
use server::service::handler::{AppState, router};
use server::telemetry::init_telemetry;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    init_telemetry(config.log_format)?;

    let (cache, store) = build_adapters(&config).await?;
    let engine = Arc::new(Engine::new(config.engine.clone(), cache, store)?);
    engine
        .start(&RequestContext::background("startup"))
        .await
        .context("startup recovery failed")?;

    let listener = TcpListener::bind(&config.server_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server_addr))?;
    log_startup_info(&config);

    let state = AppState::new(Arc::clone(&engine));
    axum::serve(listener, router(state.clone()))
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;

    // The listener has stopped; finish the in-process work.
    engine.shutdown(config.shutdown_timeout).await;

    tracing::info!("Service shut down successfully");
    Ok(())
}

async fn build_adapters(config: &ServerConfig) -> anyhow::Result<(CacheTierRef, DurableStoreRef)> {
    match config.storage {
        Storage::Redis => {
            let cache: CacheTierRef = Arc::new(
                RedisCache::connect(&config.redis_url)
                    .await
                    .with_context(|| format!("failed to connect to {}", config.redis_url))?,
            );
            let store: DurableStoreRef = Arc::new(
                SqliteStore::open(&config.database_path)
                    .with_context(|| format!("failed to open {}", config.database_path))?,
            );
            Ok((cache, store))
        }
        Storage::Memory => {
            tracing::warn!("Running with in-process storage; IDs restart from 1 after exit");
            let cache: CacheTierRef = Arc::new(MemoryCache::new());
            let store: DurableStoreRef = Arc::new(MemoryStore::new());
            Ok((cache, store))
        }
    }
}

fn log_startup_info(config: &ServerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!(
            "Starting ID service on {} with full config: {:#?}",
            config.server_addr,
            config
        );
    } else {
        tracing::info!(
            "Starting ID service on {} ({:?} storage, batch size {})",
            config.server_addr,
            config.storage,
            config.engine.batch_size
        );
    }
}

async fn shutdown_signal(state: AppState) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                core::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = core::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            core::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }

    tracing::info!("Shutdown signal received, terminating gracefully...");

    // Publish the status; in-flight requests are allowed to finish.
    state.set_not_serving();
}
