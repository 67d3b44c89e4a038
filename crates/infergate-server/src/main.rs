#![doc = include_str!("../README.md")]

mod server;

use clap::Parser;
use core::time::Duration;
use infergate_core::{Dispatcher, Metrics};
use server::config::{CliArgs, ServerConfig};
use server::service::handler::router;
use server::telemetry::{TelemetryProviders, init_telemetry};
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

    let providers = init_telemetry()?;

    let dispatcher = Arc::new(Dispatcher::new(
        config.dispatch.clone(),
        Arc::new(config.model.clone()),
        Arc::new(Metrics::new()),
    ));

    let listener = TcpListener::bind(&config.server_addr).await?;
    log_startup_info(&config.server_addr, &config);

    axum::serve(listener, router(Arc::clone(&dispatcher)))
        .with_graceful_shutdown(shutdown_signal(
            dispatcher,
            config.shutdown_timeout,
            providers,
        ))
        .await?;

    #[cfg(feature = "tracing")]
    tracing::info!("Service shut down successfully");
    Ok(())
}

fn log_startup_info(_addr: &str, _config: &ServerConfig) {
    if cfg!(debug_assertions) {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Starting inference gateway on {} with full config: {:#?}",
            _addr,
            _config
        );
    } else {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Starting inference gateway on {} in {:?} mode with {} workers",
            _addr,
            _config.dispatch.mode(),
            _config.dispatch.concurrency()
        );
    }
}

async fn shutdown_signal(
    dispatcher: Arc<Dispatcher>,
    grace: Duration,
    providers: TelemetryProviders,
) {
    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    tokio::select! {
        () = ctrl_c => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received Ctrl+C signal");
        },
        () = terminate => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received SIGTERM signal");
        },
    }

    #[cfg(feature = "tracing")]
    tracing::info!("Shutdown signal received, terminating gracefully...");

    // 1. Drain (or abort) the dispatch core so every waiting handler answers
    if let Err(_e) = dispatcher.shutdown(grace).await {
        #[cfg(feature = "tracing")]
        tracing::error!("Error during dispatcher shutdown: {:?}", _e);
    }

    // 2. Export whatever telemetry is left
    providers.shutdown();
}
