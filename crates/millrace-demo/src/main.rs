#![doc = include_str!("../README.md")]

mod demo;

use clap::Parser;
use demo::config::{CliArgs, DemoConfig};
use demo::scenarios;
use demo::telemetry::init_telemetry;
use tokio::signal;
use tokio_util::sync::CancellationToken;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = DemoConfig::try_from(args)?;

    init_telemetry(config.log_format)?;
    log_startup_info(&config);

    let token = CancellationToken::new();
    let signals = tokio::spawn(shutdown_signal(token.clone()));

    let res = scenarios::run(&config, token).await;
    signals.abort();

    match &res {
        Ok(()) => tracing::info!("Scenario {:?} finished", config.scenario),
        Err(e) => tracing::error!("Scenario {:?} failed: {e:#}", config.scenario),
    }
    res
}

fn log_startup_info(config: &DemoConfig) {
    if cfg!(debug_assertions) {
        tracing::info!("Starting scenario with full config: {:#?}", config);
    } else {
        tracing::info!(
            "Starting scenario {:?}: {} jobs on {} workers",
            config.scenario,
            config.jobs,
            config.workers
        );
    }
}

/// Cancels `token` on Ctrl+C or SIGTERM. Running jobs finish; everything
/// else stops at its next suspension point.
async fn shutdown_signal(token: CancellationToken) {
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

    tracing::info!("Cancelling the run, letting in-flight jobs finish...");
    token.cancel();
}
