// src/main.rs
use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod config;
mod health;
mod metrics;
mod pool;
mod server;

use crate::{
    config::Cli,
    metrics::MetricsRegistry,
    pool::BackendPool,
    server::{AppRouter, ControlPlane, MetricsEndpoint, RequestHandler, ServerBuilder},
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli)?;

    info!(port = cli.port, scheduler = %cli.scheduler, "starting layer7-lb");

    let metrics = Arc::new(MetricsRegistry::new());
    let pool = Arc::new(BackendPool::new(metrics.clone(), cli.health_check_interval));

    pool.set_scheduler(&cli.scheduler)
        .await
        .map_err(|e| anyhow::anyhow!("invalid --scheduler: {e}"))?;
    for (url, weight) in &cli.backends {
        info!(%url, weight, "seeding backend");
        pool.add(url.clone(), *weight).await;
    }

    pool.start_health_checks().await;
    pool.start_stats_cleanup().await;

    let router = AppRouter::new(ControlPlane::new(pool.clone()), RequestHandler::new(pool.clone()));
    let addr: SocketAddr = ([0, 0, 0, 0], cli.port).into();
    let main_server = tokio::spawn(async move {
        if let Err(e) = ServerBuilder::new(addr).with_handler(router).serve().await {
            tracing::error!(%e, "main server error");
        }
    });

    let metrics_server = if cli.metrics_enabled() {
        let metrics_addr: SocketAddr = ([0, 0, 0, 0], cli.metrics_port).into();
        let endpoint = MetricsEndpoint::new(metrics.clone());
        Some(tokio::spawn(async move {
            if let Err(e) = ServerBuilder::new(metrics_addr)
                .with_handler(endpoint)
                .serve()
                .await
            {
                tracing::error!(%e, "metrics server error");
            }
        }))
    } else {
        None
    };

    shutdown_signal().await;
    info!("shutting down");

    main_server.abort();
    if let Some(handle) = metrics_server {
        handle.abort();
    }
    pool.stop_health_checks().await;
    pool.stop_stats_cleanup().await;

    Ok(())
}

fn init_tracing(cli: &Cli) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log_level.to_string()));

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true));

    match &cli.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            registry
                .with(tracing_subscriber::fmt::layer().with_writer(file).with_ansi(false))
                .try_init()?;
        }
        None => {
            registry.try_init()?;
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
