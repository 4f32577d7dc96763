// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use alephium_watcher::config::WatcherNodeConfig;
use alephium_watcher::node::run_watcher_node;
use alephium_watcher::types::MessagePublication;
use axum::{extract::State, http::StatusCode, routing::get, Router};
use clap::Parser;
use prometheus::{Encoder, Registry, TextEncoder};
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use watcher_config::Config;

#[derive(Parser)]
#[clap(rename_all = "kebab-case")]
#[clap(name = env!("CARGO_BIN_NAME"))]
#[clap(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    #[clap(long)]
    pub config_path: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let config = WatcherNodeConfig::load(&args.config_path)?;
    let cancel = CancellationToken::new();

    let prometheus_registry = Registry::new();
    let metrics_address =
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), config.metrics_port);
    let metrics_server = start_prometheus_server(
        metrics_address,
        prometheus_registry.clone(),
        cancel.clone(),
    )
    .await?;
    info!("Metrics server started at port {}", config.metrics_port);

    let (message_tx, message_rx) = mpsc::channel(config.channel_size);
    let consumer = tokio::spawn(log_messages(message_rx));

    // Re-observation requests are sent through `node.obsv_tx`.
    let mut node = run_watcher_node(config, &prometheus_registry, message_tx, cancel.clone()).await?;

    let fatal = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received ctrl-c, shutting down");
            None
        }
        fatal = node.fatal_rx.recv() => fatal,
    };
    cancel.cancel();
    node.join().await;
    let _ = metrics_server.await;
    let _ = consumer.await;

    match fatal {
        Some(e) => {
            error!("Watcher stopped on fatal error: {}", e);
            Err(e.into())
        }
        None => Ok(()),
    }
}

async fn start_prometheus_server(
    address: SocketAddr,
    registry: Registry,
    cancel: CancellationToken,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    let listener = tokio::net::TcpListener::bind(address).await?;
    let router = Router::new()
        .route("/metrics", get(metrics))
        .with_state(registry);
    Ok(tokio::spawn(async move {
        let served = axum::serve(listener, router.into_make_service())
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await;
        if let Err(e) = served {
            error!("Metrics server stopped: {}", e);
        }
    }))
}

async fn metrics(State(registry): State<Registry>) -> (StatusCode, String) {
    let mut buffer = Vec::new();
    match TextEncoder::new().encode(&registry.gather(), &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            String::from_utf8_lossy(&buffer).into_owned(),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("unable to encode metrics: {}", e),
        ),
    }
}

// The relayer integration lives outside this binary; log what would be handed over.
async fn log_messages(mut message_rx: mpsc::Receiver<MessagePublication>) {
    while let Some(message) = message_rx.recv().await {
        info!(
            "Validated message from emitter {} sequence {} tx {} ({} payload bytes)",
            message.emitter_address,
            message.sequence,
            message.tx_hash,
            message.payload.len()
        );
    }
}
