// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Read-only HTTP view over the contract registry.

use crate::with_metrics;
use crate::{
    metrics::WatcherMetrics,
    server::handler::{ContractAddressResponse, QueryError, RegistryQueryHandlerTrait},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

pub mod handler;

pub use handler::RegistryQueryHandler;

// Note: Using :param syntax for axum 0.7.x
pub const TOKEN_WRAPPER_PATH: &str = "/token-wrapper/:token_id";
pub const REMOTE_CHAIN_PATH: &str = "/remote-chain/:chain_id";

#[derive(Debug, Deserialize)]
pub struct TokenWrapperQuery {
    pub chain: Option<u16>,
}

pub fn run_server(
    socket_address: &SocketAddr,
    handler: RegistryQueryHandler,
    metrics: Arc<WatcherMetrics>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let socket_address = *socket_address;
    tokio::spawn(async move {
        let listener = match tokio::net::TcpListener::bind(socket_address).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to bind query service to {}: {}", socket_address, e);
                return;
            }
        };
        info!("Query service listening on {}", socket_address);
        let served = axum::serve(
            listener,
            make_router(Arc::new(handler), metrics).into_make_service(),
        )
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await;
        if let Err(e) = served {
            error!("Query service stopped: {}", e);
        }
    })
}

pub(crate) fn make_router(
    handler: Arc<impl RegistryQueryHandlerTrait + Sync + Send + 'static>,
    metrics: Arc<WatcherMetrics>,
) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route("/health", get(health_check))
        .route(TOKEN_WRAPPER_PATH, get(handle_token_wrapper))
        .route(REMOTE_CHAIN_PATH, get(handle_remote_chain))
        .with_state((handler, metrics))
}

impl axum::response::IntoResponse for QueryError {
    fn into_response(self) -> axum::response::Response {
        match self {
            QueryError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            QueryError::NotFound(msg) => (StatusCode::NOT_FOUND, msg).into_response(),
            QueryError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Something went wrong: {}", msg),
            )
                .into_response(),
        }
    }
}

async fn health_check() -> StatusCode {
    StatusCode::OK
}

#[instrument(level = "error", skip_all, fields(token_id=token_id))]
async fn handle_token_wrapper(
    Path(token_id): Path<String>,
    Query(query): Query<TokenWrapperQuery>,
    State((handler, metrics)): State<(
        Arc<impl RegistryQueryHandlerTrait + Sync + Send>,
        Arc<WatcherMetrics>,
    )>,
) -> Result<Json<ContractAddressResponse>, QueryError> {
    let future = handler.handle_token_wrapper(token_id, query.chain);
    with_metrics!(metrics.clone(), "token_wrapper", future).await
}

#[instrument(level = "error", skip_all, fields(chain_id=chain_id))]
async fn handle_remote_chain(
    Path(chain_id): Path<u16>,
    State((handler, metrics)): State<(
        Arc<impl RegistryQueryHandlerTrait + Sync + Send>,
        Arc<WatcherMetrics>,
    )>,
) -> Result<Json<ContractAddressResponse>, QueryError> {
    let future = handler.handle_remote_chain(chain_id);
    with_metrics!(metrics.clone(), "remote_chain", future).await
}

#[macro_export]
macro_rules! with_metrics {
    ($metrics:expr, $type_:expr, $func:expr) => {
        async move {
            info!("Received {} request", $type_);
            $metrics
                .requests_received
                .with_label_values(&[$type_])
                .inc();
            $metrics
                .requests_inflight
                .with_label_values(&[$type_])
                .inc();

            let result = $func.await;

            match &result {
                Ok(_) => {
                    info!("{} request succeeded", $type_);
                    $metrics.requests_ok.with_label_values(&[$type_]).inc();
                }
                Err(e) => {
                    info!("{} request failed: {:?}", $type_, e);
                    $metrics.err_requests.with_label_values(&[$type_]).inc();
                }
            }

            $metrics
                .requests_inflight
                .with_label_values(&[$type_])
                .dec();
            result
        }
    };
}
