// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::confirmation::ConfirmationTracker;
use crate::error::{WatcherError, WatcherResult};
use crate::metrics::WatcherMetrics;
use crate::types::{ConfirmedEvents, ObservationRequest};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Serves re-observation requests for governance transactions. Confirmed
/// results join the validator's input channel.
pub struct ReobservationHandler {
    emitter_chain_id: u16,
    tracker: ConfirmationTracker,
    height_rx: watch::Receiver<u64>,
    confirmed_tx: mpsc::Sender<ConfirmedEvents>,
    metrics: Arc<WatcherMetrics>,
}

impl ReobservationHandler {
    pub fn new(
        emitter_chain_id: u16,
        tracker: ConfirmationTracker,
        height_rx: watch::Receiver<u64>,
        confirmed_tx: mpsc::Sender<ConfirmedEvents>,
        metrics: Arc<WatcherMetrics>,
    ) -> Self {
        Self {
            emitter_chain_id,
            tracker,
            height_rx,
            confirmed_tx,
            metrics,
        }
    }

    pub async fn run(
        self,
        mut request_rx: mpsc::Receiver<ObservationRequest>,
        cancel: CancellationToken,
    ) -> WatcherResult<()> {
        info!("[governance] Starting re-observation handler");
        loop {
            let request = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("[governance] Re-observation handler cancelled");
                    return Ok(());
                }
                request = request_rx.recv() => match request {
                    Some(request) => request,
                    None => {
                        info!("[governance] Re-observation channel closed");
                        return Ok(());
                    }
                },
            };

            let result = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                result = self.handle(request) => result,
            };
            match result {
                Ok(_) => {}
                Err(e) if e.is_untrusted_input() => {
                    warn!("[governance] Drop re-observation result: {}", e);
                    self.metrics.drop_message(e.error_type());
                }
                Err(e) if e.is_fatal() => {
                    error!("[governance] Re-observation handler stopped: {}", e);
                    return Err(e);
                }
                Err(e) => warn!("[governance] Re-observation failed: {}", e),
            }
        }
    }

    /// Handle one request. Returns the number of events sent to the validator.
    pub async fn handle(&self, request: ObservationRequest) -> WatcherResult<usize> {
        if request.chain_id != u32::from(self.emitter_chain_id) {
            debug!(
                "[governance] Ignore re-observation request for chain {}",
                request.chain_id
            );
            return Ok(0);
        }
        let tx_id = hex::encode(&request.tx_hash);
        let height = *self.height_rx.borrow();
        info!(
            "[governance] Re-observe tx {} at height {}",
            tx_id, height
        );

        let Some(batch) = self.tracker.reobserve(&tx_id, height).await? else {
            return Ok(0);
        };
        let len = batch.len();
        self.confirmed_tx
            .send(batch)
            .await
            .map_err(|_| WatcherError::ChannelClosed("governance confirmed events".to_string()))?;
        Ok(len)
    }
}
