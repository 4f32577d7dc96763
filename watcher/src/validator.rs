// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Turns confirmed governance events into canonical messages.
//!
//! Messages whose declared emitter is not the token bridge contract, transfers
//! that do not decode and transfers whose sender is not the registered
//! wrapper are all dropped. A governance event envelope that does not decode
//! is fatal: it means the contract and the codec disagree.

use crate::encoding::{TransferMessage, WormholeMessage};
use crate::error::{WatcherError, WatcherResult};
use crate::metrics::WatcherMetrics;
use crate::registry_cache::Registry;
use crate::storage::RegistryBatch;
use crate::types::{
    contract_id_from_address, BatchOrigin, Byte32, ConfirmedEvents, ContractRole,
    MessagePublication, UnconfirmedEvent,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct Validator {
    message_origin_id: Byte32,
    emitter_chain_id: u16,
    registry: Registry,
    message_tx: mpsc::Sender<MessagePublication>,
    metrics: Arc<WatcherMetrics>,
}

impl Validator {
    /// `message_origin_address` is the only contract allowed to publish
    /// messages through the governance contract.
    pub fn new(
        message_origin_address: &str,
        emitter_chain_id: u16,
        registry: Registry,
        message_tx: mpsc::Sender<MessagePublication>,
        metrics: Arc<WatcherMetrics>,
    ) -> WatcherResult<Self> {
        Ok(Self {
            message_origin_id: contract_id_from_address(message_origin_address)?,
            emitter_chain_id,
            registry,
            message_tx,
            metrics,
        })
    }

    pub async fn run(
        self,
        mut confirmed_rx: mpsc::Receiver<ConfirmedEvents>,
        cancel: CancellationToken,
    ) -> WatcherResult<()> {
        info!("[governance] Starting validator");
        loop {
            let batch = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("[governance] Validator cancelled");
                    return Ok(());
                }
                batch = confirmed_rx.recv() => match batch {
                    Some(batch) => batch,
                    None => {
                        info!("[governance] Confirmed event channel closed, validator exiting");
                        return Ok(());
                    }
                },
            };

            let result = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                result = self.process_batch(batch) => result,
            };
            if let Err(e) = result {
                error!("[governance] Validator stopped: {}", e);
                return Err(e);
            }
        }
    }

    /// Validate and forward every event of `batch`, then commit the
    /// governance checkpoint for polled batches. Returns the number of
    /// forwarded messages.
    pub async fn process_batch(&self, batch: ConfirmedEvents) -> WatcherResult<usize> {
        let checkpoint = match batch.origin {
            BatchOrigin::Poll => batch.max_event_index(),
            BatchOrigin::Reobservation => None,
        };

        let mut forwarded = 0;
        for event in &batch.events {
            match self.validate_event(event).await {
                Ok(message) => {
                    self.message_tx.send(message).await.map_err(|_| {
                        WatcherError::ChannelClosed("downstream message channel".to_string())
                    })?;
                    self.metrics.forwarded_messages.inc();
                    forwarded += 1;
                }
                Err(e) if e.is_untrusted_input() || matches!(e, WatcherError::NotFound(_)) => {
                    warn!(
                        "[governance] Drop message of tx {}: {}",
                        event.event.tx_id, e
                    );
                    self.metrics.drop_message(e.error_type());
                }
                Err(e) => return Err(e),
            }
        }

        if let Some(position) = checkpoint {
            let mut commit = RegistryBatch::new();
            commit.set_checkpoint(ContractRole::Governance, position);
            self.registry.commit_batch(commit).await?;
            self.metrics
                .checkpoint
                .with_label_values(&[ContractRole::Governance.as_str()])
                .set(position as i64);
        }
        Ok(forwarded)
    }

    async fn validate_event(&self, event: &UnconfirmedEvent) -> WatcherResult<MessagePublication> {
        let message = WormholeMessage::from_event(&event.event)?;
        debug!(
            "[governance] Received message from emitter {}, sequence {}, payload {}",
            message.emitter,
            message.sequence,
            hex::encode(&message.payload)
        );

        if message.emitter != self.message_origin_id {
            return Err(WatcherError::UntrustedEmitter {
                expected: self.message_origin_id,
                actual: message.emitter,
            });
        }

        if message.is_transfer_message() {
            let transfer = TransferMessage::decode(&message.payload)?;
            self.check_sender(&transfer).await?;
        }
        message.to_message_publication(&event.header, self.emitter_chain_id)
    }

    async fn check_sender(&self, transfer: &TransferMessage) -> WatcherResult<()> {
        let expected = if transfer.is_local_token {
            self.registry
                .token_wrapper_contract(&transfer.token_id, Some(transfer.to_chain_id))
                .await?
        } else {
            self.registry
                .token_wrapper_contract(&transfer.token_id, None)
                .await?
        };
        if expected != transfer.sender_id {
            return Err(WatcherError::UntrustedSender {
                expected,
                actual: transfer.sender_id,
            });
        }
        Ok(())
    }
}
