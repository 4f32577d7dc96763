// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Registers contracts announced by the token bridge factory.
//!
//! Factory event kinds:
//! - `0`: a bridge-for-chain contract was created. Its state holds the remote
//!   chain id at field 2.
//! - `1`: a token wrapper was created. Its state is
//!   `[token bridge id, owner id, local chain id, remote chain id, token id, is local token]`.
//!
//! In both cases field 0 of the event is the address of the new contract.

use crate::client::ChainClient;
use crate::error::{WatcherError, WatcherResult};
use crate::metrics::WatcherMetrics;
use crate::registry_cache::Registry;
use crate::storage::{RegistryBatch, RegistryRecord};
use crate::types::{contract_id_from_address, ConfirmedEvents, ContractRole, ContractState, UnconfirmedEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const BRIDGE_FOR_CHAIN_CREATED: u32 = 0;
pub const TOKEN_WRAPPER_CREATED: u32 = 1;

const NEW_CONTRACT_EVENT_FIELD: usize = 0;
const BRIDGE_FOR_CHAIN_REMOTE_CHAIN_FIELD: usize = 2;
const WRAPPER_OWNER_FIELD: usize = 1;
const WRAPPER_REMOTE_CHAIN_FIELD: usize = 3;
const WRAPPER_TOKEN_ID_FIELD: usize = 4;
const WRAPPER_IS_LOCAL_FIELD: usize = 5;

pub struct RegistryUpdater {
    client: Arc<dyn ChainClient>,
    registry: Registry,
    metrics: Arc<WatcherMetrics>,
    max_retry_interval: Duration,
}

impl RegistryUpdater {
    pub fn new(client: Arc<dyn ChainClient>, registry: Registry, metrics: Arc<WatcherMetrics>) -> Self {
        Self {
            client,
            registry,
            metrics,
            max_retry_interval: Duration::from_secs(60),
        }
    }

    pub fn with_max_retry_interval(mut self, max_retry_interval: Duration) -> Self {
        self.max_retry_interval = max_retry_interval;
        self
    }

    pub async fn run(
        self,
        mut confirmed_rx: mpsc::Receiver<ConfirmedEvents>,
        cancel: CancellationToken,
    ) -> WatcherResult<()> {
        info!("[token-bridge] Starting registry updater");
        loop {
            let batch = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("[token-bridge] Registry updater cancelled");
                    return Ok(());
                }
                batch = confirmed_rx.recv() => match batch {
                    Some(batch) => batch,
                    None => return Ok(()),
                },
            };
            if let Err(e) = self.process_batch(batch, &cancel).await {
                error!("[token-bridge] Registry updater stopped: {}", e);
                return Err(e);
            }
        }
    }

    /// Stage the records of every factory event in `confirmed` and commit
    /// them together with the checkpoint. Returns `false` when cancelled
    /// before the commit.
    pub async fn process_batch(
        &self,
        confirmed: ConfirmedEvents,
        cancel: &CancellationToken,
    ) -> WatcherResult<bool> {
        let mut batch = RegistryBatch::new();
        for event in &confirmed.events {
            let staged = match event.event.index {
                BRIDGE_FOR_CHAIN_CREATED => self.stage_bridge_for_chain(event, &mut batch, cancel).await,
                TOKEN_WRAPPER_CREATED => self.stage_token_wrapper(event, &mut batch, cancel).await,
                kind => {
                    debug!(
                        "[token-bridge] Skip factory event kind {} in tx {}",
                        kind, event.event.tx_id
                    );
                    Ok(true)
                }
            };
            match staged {
                Ok(true) => {}
                Ok(false) => {
                    info!("[token-bridge] Batch abandoned on shutdown, nothing committed");
                    return Ok(false);
                }
                Err(e) if e.is_untrusted_input() || matches!(e, WatcherError::NotFound(_)) => {
                    warn!(
                        "[token-bridge] Drop factory event of tx {}: {}",
                        event.event.tx_id, e
                    );
                    self.metrics.drop_message(e.error_type());
                }
                Err(e) => return Err(e),
            }
        }

        let records = batch.records().to_vec();
        if let Some(position) = confirmed.max_event_index() {
            batch.set_checkpoint(ContractRole::TokenBridge, position);
        }
        let checkpoint = batch.checkpoint();
        self.registry.commit_batch(batch).await?;

        for record in &records {
            let kind = match record {
                RegistryRecord::RemoteChain { .. } => "remote_chain",
                RegistryRecord::TokenWrapper { .. } => "token_wrapper",
            };
            self.metrics
                .registry_records_committed
                .with_label_values(&[kind])
                .inc();
        }
        if let Some((role, position)) = checkpoint {
            self.metrics
                .checkpoint
                .with_label_values(&[role.as_str()])
                .set(position as i64);
        }
        info!(
            "[token-bridge] Committed {} registry records, checkpoint {:?}",
            records.len(),
            checkpoint
        );
        Ok(true)
    }

    async fn stage_bridge_for_chain(
        &self,
        event: &UnconfirmedEvent,
        batch: &mut RegistryBatch,
        cancel: &CancellationToken,
    ) -> WatcherResult<bool> {
        let address = new_contract_address(event)?;
        let Some(state) = self.query_state(&address, cancel).await? else {
            return Ok(false);
        };
        let chain_id = state.field(BRIDGE_FOR_CHAIN_REMOTE_CHAIN_FIELD)?.to_u16()?;
        info!(
            "[token-bridge] Register bridge contract {} for chain {}",
            address, chain_id
        );
        batch.put_remote_chain(chain_id, address);
        Ok(true)
    }

    async fn stage_token_wrapper(
        &self,
        event: &UnconfirmedEvent,
        batch: &mut RegistryBatch,
        cancel: &CancellationToken,
    ) -> WatcherResult<bool> {
        let address = new_contract_address(event)?;
        let Some(state) = self.query_state(&address, cancel).await? else {
            return Ok(false);
        };
        let owner = state.field(WRAPPER_OWNER_FIELD)?.to_byte32()?;
        let remote_chain_id = state.field(WRAPPER_REMOTE_CHAIN_FIELD)?.to_u16()?;
        let token_id = state.field(WRAPPER_TOKEN_ID_FIELD)?.to_byte32()?;
        let is_local_token = state.field(WRAPPER_IS_LOCAL_FIELD)?.to_bool()?;

        let expected = match batch.staged_remote_chain(remote_chain_id) {
            Some(staged) => contract_id_from_address(staged)?,
            None => self.registry.remote_chain_contract(remote_chain_id).await?,
        };
        if owner != expected {
            return Err(WatcherError::UntrustedSender {
                expected,
                actual: owner,
            });
        }

        let key_chain = is_local_token.then_some(remote_chain_id);
        info!(
            "[token-bridge] Register wrapper {} for token {} (chain {}, local {})",
            address, token_id, remote_chain_id, is_local_token
        );
        batch.put_token_wrapper(token_id, key_chain, address);
        Ok(true)
    }

    /// Query contract state, retrying transient failures with exponential
    /// backoff. Returns `None` when cancelled.
    async fn query_state(
        &self,
        address: &str,
        cancel: &CancellationToken,
    ) -> WatcherResult<Option<ContractState>> {
        let backoff = backoff::ExponentialBackoff {
            initial_interval: Duration::from_millis(400).min(self.max_retry_interval),
            randomization_factor: 0.1,
            multiplier: 2.0,
            max_interval: self.max_retry_interval,
            max_elapsed_time: None,
            ..Default::default()
        };
        let query = backoff::future::retry(backoff, || async {
            self.client.get_contract_state(address).await.map_err(|e| {
                if e.is_fatal() {
                    backoff::Error::permanent(e)
                } else {
                    warn!("[token-bridge] Failed to query state of {}, retrying: {}", address, e);
                    backoff::Error::transient(e)
                }
            })
        });
        tokio::select! {
            _ = cancel.cancelled() => Ok(None),
            state = query => state.map(Some),
        }
    }
}

fn new_contract_address(event: &UnconfirmedEvent) -> WatcherResult<String> {
    let field = event.event.fields.get(NEW_CONTRACT_EVENT_FIELD).ok_or_else(|| {
        WatcherError::MalformedEvent(format!(
            "factory event in tx {} has no fields",
            event.event.tx_id
        ))
    })?;
    let address = field.to_address()?;
    contract_id_from_address(&address)?;
    Ok(address)
}
