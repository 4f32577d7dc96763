// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use super::{is_confirmed, partition, ConfirmationsFn};
use crate::client::ChainClient;
use crate::error::{WatcherError, WatcherResult};
use crate::metrics::WatcherMetrics;
use crate::types::{BatchOrigin, ConfirmedEvents, ContractRole, TxStatus, UnconfirmedEvent};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Decides which events of one contract are final.
#[derive(Clone)]
pub struct ConfirmationTracker {
    role: ContractRole,
    contract_address: String,
    client: Arc<dyn ChainClient>,
    confirmations_fn: ConfirmationsFn,
    metrics: Arc<WatcherMetrics>,
}

impl ConfirmationTracker {
    pub fn new(
        role: ContractRole,
        contract_address: impl Into<String>,
        client: Arc<dyn ChainClient>,
        confirmations_fn: ConfirmationsFn,
        metrics: Arc<WatcherMetrics>,
    ) -> Self {
        Self {
            role,
            contract_address: contract_address.into(),
            client,
            confirmations_fn,
            metrics,
        }
    }

    pub fn role(&self) -> ContractRole {
        self.role
    }

    pub fn contract_address(&self) -> &str {
        &self.contract_address
    }

    pub fn confirmations_fn(&self) -> &ConfirmationsFn {
        &self.confirmations_fn
    }

    /// Returns the confirmed batch, if any, and the events still pending.
    ///
    /// Events of the confirmed prefix whose block left the main chain are
    /// dropped. The batch still covers their positions so the cursor moves
    /// past them; the batch may therefore hold no events at all.
    pub async fn confirm(
        &self,
        events: Vec<UnconfirmedEvent>,
        current_height: u64,
    ) -> WatcherResult<(Option<ConfirmedEvents>, Vec<UnconfirmedEvent>)> {
        let (confirmed, pending) = partition(events, current_height);
        if !pending.is_empty() {
            debug!(
                "[{}] {} events pending at height {}, first needs height {}",
                self.role,
                pending.len(),
                current_height,
                pending[0].block_height().saturating_add(pending[0].confirmations)
            );
        }
        let Some(last_position) = confirmed.iter().map(|e| e.event_index).max() else {
            return Ok((None, pending));
        };
        let canonical = self.drop_orphans(confirmed).await?;
        self.metrics
            .confirmed_events
            .with_label_values(&[self.role.as_str()])
            .inc_by(canonical.len() as u64);
        let batch = ConfirmedEvents::new(self.contract_address.clone(), canonical, BatchOrigin::Poll)?
            .covering_through(last_position);
        Ok((Some(batch), pending))
    }

    // One main-chain lookup per block hash.
    async fn drop_orphans(
        &self,
        events: Vec<UnconfirmedEvent>,
    ) -> WatcherResult<Vec<UnconfirmedEvent>> {
        let mut in_main_chain: HashMap<String, bool> = HashMap::new();
        let mut canonical = Vec::with_capacity(events.len());
        for event in events {
            let block_hash = &event.event.block_hash;
            let keep = match in_main_chain.get(block_hash) {
                Some(keep) => *keep,
                None => {
                    let keep = self.client.is_block_in_main_chain(block_hash).await?;
                    in_main_chain.insert(block_hash.clone(), keep);
                    keep
                }
            };
            if keep {
                canonical.push(event);
            } else {
                warn!(
                    "[{}] Drop event {} of tx {}: block {} is not in the main chain",
                    self.role, event.event_index, event.event.tx_id, block_hash
                );
                self.metrics.drop_message("orphan_block");
            }
        }
        Ok(canonical)
    }

    /// Re-fetch the events of one transaction and return those already final.
    ///
    /// A transaction in a block outside the main chain yields
    /// [`WatcherError::OrphanBlock`].
    pub async fn reobserve(
        &self,
        tx_id: &str,
        current_height: u64,
    ) -> WatcherResult<Option<ConfirmedEvents>> {
        let block_hash = match self.client.get_transaction_status(tx_id).await? {
            TxStatus::Confirmed { block_hash, .. } => block_hash,
            status => {
                info!("[{}] Ignore re-observation of tx {}: {:?}", self.role, tx_id, status);
                return Ok(None);
            }
        };

        if !self.client.is_block_in_main_chain(&block_hash).await? {
            info!("[{}] Ignore orphan block {} of tx {}", self.role, block_hash, tx_id);
            return Err(WatcherError::OrphanBlock(block_hash));
        }

        let header = self.client.get_block_header(&block_hash).await?;
        let events = self
            .client
            .get_events_by_block_hash(&block_hash, &self.contract_address)
            .await?;

        let mut confirmed = Vec::new();
        for event in events.into_iter().filter(|e| e.tx_id == tx_id) {
            let confirmations = (self.confirmations_fn)(&event)?;
            if is_confirmed(current_height, header.height, confirmations) {
                info!(
                    "[{}] Re-observe event of tx {} in block {} at height {}, current height {}, confirmations {}",
                    self.role, tx_id, block_hash, header.height, current_height, confirmations
                );
                confirmed.push(UnconfirmedEvent {
                    event,
                    header: header.clone(),
                    // not a stream position; re-observed batches never move the checkpoint
                    event_index: 0,
                    confirmations,
                });
            } else {
                info!(
                    "[{}] Ignore unconfirmed re-observed event of tx {} at height {}, current height {}, confirmations {}",
                    self.role, tx_id, header.height, current_height, confirmations
                );
            }
        }

        if confirmed.is_empty() {
            return Ok(None);
        }
        self.metrics.reobserved_events.inc_by(confirmed.len() as u64);
        ConfirmedEvents::new(
            self.contract_address.clone(),
            confirmed,
            BatchOrigin::Reobservation,
        )
        .map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockChainClient;
    use crate::confirmation::constant_confirmations;
    use crate::confirmation::tests::unconfirmed;
    use crate::types::{BlockHeader, Event};

    fn tracker(client: MockChainClient, confirmations: u64) -> ConfirmationTracker {
        ConfirmationTracker::new(
            ContractRole::Governance,
            "governance",
            Arc::new(client),
            constant_confirmations(confirmations),
            Arc::new(WatcherMetrics::new_for_testing()),
        )
    }

    fn seed_tx(client: &MockChainClient, tx_id: &str, block_hash: &str, height: u64) {
        client.add_header(BlockHeader {
            hash: block_hash.to_string(),
            timestamp: 1_000,
            chain_from: 0,
            chain_to: 0,
            height,
        });
        client.push_event(Event {
            block_hash: block_hash.to_string(),
            contract_address: "governance".to_string(),
            tx_id: tx_id.to_string(),
            index: 0,
            fields: vec![],
        });
    }

    #[tokio::test]
    async fn test_confirm_batches_prefix() {
        let tracker = tracker(MockChainClient::default(), 1);
        let mut events = vec![unconfirmed(1, 5, 1)];
        for e in events.iter_mut() {
            e.event.contract_address = "governance".to_string();
        }

        let (batch, pending) = tracker.confirm(events.clone(), 5).await.unwrap();
        assert!(batch.is_none());
        assert_eq!(pending.len(), 1);

        let (batch, pending) = tracker.confirm(events, 6).await.unwrap();
        let batch = batch.unwrap();
        assert_eq!(batch.max_event_index(), Some(1));
        assert_eq!(batch.origin, BatchOrigin::Poll);
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_confirm_drops_orphaned_blocks() {
        let client = MockChainClient::default();
        let metrics = Arc::new(WatcherMetrics::new_for_testing());
        let tracker = ConfirmationTracker::new(
            ContractRole::Governance,
            "governance",
            Arc::new(client.clone()),
            constant_confirmations(1),
            metrics.clone(),
        );
        let mut events = vec![unconfirmed(1, 5, 1), unconfirmed(2, 6, 1), unconfirmed(3, 9, 1)];
        for e in events.iter_mut() {
            e.event.contract_address = "governance".to_string();
        }
        let orphan = events[1].event.block_hash.clone();
        client.set_orphan(&orphan);

        let (batch, pending) = tracker.confirm(events, 8).await.unwrap();
        let batch = batch.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.events[0].event_index, 1);
        assert_eq!(batch.max_event_index(), Some(2));
        assert_eq!(pending.len(), 1);
        assert_eq!(
            metrics.dropped_messages.with_label_values(&["orphan_block"]).get(),
            1
        );
        assert_eq!(
            metrics.confirmed_events.with_label_values(&["governance"]).get(),
            1
        );
    }

    #[tokio::test]
    async fn test_confirm_main_chain_lookup_failure_is_transient() {
        let client = MockChainClient::default();
        let tracker = tracker(client.clone(), 0);
        let mut event = unconfirmed(1, 5, 0);
        event.event.contract_address = "governance".to_string();

        client.fail_next_calls(1);
        let err = tracker.confirm(vec![event], 5).await.unwrap_err();
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn test_reobserve_confirmed_tx() {
        let client = MockChainClient::default();
        seed_tx(&client, "tx1", "block-a", 10);
        seed_tx(&client, "tx2", "block-a", 10);
        let tracker = tracker(client, 2);

        assert!(tracker.reobserve("tx1", 11).await.unwrap().is_none());

        let batch = tracker.reobserve("tx1", 12).await.unwrap().unwrap();
        assert_eq!(batch.origin, BatchOrigin::Reobservation);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.events[0].event.tx_id, "tx1");
    }

    #[tokio::test]
    async fn test_reobserve_orphan_never_yields_events() {
        let client = MockChainClient::default();
        seed_tx(&client, "tx1", "block-a", 10);
        client.set_orphan("block-a");
        let tracker = tracker(client, 1);

        for height in [10, 11, 1_000] {
            assert_eq!(
                tracker.reobserve("tx1", height).await.unwrap_err(),
                WatcherError::OrphanBlock("block-a".to_string())
            );
        }
    }

    #[tokio::test]
    async fn test_reobserve_unknown_or_pending_tx() {
        let client = MockChainClient::default();
        client.set_tx_status("mempool-tx", TxStatus::MemPooled);
        let tracker = tracker(client, 1);
        assert!(tracker.reobserve("missing", 100).await.unwrap().is_none());
        assert!(tracker.reobserve("mempool-tx", 100).await.unwrap().is_none());
    }
}
