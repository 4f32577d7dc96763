// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Per-contract event polling.
//!
//! Each [`EventPoller`] owns a cursor (the highest event position already
//! handed downstream) and, on every tick, fetches the positions after it,
//! attaches block headers and confirmation depths, and forwards the
//! confirmed prefix minus events from blocks that left the main chain:
//!
//! ```text
//!   Idle ──tick──▶ Polling ──▶ EmptyResult ──▶ Idle
//!                      │
//!                      └─────▶ EventsFound ──▶ Idle
//! ```
//!
//! Transient RPC failures leave the cursor untouched and the next tick
//! retries. Protocol errors end the task.

mod config;
mod height;

pub use config::PollerConfig;
pub use height::run_height_watcher;

use crate::client::ChainClient;
use crate::confirmation::ConfirmationTracker;
use crate::error::{WatcherError, WatcherResult};
use crate::metrics::WatcherMetrics;
use crate::types::{BlockHeader, ConfirmedEvents, UnconfirmedEvent};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Polling,
    EmptyResult,
    EventsFound,
}

pub struct EventPoller {
    config: PollerConfig,
    client: Arc<dyn ChainClient>,
    tracker: ConfirmationTracker,
    height_rx: watch::Receiver<u64>,
    confirmed_tx: mpsc::Sender<ConfirmedEvents>,
    metrics: Arc<WatcherMetrics>,
    cursor: u64,
    state: PollerState,
}

impl EventPoller {
    pub fn new(
        config: PollerConfig,
        client: Arc<dyn ChainClient>,
        tracker: ConfirmationTracker,
        height_rx: watch::Receiver<u64>,
        confirmed_tx: mpsc::Sender<ConfirmedEvents>,
        metrics: Arc<WatcherMetrics>,
        start_cursor: u64,
    ) -> Self {
        Self {
            config,
            client,
            tracker,
            height_rx,
            confirmed_tx,
            metrics,
            cursor: start_cursor,
            state: PollerState::Idle,
        }
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn state(&self) -> PollerState {
        self.state
    }

    /// Poll until cancelled. Returns the first fatal error.
    pub async fn run(mut self, cancel: CancellationToken) -> WatcherResult<()> {
        let role = self.config.role;
        info!(
            "[{}] Starting event poller for {} at position {} (interval={:?})",
            role, self.config.contract_address, self.cursor, self.config.poll_interval
        );

        let mut interval = time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("[{}] Event poller cancelled at position {}", role, self.cursor);
                    return Ok(());
                }
                _ = interval.tick() => {}
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("[{}] Event poller cancelled mid-cycle at position {}", role, self.cursor);
                    return Ok(());
                }
                result = self.poll_once() => result,
            };

            match result {
                Ok(()) => {}
                Err(e) if e.is_fatal() => {
                    error!("[{}] Event poller stopped: {}", role, e);
                    return Err(e);
                }
                Err(e) => {
                    warn!("[{}] Poll cycle failed, retrying next tick: {}", role, e);
                }
            }
            self.state = PollerState::Idle;
        }
    }

    /// Run one polling cycle.
    pub async fn poll_once(&mut self) -> WatcherResult<()> {
        let role = self.config.role;
        self.state = PollerState::Polling;

        let count = self
            .client
            .get_event_count(&self.config.contract_address)
            .await?;
        let Some((from, to)) = self.config.fetch_range(self.cursor, count) else {
            self.state = PollerState::EmptyResult;
            return Ok(());
        };

        let events = self
            .client
            .get_contract_events(&self.config.contract_address, from, to)
            .await?;
        let expected = (to - from + 1) as usize;
        if events.len() != expected {
            return Err(WatcherError::InvalidResponse(format!(
                "asked for {} events at {}..={}, got {}",
                expected,
                from,
                to,
                events.len()
            )));
        }
        self.metrics
            .received_events
            .with_label_values(&[role.as_str()])
            .inc_by(events.len() as u64);
        debug!("[{}] Fetched events {}..={} of {}", role, from, to, count);

        let mut headers: HashMap<String, BlockHeader> = HashMap::new();
        let mut unconfirmed = Vec::with_capacity(events.len());
        for (offset, event) in events.into_iter().enumerate() {
            let header = match headers.get(&event.block_hash) {
                Some(header) => header.clone(),
                None => {
                    let header = self.client.get_block_header(&event.block_hash).await?;
                    headers.insert(event.block_hash.clone(), header.clone());
                    header
                }
            };
            let confirmations = (self.tracker.confirmations_fn())(&event)?;
            unconfirmed.push(UnconfirmedEvent {
                event,
                header,
                event_index: from + offset as u64,
                confirmations,
            });
        }

        let height = *self.height_rx.borrow();
        let (batch, pending) = self.tracker.confirm(unconfirmed, height).await?;
        self.state = PollerState::EventsFound;

        let Some(batch) = batch else {
            debug!(
                "[{}] {} events waiting for confirmations at height {}",
                role,
                pending.len(),
                height
            );
            return Ok(());
        };

        let next_cursor = batch.max_event_index().unwrap_or(self.cursor);
        info!(
            "[{}] {} events confirmed at height {}, positions {}..={}",
            role,
            batch.len(),
            height,
            self.cursor + 1,
            next_cursor
        );
        self.confirmed_tx
            .send(batch)
            .await
            .map_err(|_| WatcherError::ChannelClosed(format!("{} confirmed events", role)))?;
        self.cursor = next_cursor;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::client::MockChainClient;
    use crate::confirmation::{constant_confirmations, governance_confirmations, ConsistencyTable};
    use crate::types::{ContractRole, Event, Field, FieldType};
    use std::collections::BTreeMap;
    use std::time::Duration;

    pub(crate) fn header(hash: &str, height: u64) -> BlockHeader {
        BlockHeader {
            hash: hash.to_string(),
            timestamp: 1_700_000_000_000,
            chain_from: 0,
            chain_to: 0,
            height,
        }
    }

    fn plain_event(contract: &str, block: &str, tx: &str) -> Event {
        Event {
            block_hash: block.to_string(),
            contract_address: contract.to_string(),
            tx_id: tx.to_string(),
            index: 0,
            fields: vec![],
        }
    }

    struct Harness {
        client: MockChainClient,
        height_tx: watch::Sender<u64>,
        confirmed_rx: mpsc::Receiver<ConfirmedEvents>,
        poller: EventPoller,
        metrics: Arc<WatcherMetrics>,
    }

    fn harness(confirmations: u64, max_per_fetch: u64, start_cursor: u64) -> Harness {
        let client = MockChainClient::default();
        let metrics = Arc::new(WatcherMetrics::new_for_testing());
        let shared: Arc<dyn ChainClient> = Arc::new(client.clone());
        let tracker = ConfirmationTracker::new(
            ContractRole::TokenBridge,
            "factory",
            shared.clone(),
            constant_confirmations(confirmations),
            metrics.clone(),
        );
        let (height_tx, height_rx) = watch::channel(0);
        let (confirmed_tx, confirmed_rx) = mpsc::channel(8);
        let config = PollerConfig::new(ContractRole::TokenBridge, "factory")
            .with_max_events_per_fetch(max_per_fetch);
        let poller = EventPoller::new(
            config,
            shared,
            tracker,
            height_rx,
            confirmed_tx,
            metrics.clone(),
            start_cursor,
        );
        Harness {
            client,
            height_tx,
            confirmed_rx,
            poller,
            metrics,
        }
    }

    #[tokio::test]
    async fn test_event_confirmed_one_block_later() {
        let mut h = harness(1, 10, 0);
        h.client.add_header(header("b5", 5));
        h.client.push_event(plain_event("factory", "b5", "tx1"));

        h.height_tx.send_replace(5);
        h.poller.poll_once().await.unwrap();
        assert_eq!(h.poller.state(), PollerState::EventsFound);
        assert_eq!(h.poller.cursor(), 0);
        assert!(h.confirmed_rx.try_recv().is_err());

        h.height_tx.send_replace(6);
        h.poller.poll_once().await.unwrap();
        let batch = h.confirmed_rx.try_recv().unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.max_event_index(), Some(1));
        assert_eq!(h.poller.cursor(), 1);

        // caught up
        h.poller.poll_once().await.unwrap();
        assert_eq!(h.poller.state(), PollerState::EmptyResult);
    }

    #[tokio::test]
    async fn test_fetch_is_bounded_and_resumes_from_cursor() {
        let mut h = harness(0, 2, 1);
        h.client.add_header(header("b1", 1));
        for i in 0..5 {
            h.client
                .push_event(plain_event("factory", "b1", &format!("tx{}", i)));
        }
        h.height_tx.send_replace(10);

        h.poller.poll_once().await.unwrap();
        assert_eq!(h.poller.cursor(), 3);
        h.poller.poll_once().await.unwrap();
        assert_eq!(h.poller.cursor(), 5);
        assert_eq!(
            h.client.requested_ranges(),
            vec![
                ("factory".to_string(), 2, 3),
                ("factory".to_string(), 4, 5)
            ]
        );
        let first = h.confirmed_rx.try_recv().unwrap();
        assert_eq!(first.events[0].event.tx_id, "tx1");
    }

    #[tokio::test]
    async fn test_orphaned_event_is_never_forwarded() {
        let mut h = harness(1, 10, 0);
        h.client.add_header(header("b1", 1));
        h.client.add_header(header("orphan", 2));
        h.client.push_event(plain_event("factory", "b1", "tx1"));
        h.client.push_event(plain_event("factory", "orphan", "tx2"));
        h.client.set_orphan("orphan");

        // far past the depth of both events
        h.height_tx.send_replace(100);
        h.poller.poll_once().await.unwrap();
        let batch = h.confirmed_rx.try_recv().unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.events[0].event.tx_id, "tx1");
        assert_eq!(h.poller.cursor(), 2);
        assert_eq!(
            h.metrics
                .dropped_messages
                .with_label_values(&["orphan_block"])
                .get(),
            1
        );

        // an orphan alone still moves the cursor, with nothing to forward
        h.client.push_event(plain_event("factory", "orphan", "tx3"));
        h.poller.poll_once().await.unwrap();
        let batch = h.confirmed_rx.try_recv().unwrap();
        assert!(batch.is_empty());
        assert_eq!(batch.max_event_index(), Some(3));
        assert_eq!(h.poller.cursor(), 3);

        h.poller.poll_once().await.unwrap();
        assert_eq!(h.poller.state(), PollerState::EmptyResult);
        assert!(h.confirmed_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_transient_failure_keeps_cursor() {
        let mut h = harness(0, 10, 0);
        h.client.add_header(header("b1", 1));
        h.client.push_event(plain_event("factory", "b1", "tx0"));
        h.height_tx.send_replace(3);

        h.client.fail_next_calls(1);
        let err = h.poller.poll_once().await.unwrap_err();
        assert!(!err.is_fatal());
        assert_eq!(h.poller.cursor(), 0);

        h.poller.poll_once().await.unwrap();
        assert_eq!(h.poller.cursor(), 1);
    }

    #[tokio::test]
    async fn test_unsupported_consistency_level_is_fatal() {
        let client = MockChainClient::default();
        let metrics = Arc::new(WatcherMetrics::new_for_testing());
        let shared: Arc<dyn ChainClient> = Arc::new(client.clone());
        let table = ConsistencyTable::new(BTreeMap::from([(0, 1)])).unwrap();
        let tracker = ConfirmationTracker::new(
            ContractRole::Governance,
            "governance",
            shared.clone(),
            governance_confirmations(table, 0),
            metrics.clone(),
        );
        let (_height_tx, height_rx) = watch::channel(100);
        let (confirmed_tx, _confirmed_rx) = mpsc::channel(1);
        let poller = EventPoller::new(
            PollerConfig::new(ContractRole::Governance, "governance")
                .with_poll_interval(Duration::from_millis(5)),
            shared,
            tracker,
            height_rx,
            confirmed_tx,
            metrics,
            0,
        );

        client.add_header(header("b1", 1));
        let mut event = plain_event("governance", "b1", "tx0");
        event.fields = vec![
            Field::new(FieldType::ByteVec, "00".repeat(32)),
            Field::new(FieldType::U256, "0"),
            Field::new(FieldType::ByteVec, "00000000"),
            Field::new(FieldType::U256, "9"),
        ];
        client.push_event(event);

        let err = poller.run(CancellationToken::new()).await.unwrap_err();
        assert_eq!(err, WatcherError::UnsupportedConsistencyLevel(9));
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let h = harness(1, 10, 0);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(h.poller.run(cancel.clone()));
        cancel.cancel();
        assert!(handle.await.unwrap().is_ok());
    }
}
