// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! In-memory chain used by tests.

use super::ChainClient;
use crate::error::{WatcherError, WatcherResult};
use crate::types::{BlockHeader, ContractState, Event, TxStatus};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Clone, Debug, Default)]
pub struct MockChainClient {
    height: Arc<AtomicU64>,
    // contract address -> events in stream order
    events: Arc<Mutex<HashMap<String, Vec<Event>>>>,
    headers: Arc<Mutex<HashMap<String, BlockHeader>>>,
    orphans: Arc<Mutex<HashSet<String>>>,
    tx_statuses: Arc<Mutex<HashMap<String, TxStatus>>>,
    contract_states: Arc<Mutex<HashMap<String, ContractState>>>,
    failing_calls: Arc<AtomicU64>,
    requested_ranges: Arc<Mutex<Vec<(String, u64, u64)>>>,
}

impl MockChainClient {
    pub fn set_height(&self, height: u64) {
        self.height.store(height, Ordering::SeqCst);
    }

    pub fn add_header(&self, header: BlockHeader) {
        self.headers
            .lock()
            .unwrap()
            .insert(header.hash.clone(), header);
    }

    /// Append an event to its contract's stream and mark its tx confirmed in
    /// the event's block.
    pub fn push_event(&self, event: Event) {
        self.tx_statuses.lock().unwrap().insert(
            event.tx_id.clone(),
            TxStatus::Confirmed {
                block_hash: event.block_hash.clone(),
                chain_confirmations: 1,
            },
        );
        self.events
            .lock()
            .unwrap()
            .entry(event.contract_address.clone())
            .or_default()
            .push(event);
    }

    pub fn set_orphan(&self, block_hash: &str) {
        self.orphans.lock().unwrap().insert(block_hash.to_string());
    }

    pub fn set_tx_status(&self, tx_id: &str, status: TxStatus) {
        self.tx_statuses
            .lock()
            .unwrap()
            .insert(tx_id.to_string(), status);
    }

    pub fn set_contract_state(&self, state: ContractState) {
        self.contract_states
            .lock()
            .unwrap()
            .insert(state.address.clone(), state);
    }

    /// The next `n` calls of any kind fail with a transient RPC error.
    pub fn fail_next_calls(&self, n: u64) {
        self.failing_calls.store(n, Ordering::SeqCst);
    }

    pub fn requested_ranges(&self) -> Vec<(String, u64, u64)> {
        self.requested_ranges.lock().unwrap().clone()
    }

    fn maybe_fail(&self, method: &str) -> WatcherResult<()> {
        let injected = self
            .failing_calls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(WatcherError::Rpc(format!("injected failure in {}", method)));
        }
        Ok(())
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn get_current_height(&self) -> WatcherResult<u64> {
        self.maybe_fail("get_current_height")?;
        Ok(self.height.load(Ordering::SeqCst))
    }

    async fn get_event_count(&self, contract_address: &str) -> WatcherResult<u64> {
        self.maybe_fail("get_event_count")?;
        Ok(self
            .events
            .lock()
            .unwrap()
            .get(contract_address)
            .map(|events| events.len() as u64)
            .unwrap_or(0))
    }

    async fn get_contract_events(
        &self,
        contract_address: &str,
        from: u64,
        to: u64,
    ) -> WatcherResult<Vec<Event>> {
        self.maybe_fail("get_contract_events")?;
        self.requested_ranges
            .lock()
            .unwrap()
            .push((contract_address.to_string(), from, to));
        let events = self.events.lock().unwrap();
        let stream = events.get(contract_address).cloned().unwrap_or_default();
        if from == 0 || to < from || to as usize > stream.len() {
            return Err(WatcherError::InvalidResponse(format!(
                "range {}..={} outside {} events",
                from,
                to,
                stream.len()
            )));
        }
        Ok(stream[(from - 1) as usize..to as usize].to_vec())
    }

    async fn get_block_header(&self, block_hash: &str) -> WatcherResult<BlockHeader> {
        self.maybe_fail("get_block_header")?;
        self.headers
            .lock()
            .unwrap()
            .get(block_hash)
            .cloned()
            .ok_or_else(|| WatcherError::Rpc(format!("unknown block {}", block_hash)))
    }

    async fn is_block_in_main_chain(&self, block_hash: &str) -> WatcherResult<bool> {
        self.maybe_fail("is_block_in_main_chain")?;
        Ok(!self.orphans.lock().unwrap().contains(block_hash))
    }

    async fn get_transaction_status(&self, tx_id: &str) -> WatcherResult<TxStatus> {
        self.maybe_fail("get_transaction_status")?;
        Ok(self
            .tx_statuses
            .lock()
            .unwrap()
            .get(tx_id)
            .cloned()
            .unwrap_or(TxStatus::TxNotFound))
    }

    async fn get_events_by_block_hash(
        &self,
        block_hash: &str,
        contract_address: &str,
    ) -> WatcherResult<Vec<Event>> {
        self.maybe_fail("get_events_by_block_hash")?;
        Ok(self
            .events
            .lock()
            .unwrap()
            .get(contract_address)
            .map(|events| {
                events
                    .iter()
                    .filter(|e| e.block_hash == block_hash)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_contract_state(&self, contract_address: &str) -> WatcherResult<ContractState> {
        self.maybe_fail("get_contract_state")?;
        self.contract_states
            .lock()
            .unwrap()
            .get(contract_address)
            .cloned()
            .ok_or_else(|| WatcherError::Rpc(format!("unknown contract {}", contract_address)))
    }
}
