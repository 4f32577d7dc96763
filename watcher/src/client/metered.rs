// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Wrapper that records query counts, latencies and failures for each call.

use super::ChainClient;
use crate::error::WatcherResult;
use crate::metrics::WatcherMetrics;
use crate::types::{BlockHeader, ContractState, Event, TxStatus};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct MeteredChainClient<C> {
    inner: C,
    metrics: Arc<WatcherMetrics>,
}

impl<C: ChainClient> MeteredChainClient<C> {
    pub fn new(inner: C, metrics: Arc<WatcherMetrics>) -> Self {
        Self { inner, metrics }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    async fn observe<T, F>(&self, method: &str, call: F) -> WatcherResult<T>
    where
        F: Future<Output = WatcherResult<T>>,
    {
        self.metrics.rpc_queries.with_label_values(&[method]).inc();
        let _timer = self
            .metrics
            .rpc_queries_latency
            .with_label_values(&[method])
            .start_timer();
        let result = call.await;
        if result.is_err() {
            self.metrics.rpc_errors.with_label_values(&[method]).inc();
        }
        result
    }
}

#[async_trait]
impl<C: ChainClient> ChainClient for MeteredChainClient<C> {
    async fn get_current_height(&self) -> WatcherResult<u64> {
        self.observe("get_current_height", self.inner.get_current_height())
            .await
    }

    async fn get_event_count(&self, contract_address: &str) -> WatcherResult<u64> {
        self.observe(
            "get_event_count",
            self.inner.get_event_count(contract_address),
        )
        .await
    }

    async fn get_contract_events(
        &self,
        contract_address: &str,
        from: u64,
        to: u64,
    ) -> WatcherResult<Vec<Event>> {
        self.observe(
            "get_contract_events",
            self.inner.get_contract_events(contract_address, from, to),
        )
        .await
    }

    async fn get_block_header(&self, block_hash: &str) -> WatcherResult<BlockHeader> {
        self.observe("get_block_header", self.inner.get_block_header(block_hash))
            .await
    }

    async fn is_block_in_main_chain(&self, block_hash: &str) -> WatcherResult<bool> {
        self.observe(
            "is_block_in_main_chain",
            self.inner.is_block_in_main_chain(block_hash),
        )
        .await
    }

    async fn get_transaction_status(&self, tx_id: &str) -> WatcherResult<TxStatus> {
        self.observe(
            "get_transaction_status",
            self.inner.get_transaction_status(tx_id),
        )
        .await
    }

    async fn get_events_by_block_hash(
        &self,
        block_hash: &str,
        contract_address: &str,
    ) -> WatcherResult<Vec<Event>> {
        self.observe(
            "get_events_by_block_hash",
            self.inner
                .get_events_by_block_hash(block_hash, contract_address),
        )
        .await
    }

    async fn get_contract_state(&self, contract_address: &str) -> WatcherResult<ContractState> {
        self.observe(
            "get_contract_state",
            self.inner.get_contract_state(contract_address),
        )
        .await
    }
}
