// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Full node access used by the pollers and re-observation.

mod metered;
#[cfg(test)]
pub(crate) mod mock;
mod rest;

pub use metered::MeteredChainClient;
#[cfg(test)]
pub(crate) use mock::MockChainClient;
pub use rest::AlephiumRestClient;

use crate::error::WatcherResult;
use crate::types::{BlockHeader, ContractState, Event, TxStatus};
use async_trait::async_trait;

/// Errors are [`crate::error::WatcherError::Rpc`] for transport failures and
/// [`crate::error::WatcherError::InvalidResponse`] for unparseable answers.
#[async_trait]
pub trait ChainClient: Send + Sync + 'static {
    async fn get_current_height(&self) -> WatcherResult<u64>;

    /// Number of events the contract has emitted so far.
    async fn get_event_count(&self, contract_address: &str) -> WatcherResult<u64>;

    /// Events at 1-based positions `from..=to`, in stream order.
    async fn get_contract_events(
        &self,
        contract_address: &str,
        from: u64,
        to: u64,
    ) -> WatcherResult<Vec<Event>>;

    async fn get_block_header(&self, block_hash: &str) -> WatcherResult<BlockHeader>;

    async fn is_block_in_main_chain(&self, block_hash: &str) -> WatcherResult<bool>;

    async fn get_transaction_status(&self, tx_id: &str) -> WatcherResult<TxStatus>;

    /// Events emitted by `contract_address` in the given block.
    async fn get_events_by_block_hash(
        &self,
        block_hash: &str,
        contract_address: &str,
    ) -> WatcherResult<Vec<Event>>;

    async fn get_contract_state(&self, contract_address: &str) -> WatcherResult<ContractState>;
}
