// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Read-through cache of registry records.
//!
//! Records map a logical bridge entity to a contract id and are never
//! rewritten on chain, so cached entries do not expire and nothing
//! invalidates them.

use crate::error::{WatcherError, WatcherResult};
use crate::storage::{RegistryBatch, RegistryDb, RegistryRecord};
use crate::types::{contract_id_from_address, Byte32, ContractRole};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

#[derive(Debug, Default)]
pub struct RegistryCache {
    remote_chains: RwLock<HashMap<u16, Byte32>>,
    local_wrappers: RwLock<HashMap<(Byte32, u16), Byte32>>,
    remote_wrappers: RwLock<HashMap<Byte32, Byte32>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl RegistryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_remote_chain(&self, chain_id: u16) -> Option<Byte32> {
        let value = self.remote_chains.read().await.get(&chain_id).copied();
        self.record(value.is_some());
        value
    }

    pub async fn put_remote_chain(&self, chain_id: u16, contract_id: Byte32) {
        self.remote_chains.write().await.insert(chain_id, contract_id);
    }

    pub async fn get_token_wrapper(
        &self,
        token_id: &Byte32,
        remote_chain_id: Option<u16>,
    ) -> Option<Byte32> {
        let value = match remote_chain_id {
            Some(chain) => self
                .local_wrappers
                .read()
                .await
                .get(&(*token_id, chain))
                .copied(),
            None => self.remote_wrappers.read().await.get(token_id).copied(),
        };
        self.record(value.is_some());
        value
    }

    pub async fn put_token_wrapper(
        &self,
        token_id: Byte32,
        remote_chain_id: Option<u16>,
        contract_id: Byte32,
    ) {
        match remote_chain_id {
            Some(chain) => {
                self.local_wrappers
                    .write()
                    .await
                    .insert((token_id, chain), contract_id);
            }
            None => {
                self.remote_wrappers
                    .write()
                    .await
                    .insert(token_id, contract_id);
            }
        }
    }

    fn record(&self, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// Cache statistics for monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Registry lookups resolved to contract ids, cache first.
#[derive(Clone)]
pub struct Registry {
    db: RegistryDb,
    cache: Arc<RegistryCache>,
}

impl Registry {
    pub fn new(db: RegistryDb) -> Self {
        Self {
            db,
            cache: Arc::new(RegistryCache::new()),
        }
    }

    pub fn db(&self) -> &RegistryDb {
        &self.db
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Contract id of the bridge-for-chain contract serving `chain_id`.
    pub async fn remote_chain_contract(&self, chain_id: u16) -> WatcherResult<Byte32> {
        if let Some(id) = self.cache.get_remote_chain(chain_id).await {
            return Ok(id);
        }
        let address = self.db.get_remote_chain(chain_id)?;
        let id = contract_id_from_address(&address)?;
        self.cache.put_remote_chain(chain_id, id).await;
        Ok(id)
    }

    /// Contract id of the wrapper for `token_id`; see
    /// [`RegistryDb::get_token_wrapper`] for the namespace selection.
    pub async fn token_wrapper_contract(
        &self,
        token_id: &Byte32,
        remote_chain_id: Option<u16>,
    ) -> WatcherResult<Byte32> {
        if let Some(id) = self.cache.get_token_wrapper(token_id, remote_chain_id).await {
            return Ok(id);
        }
        let address = self.db.get_token_wrapper(token_id, remote_chain_id)?;
        let id = contract_id_from_address(&address)?;
        self.cache
            .put_token_wrapper(*token_id, remote_chain_id, id)
            .await;
        Ok(id)
    }

    pub fn checkpoint(&self, role: ContractRole) -> WatcherResult<u64> {
        self.db.checkpoint_or_default(role)
    }

    /// Commit `batch` and, only once it is durable, fill the cache with its
    /// records.
    pub async fn commit_batch(&self, batch: RegistryBatch) -> WatcherResult<()> {
        let records = batch.records().to_vec();
        self.db.commit_batch(batch)?;
        for record in records {
            if let Err(e) = self.backfill(&record).await {
                warn!("Skipping cache backfill for {:?}: {}", record, e);
            }
        }
        Ok(())
    }

    async fn backfill(&self, record: &RegistryRecord) -> Result<(), WatcherError> {
        match record {
            RegistryRecord::RemoteChain { chain_id, address } => {
                let id = contract_id_from_address(address)?;
                self.cache.put_remote_chain(*chain_id, id).await;
            }
            RegistryRecord::TokenWrapper {
                token_id,
                remote_chain_id,
                address,
            } => {
                let id = contract_id_from_address(address)?;
                self.cache
                    .put_token_wrapper(*token_id, *remote_chain_id, id)
                    .await;
            }
        }
        Ok(())
    }
}
