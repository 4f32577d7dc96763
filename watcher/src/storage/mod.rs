// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Durable registry of bridge contracts and per-role checkpoints.

pub mod keys;
pub mod memory;
pub mod rocks;

pub use memory::MemoryStore;
pub use rocks::RocksStore;

use crate::error::{WatcherError, WatcherResult};
use crate::types::{Byte32, ContractRole};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// Ordered set of writes applied atomically by [`KeyValueStore::write`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteSet {
    ops: Vec<WriteOp>,
}

impl WriteSet {
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push(WriteOp::Put { key, value });
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.ops.push(WriteOp::Delete { key });
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &[u8]) -> WatcherResult<Option<Vec<u8>>>;

    /// Apply every op or none of them.
    fn write(&self, writes: WriteSet) -> WatcherResult<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryRecord {
    RemoteChain {
        chain_id: u16,
        address: String,
    },
    TokenWrapper {
        token_id: Byte32,
        remote_chain_id: Option<u16>,
        address: String,
    },
}

/// Record writes plus at most one checkpoint, committed together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryBatch {
    records: Vec<RegistryRecord>,
    checkpoint: Option<(ContractRole, u64)>,
}

impl RegistryBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_remote_chain(&mut self, chain_id: u16, address: impl Into<String>) {
        self.records.push(RegistryRecord::RemoteChain {
            chain_id,
            address: address.into(),
        });
    }

    pub fn put_token_wrapper(
        &mut self,
        token_id: Byte32,
        remote_chain_id: Option<u16>,
        address: impl Into<String>,
    ) {
        self.records.push(RegistryRecord::TokenWrapper {
            token_id,
            remote_chain_id,
            address: address.into(),
        });
    }

    /// Replaces any checkpoint set earlier on this batch.
    pub fn set_checkpoint(&mut self, role: ContractRole, position: u64) {
        self.checkpoint = Some((role, position));
    }

    /// Latest staged bridge contract for `chain_id`, if any.
    pub fn staged_remote_chain(&self, chain_id: u16) -> Option<&str> {
        self.records.iter().rev().find_map(|record| match record {
            RegistryRecord::RemoteChain {
                chain_id: id,
                address,
            } if *id == chain_id => Some(address.as_str()),
            _ => None,
        })
    }

    pub fn records(&self) -> &[RegistryRecord] {
        &self.records
    }

    pub fn checkpoint(&self) -> Option<(ContractRole, u64)> {
        self.checkpoint
    }

    fn into_write_set(self) -> WriteSet {
        let mut writes = WriteSet::default();
        for record in self.records {
            match record {
                RegistryRecord::RemoteChain { chain_id, address } => {
                    writes.put(keys::remote_chain_key(chain_id), address.into_bytes())
                }
                RegistryRecord::TokenWrapper {
                    token_id,
                    remote_chain_id,
                    address,
                } => writes.put(
                    keys::token_wrapper_key(&token_id, remote_chain_id),
                    address.into_bytes(),
                ),
            }
        }
        if let Some((role, position)) = self.checkpoint {
            writes.put(keys::checkpoint_key(role), position.to_be_bytes().to_vec());
        }
        writes
    }
}

/// Typed access to the registry namespaces over a [`KeyValueStore`].
#[derive(Clone)]
pub struct RegistryDb {
    store: Arc<dyn KeyValueStore>,
}

impl RegistryDb {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn put_remote_chain(&self, chain_id: u16, address: &str) -> WatcherResult<()> {
        let mut batch = RegistryBatch::new();
        batch.put_remote_chain(chain_id, address);
        self.commit_batch(batch)
    }

    pub fn get_remote_chain(&self, chain_id: u16) -> WatcherResult<String> {
        self.get_string(&keys::remote_chain_key(chain_id))?
            .ok_or_else(|| WatcherError::NotFound(format!("token bridge for chain {}", chain_id)))
    }

    pub fn put_token_wrapper(
        &self,
        token_id: Byte32,
        remote_chain_id: Option<u16>,
        address: &str,
    ) -> WatcherResult<()> {
        let mut batch = RegistryBatch::new();
        batch.put_token_wrapper(token_id, remote_chain_id, address);
        self.commit_batch(batch)
    }

    pub fn get_token_wrapper(
        &self,
        token_id: &Byte32,
        remote_chain_id: Option<u16>,
    ) -> WatcherResult<String> {
        self.get_string(&keys::token_wrapper_key(token_id, remote_chain_id))?
            .ok_or_else(|| match remote_chain_id {
                Some(chain) => {
                    WatcherError::NotFound(format!("wrapper of local token {} for chain {}", token_id, chain))
                }
                None => WatcherError::NotFound(format!("wrapper of remote token {}", token_id)),
            })
    }

    pub fn get_checkpoint(&self, role: ContractRole) -> WatcherResult<u64> {
        let raw = self
            .store
            .get(&keys::checkpoint_key(role))?
            .ok_or_else(|| WatcherError::NotFound(format!("{} checkpoint", role)))?;
        let bytes: [u8; 8] = raw.as_slice().try_into().map_err(|_| {
            WatcherError::Storage(format!("{} checkpoint has {} bytes", role, raw.len()))
        })?;
        Ok(u64::from_be_bytes(bytes))
    }

    /// Checkpoint of `role`, or 0 when the role has never committed.
    pub fn checkpoint_or_default(&self, role: ContractRole) -> WatcherResult<u64> {
        match self.get_checkpoint(role) {
            Err(WatcherError::NotFound(_)) => Ok(0),
            other => other,
        }
    }

    pub fn commit_batch(&self, batch: RegistryBatch) -> WatcherResult<()> {
        let writes = batch.into_write_set();
        if writes.is_empty() {
            return Ok(());
        }
        self.store
            .write(writes)
            .map_err(|e| WatcherError::TransactionFailed(e.to_string()))
    }

    fn get_string(&self, key: &[u8]) -> WatcherResult<Option<String>> {
        match self.store.get(key)? {
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| WatcherError::Storage(format!("non utf-8 address: {}", e))),
            None => Ok(None),
        }
    }
}
