// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use super::{KeyValueStore, WriteOp, WriteSet};
use crate::error::{WatcherError, WatcherResult};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// In-memory store for tests. A write is staged on a copy of the map and only
/// swapped in once every op applied, so an injected failure leaves no trace.
#[derive(Default, Clone)]
pub struct MemoryStore {
    data: Arc<Mutex<BTreeMap<Vec<u8>, Vec<u8>>>>,
    fail_after_puts: Arc<Mutex<Option<usize>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent writes fail once `puts` puts have been staged.
    pub fn fail_after_puts(&self, puts: usize) {
        *self.fail_after_puts.lock().unwrap() = Some(puts);
    }

    pub fn clear_failure(&self) {
        *self.fail_after_puts.lock().unwrap() = None;
    }

    pub fn len(&self) -> usize {
        self.data.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &[u8]) -> WatcherResult<Option<Vec<u8>>> {
        let data = self
            .data
            .lock()
            .map_err(|e| WatcherError::Storage(e.to_string()))?;
        Ok(data.get(key).cloned())
    }

    fn write(&self, writes: WriteSet) -> WatcherResult<()> {
        let fail_after = *self
            .fail_after_puts
            .lock()
            .map_err(|e| WatcherError::Storage(e.to_string()))?;
        let mut data = self
            .data
            .lock()
            .map_err(|e| WatcherError::Storage(e.to_string()))?;

        let mut staged = data.clone();
        let mut puts = 0;
        for op in writes.ops() {
            match op {
                WriteOp::Put { key, value } => {
                    if fail_after == Some(puts) {
                        return Err(WatcherError::Storage(format!(
                            "injected failure after {} puts",
                            puts
                        )));
                    }
                    staged.insert(key.clone(), value.clone());
                    puts += 1;
                }
                WriteOp::Delete { key } => {
                    staged.remove(key);
                }
            }
        }
        *data = staged;
        Ok(())
    }
}
