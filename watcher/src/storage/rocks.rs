// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use super::{KeyValueStore, WriteOp, WriteSet};
use crate::error::WatcherResult;
use rocksdb::{Options, WriteBatch, WriteOptions, DB};
use std::path::Path;
use tap::Tap;

pub struct RocksStore {
    db: DB,
}

impl RocksStore {
    pub fn open<P: AsRef<Path>>(path: P) -> WatcherResult<Self> {
        let db = DB::open(&Self::db_opts(), path)?;
        Ok(Self { db })
    }

    fn db_opts() -> Options {
        Options::default().tap_mut(|o| {
            o.create_if_missing(true);
            o.set_max_background_jobs(2);
            o.set_paranoid_checks(true);
        })
    }

    fn write_opts() -> WriteOptions {
        WriteOptions::default().tap_mut(|o| {
            // checkpoints must survive a crash right after commit
            o.set_sync(true);
            o.disable_wal(false);
        })
    }
}

impl KeyValueStore for RocksStore {
    fn get(&self, key: &[u8]) -> WatcherResult<Option<Vec<u8>>> {
        Ok(self.db.get(key)?)
    }

    fn write(&self, writes: WriteSet) -> WatcherResult<()> {
        let mut batch = WriteBatch::default();
        for op in writes.ops() {
            match op {
                WriteOp::Put { key, value } => batch.put(key, value),
                WriteOp::Delete { key } => batch.delete(key),
            }
        }
        self.db.write_opt(batch, &Self::write_opts())?;
        Ok(())
    }
}
