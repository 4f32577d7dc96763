// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::error::{WatcherError, WatcherResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Maps an event's consistency level to the number of blocks that must be
/// built on top of its block.
///
/// Depths never decrease as the level grows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<u8, u64>", into = "BTreeMap<u8, u64>")]
pub struct ConsistencyTable {
    depths: BTreeMap<u8, u64>,
}

impl ConsistencyTable {
    pub fn new(depths: BTreeMap<u8, u64>) -> WatcherResult<Self> {
        if depths.is_empty() {
            return Err(WatcherError::Config(
                "consistency table has no entries".to_string(),
            ));
        }
        let mut previous: Option<(u8, u64)> = None;
        for (&level, &depth) in &depths {
            if let Some((prev_level, prev_depth)) = previous {
                if depth < prev_depth {
                    return Err(WatcherError::Config(format!(
                        "consistency level {} needs {} confirmations, less than {} for level {}",
                        level, depth, prev_depth, prev_level
                    )));
                }
            }
            previous = Some((level, depth));
        }
        Ok(Self { depths })
    }

    pub fn confirmations(&self, level: u8) -> WatcherResult<u64> {
        self.depths
            .get(&level)
            .copied()
            .ok_or(WatcherError::UnsupportedConsistencyLevel(level))
    }

    pub fn len(&self) -> usize {
        self.depths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.depths.is_empty()
    }
}

impl Default for ConsistencyTable {
    fn default() -> Self {
        Self {
            depths: BTreeMap::from([(0, 1), (1, 10), (2, 105)]),
        }
    }
}

impl TryFrom<BTreeMap<u8, u64>> for ConsistencyTable {
    type Error = WatcherError;

    fn try_from(depths: BTreeMap<u8, u64>) -> Result<Self, Self::Error> {
        Self::new(depths)
    }
}

impl From<ConsistencyTable> for BTreeMap<u8, u64> {
    fn from(table: ConsistencyTable) -> Self {
        table.depths
    }
}
