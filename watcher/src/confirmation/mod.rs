// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Confirmation depth checks.
//!
//! An event is final once `depth` blocks have been built on top of its block:
//!
//! ```text
//! is_confirmed := current_height >= block_height + confirmations
//! ```
//!
//! The depth of each event is chosen by a per-role [`ConfirmationsFn`]:
//! governance events map their consistency level through a
//! [`ConsistencyTable`], token-bridge events use a fixed minimum.

mod table;
mod tracker;

pub use table::ConsistencyTable;
pub use tracker::ConfirmationTracker;

use crate::error::WatcherResult;
use crate::types::{Event, UnconfirmedEvent};
use std::sync::Arc;

/// Index of the consistency level field in a governance event.
pub const CONSISTENCY_LEVEL_FIELD: usize = 3;

/// Computes the confirmation depth an event must reach.
pub type ConfirmationsFn = Arc<dyn Fn(&Event) -> WatcherResult<u64> + Send + Sync>;

pub fn is_confirmed(current_height: u64, block_height: u64, confirmations: u64) -> bool {
    current_height >= block_height.saturating_add(confirmations)
}

/// Split `events` into the confirmed prefix and the rest, both ordered by
/// event index.
///
/// Once one event is still pending every later event stays pending too, even
/// if its own depth is already reached, so the checkpoint never skips it.
pub fn partition(
    mut events: Vec<UnconfirmedEvent>,
    current_height: u64,
) -> (Vec<UnconfirmedEvent>, Vec<UnconfirmedEvent>) {
    events.sort_by_key(|e| e.event_index);
    let split = events
        .iter()
        .position(|e| !is_confirmed(current_height, e.block_height(), e.confirmations))
        .unwrap_or(events.len());
    let pending = events.split_off(split);
    (events, pending)
}

/// Governance depth: the consistency level looked up in `table`, never less
/// than `min_confirmations`.
pub fn governance_confirmations(table: ConsistencyTable, min_confirmations: u64) -> ConfirmationsFn {
    Arc::new(move |event: &Event| {
        let field = event.fields.get(CONSISTENCY_LEVEL_FIELD).ok_or_else(|| {
            crate::error::WatcherError::MalformedEvent(format!(
                "event in tx {} has no consistency level",
                event.tx_id
            ))
        })?;
        let level = field.to_u8()?;
        Ok(table.confirmations(level)?.max(min_confirmations))
    })
}

pub fn constant_confirmations(confirmations: u64) -> ConfirmationsFn {
    Arc::new(move |_: &Event| Ok(confirmations))
}
