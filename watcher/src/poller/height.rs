// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::client::ChainClient;
use crate::metrics::WatcherMetrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Keep `height_tx` at the latest chain height. The published height never
/// decreases.
pub async fn run_height_watcher(
    client: Arc<dyn ChainClient>,
    refresh_interval: Duration,
    height_tx: watch::Sender<u64>,
    metrics: Arc<WatcherMetrics>,
    cancel: CancellationToken,
) {
    info!(
        "[alephium] Starting height watcher (interval={:?})",
        refresh_interval
    );

    let mut interval = time::interval(refresh_interval);
    interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("[alephium] Height watcher cancelled");
                break;
            }
            _ = interval.tick() => {
                match client.get_current_height().await {
                    Ok(new_height) => {
                        let last_height = *height_tx.borrow();
                        if new_height > last_height {
                            debug!("[alephium] New chain height: {}", new_height);
                            height_tx.send_replace(new_height);
                            metrics.current_height.set(new_height as i64);
                        }
                    }
                    Err(e) => {
                        warn!("[alephium] Failed to get chain height: {}", e);
                    }
                }
            }
        }
    }
}
