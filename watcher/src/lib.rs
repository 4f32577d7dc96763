// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

pub mod client;
pub mod config;
pub mod confirmation;
pub mod encoding;
pub mod error;
pub mod metrics;
pub mod node;
pub mod poller;
pub mod registry_cache;
pub mod registry_updater;
pub mod reobserve;
pub mod server;
pub mod storage;
pub mod types;
pub mod validator;

#[macro_export]
macro_rules! retry_with_max_elapsed_time {
    ($func:expr, $max_elapsed_time:expr) => {{
        // Delays in secs, with jitter: 0.4, 0.8, 1.6, 3.2, 6.4, 12.8, 25.6, 51.2, 60, 60 ...
        let backoff = backoff::ExponentialBackoff {
            initial_interval: Duration::from_millis(400),
            randomization_factor: 0.1,
            multiplier: 2.0,
            max_interval: Duration::from_secs(60),
            max_elapsed_time: Some($max_elapsed_time),
            ..Default::default()
        };
        backoff::future::retry(backoff, || {
            let fut = async {
                let result = $func.await;
                match result {
                    Ok(_) => {
                        return Ok(result);
                    }
                    Err(e) => {
                        // every error is retried until max_elapsed_time
                        tracing::warn!("Retrying after error: {}", e);
                        return Err(backoff::Error::transient(e));
                    }
                }
            };
            std::boxed::Box::pin(fut)
        })
        .await
    }};
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::error::{WatcherError, WatcherResult};
    use std::sync::atomic::{AtomicU32, Ordering};

    async fn height_ok() -> WatcherResult<u64> {
        Ok(7)
    }

    async fn node_down() -> WatcherResult<u64> {
        Err(WatcherError::Rpc("connection refused".to_string()))
    }

    async fn flaky(calls: &AtomicU32) -> WatcherResult<u64> {
        if calls.fetch_add(1, Ordering::SeqCst) < 2 {
            return Err(WatcherError::Rpc("timeout".to_string()));
        }
        Ok(9)
    }

    #[tokio::test]
    async fn test_retry_with_max_elapsed_time() {
        // no retry is needed, should return immediately. We give it a very small
        // max_elapsed_time and it should still finish in time.
        let max_elapsed_time = Duration::from_millis(20);
        let height = retry_with_max_elapsed_time!(height_ok(), max_elapsed_time)
            .unwrap()
            .unwrap();
        assert_eq!(height, 7);

        // now call a function that always errors and expect it to return before max_elapsed_time runs out
        let max_elapsed_time = Duration::from_secs(10);
        let instant = std::time::Instant::now();
        retry_with_max_elapsed_time!(node_down(), max_elapsed_time).unwrap_err();
        assert!(instant.elapsed() < max_elapsed_time);

        let calls = AtomicU32::new(0);
        let height = retry_with_max_elapsed_time!(flaky(&calls), max_elapsed_time)
            .unwrap()
            .unwrap();
        assert_eq!(height, 9);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
