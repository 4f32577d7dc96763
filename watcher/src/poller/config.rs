// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::error::{WatcherError, WatcherResult};
use crate::types::ContractRole;
use std::time::Duration;

/// Configuration of one per-contract poller
#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub role: ContractRole,
    /// Base58 address of the watched contract
    pub contract_address: String,
    pub poll_interval: Duration,
    /// Upper bound on events fetched in one cycle
    pub max_events_per_fetch: u64,
}

impl PollerConfig {
    pub fn new(role: ContractRole, contract_address: impl Into<String>) -> Self {
        Self {
            role,
            contract_address: contract_address.into(),
            poll_interval: Duration::from_secs(5),
            max_events_per_fetch: 100,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_max_events_per_fetch(mut self, max_events_per_fetch: u64) -> Self {
        self.max_events_per_fetch = max_events_per_fetch;
        self
    }

    pub fn validate(&self) -> WatcherResult<()> {
        if self.contract_address.is_empty() {
            return Err(WatcherError::Config(format!(
                "[{}] contract address is empty",
                self.role
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(WatcherError::Config(format!(
                "[{}] poll interval must be positive",
                self.role
            )));
        }
        if self.max_events_per_fetch == 0 {
            return Err(WatcherError::Config(format!(
                "[{}] max events per fetch must be positive",
                self.role
            )));
        }
        Ok(())
    }

    /// Positions to fetch this cycle, or `None` when the cursor is caught up.
    pub fn fetch_range(&self, cursor: u64, event_count: u64) -> Option<(u64, u64)> {
        if event_count <= cursor {
            return None;
        }
        let to = event_count.min(cursor.saturating_add(self.max_events_per_fetch));
        Some((cursor + 1, to))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_range() {
        let config = PollerConfig::new(ContractRole::Governance, "addr").with_max_events_per_fetch(10);
        assert_eq!(config.fetch_range(0, 0), None);
        assert_eq!(config.fetch_range(5, 5), None);
        assert_eq!(config.fetch_range(5, 3), None);
        assert_eq!(config.fetch_range(0, 3), Some((1, 3)));
        assert_eq!(config.fetch_range(3, 100), Some((4, 13)));
    }

    #[test]
    fn test_validate() {
        assert!(PollerConfig::new(ContractRole::TokenBridge, "addr").validate().is_ok());
        assert!(PollerConfig::new(ContractRole::TokenBridge, "").validate().is_err());
        assert!(PollerConfig::new(ContractRole::TokenBridge, "addr")
            .with_poll_interval(Duration::ZERO)
            .validate()
            .is_err());
        assert!(PollerConfig::new(ContractRole::TokenBridge, "addr")
            .with_max_events_per_fetch(0)
            .validate()
            .is_err());
    }
}
