// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::confirmation::ConsistencyTable;
use crate::types::contract_id_from_address;
use anyhow::{anyhow, bail};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use std::path::PathBuf;
use std::time::Duration;
use watcher_config::Config;

#[serde_as]
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct AlephiumConfig {
    // Rest url of the Alephium full node.
    pub rpc_url: String,
    // Sent as X-API-KEY when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    // Address group the watched contracts live in.
    #[serde(default)]
    pub group: u32,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(default = "default_height_refresh_interval", rename = "height-refresh-interval-ms")]
    pub height_refresh_interval: Duration,
}

#[serde_as]
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct WatcherNodeConfig {
    // The port that the registry query service listens on.
    pub server_listen_port: u16,
    // The port that for metrics server.
    pub metrics_port: u16,
    // Directory of the registry database.
    pub db_path: PathBuf,
    pub alephium: AlephiumConfig,
    // Base58 address of the governance contract, which emits wormhole messages.
    pub governance_contract: String,
    // Base58 address of the token bridge factory contract.
    pub token_bridge_contract: String,
    // Wormhole chain id this watcher reports as emitter chain.
    pub emitter_chain_id: u16,
    pub min_confirmations: u64,
    #[serde(default)]
    pub consistency_table: ConsistencyTable,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(default = "default_poll_interval", rename = "poll-interval-ms")]
    pub poll_interval: Duration,
    #[serde(default = "default_max_events_per_fetch")]
    pub max_events_per_fetch: u64,
    #[serde(default = "default_channel_size")]
    pub channel_size: usize,
    // Positions to start from when no checkpoint is stored yet.
    #[serde(default)]
    pub governance_start_event_index: u64,
    #[serde(default)]
    pub token_bridge_start_event_index: u64,
}

fn default_height_refresh_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_max_events_per_fetch() -> u64 {
    100
}

fn default_channel_size() -> usize {
    1000
}

impl Config for WatcherNodeConfig {}

impl WatcherNodeConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.alephium.rpc_url.is_empty() {
            bail!("alephium rpc-url is empty");
        }
        if self.alephium.height_refresh_interval.is_zero() {
            bail!("height-refresh-interval-ms must be positive");
        }
        contract_id_from_address(&self.governance_contract)
            .map_err(|e| anyhow!("governance-contract: {}", e))?;
        contract_id_from_address(&self.token_bridge_contract)
            .map_err(|e| anyhow!("token-bridge-contract: {}", e))?;
        if self.governance_contract == self.token_bridge_contract {
            bail!("governance-contract and token-bridge-contract must differ");
        }
        if self.consistency_table.is_empty() {
            bail!("consistency-table has no entries");
        }
        if self.poll_interval.is_zero() {
            bail!("poll-interval-ms must be positive");
        }
        if self.max_events_per_fetch == 0 {
            bail!("max-events-per-fetch must be positive");
        }
        if self.channel_size == 0 {
            bail!("channel-size must be positive");
        }
        if self.server_listen_port == self.metrics_port {
            bail!("server-listen-port and metrics-port must differ");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{address_from_contract_id, Byte32};

    fn yaml() -> String {
        format!(
            r#"
server-listen-port: 9191
metrics-port: 9184
db-path: /tmp/watcher-db
alephium:
  rpc-url: http://127.0.0.1:22973
  api-key: secret
  group: 0
governance-contract: {}
token-bridge-contract: {}
emitter-chain-id: 255
min-confirmations: 2
consistency-table:
  0: 1
  1: 10
poll-interval-ms: 1500
"#,
            address_from_contract_id(&Byte32([1; 32])),
            address_from_contract_id(&Byte32([2; 32])),
        )
    }

    #[test]
    fn test_load_yaml_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watcher.yaml");
        std::fs::write(&path, yaml()).unwrap();

        let config = WatcherNodeConfig::load(&path).unwrap();
        config.validate().unwrap();
        assert_eq!(config.alephium.api_key.as_deref(), Some("secret"));
        assert_eq!(config.poll_interval, Duration::from_millis(1500));
        assert_eq!(config.alephium.height_refresh_interval, Duration::from_secs(2));
        assert_eq!(config.max_events_per_fetch, 100);
        assert_eq!(config.consistency_table.confirmations(1).unwrap(), 10);
        assert_eq!(config.governance_start_event_index, 0);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config: WatcherNodeConfig = serde_yaml::from_str(&yaml()).unwrap();
        config.governance_contract = "not-an-address".to_string();
        assert!(config.validate().is_err());

        let mut config: WatcherNodeConfig = serde_yaml::from_str(&yaml()).unwrap();
        config.token_bridge_contract = config.governance_contract.clone();
        assert!(config.validate().is_err());

        let mut config: WatcherNodeConfig = serde_yaml::from_str(&yaml()).unwrap();
        config.channel_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_decreasing_consistency_table_fails_to_load() {
        let raw = yaml().replace("  1: 10", "  1: 0");
        assert!(serde_yaml::from_str::<WatcherNodeConfig>(&raw).is_err());
    }
}
