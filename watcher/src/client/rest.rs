// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

// Async client for the full node REST API.
// Only the handful of endpoints the watcher needs are wrapped here.

use super::ChainClient;
use crate::error::{WatcherError, WatcherResult};
use crate::types::{BlockHeader, ContractState, Event, Field, TxStatus};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::OnceLock;
use std::time::Duration;

const API_KEY_HEADER: &str = "X-API-KEY";

#[derive(Clone, Debug)]
pub struct AlephiumRestClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    group: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChainInfo {
    current_height: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContractEvents {
    events: Vec<ContractEvent>,
    next_start: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContractEvent {
    block_hash: String,
    tx_id: String,
    event_index: u32,
    fields: Vec<Field>,
}

#[derive(Debug, Deserialize)]
struct BlockEvents {
    events: Vec<BlockEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlockEvent {
    tx_id: String,
    contract_address: String,
    event_index: u32,
    fields: Vec<Field>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawContractState {
    address: String,
    #[serde(default)]
    fields: Vec<Field>,
    #[serde(default)]
    imm_fields: Vec<Field>,
    #[serde(default)]
    mut_fields: Vec<Field>,
}

impl From<RawContractState> for ContractState {
    fn from(raw: RawContractState) -> Self {
        // newer nodes split state into immutable and mutable fields
        let fields = if raw.fields.is_empty() {
            raw.imm_fields.into_iter().chain(raw.mut_fields).collect()
        } else {
            raw.fields
        };
        ContractState {
            address: raw.address,
            fields,
        }
    }
}

fn is_transient_transport_error(err: &reqwest::Error) -> bool {
    if err.is_connect() || err.is_timeout() {
        return true;
    }

    let msg = err.to_string().to_lowercase();
    msg.contains("connection closed")
        || msg.contains("connection reset")
        || msg.contains("broken pipe")
        || msg.contains("unexpected eof")
}

impl AlephiumRestClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        group: u32,
    ) -> WatcherResult<Self> {
        fn shared_http_client() -> WatcherResult<reqwest::Client> {
            static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
            if let Some(client) = CLIENT.get() {
                return Ok(client.clone());
            }
            let client = reqwest::Client::builder()
                .pool_max_idle_per_host(16)
                .tcp_keepalive(Some(Duration::from_secs(30)))
                .connect_timeout(Duration::from_secs(2))
                .timeout(Duration::from_secs(30))
                .build()
                .map_err(|e| WatcherError::Config(format!("failed to build http client: {}", e)))?;
            Ok(CLIENT.get_or_init(|| client).clone())
        }

        Ok(Self {
            http_client: shared_http_client()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            group,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> WatcherResult<T> {
        let url = format!("{}{}", self.base_url, path);
        let max_attempts: usize = 3;

        for attempt in 0..max_attempts {
            let mut request = self.http_client.get(&url).query(query);
            if let Some(api_key) = &self.api_key {
                request = request.header(API_KEY_HEADER, api_key);
            }

            let response = match request.send().await {
                Ok(resp) => resp,
                Err(err) => {
                    if attempt + 1 < max_attempts && is_transient_transport_error(&err) {
                        tracing::warn!(
                            "[RPC] transport error calling {} (attempt {}/{}), retrying",
                            path,
                            attempt + 1,
                            max_attempts
                        );
                        tokio::time::sleep(Duration::from_millis(50 * (attempt as u64 + 1))).await;
                        continue;
                    }
                    return Err(WatcherError::Rpc(format!("{}: {}", path, err)));
                }
            };

            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| WatcherError::Rpc(format!("{}: {}", path, e)))?;
            if !status.is_success() {
                tracing::debug!("[RPC] <<< HTTP error {} for {}: {}", status, path, body);
                return Err(WatcherError::Rpc(format!(
                    "{} returned HTTP {}: {}",
                    path, status, body
                )));
            }

            return serde_json::from_str(&body)
                .map_err(|e| WatcherError::InvalidResponse(format!("{}: {}", path, e)));
        }

        Err(WatcherError::Rpc(format!(
            "{} failed after {} attempts",
            path, max_attempts
        )))
    }
}

#[async_trait]
impl ChainClient for AlephiumRestClient {
    async fn get_current_height(&self) -> WatcherResult<u64> {
        let info: ChainInfo = self
            .get(
                "/blockflow/chain-info",
                &[
                    ("fromGroup", self.group.to_string()),
                    ("toGroup", self.group.to_string()),
                ],
            )
            .await?;
        Ok(info.current_height)
    }

    async fn get_event_count(&self, contract_address: &str) -> WatcherResult<u64> {
        self.get(
            &format!("/events/contract/{}/current-count", contract_address),
            &[],
        )
        .await
    }

    async fn get_contract_events(
        &self,
        contract_address: &str,
        from: u64,
        to: u64,
    ) -> WatcherResult<Vec<Event>> {
        if from == 0 || to < from {
            return Err(WatcherError::Rpc(format!(
                "invalid event range {}..={}",
                from, to
            )));
        }
        let wanted = (to - from + 1) as usize;
        let mut events = Vec::with_capacity(wanted);
        // node counters are 0-based
        let mut start = from - 1;

        while events.len() < wanted {
            let limit = wanted - events.len();
            let page: ContractEvents = self
                .get(
                    &format!("/events/contract/{}", contract_address),
                    &[("start", start.to_string()), ("limit", limit.to_string())],
                )
                .await?;
            if page.events.is_empty() {
                return Err(WatcherError::InvalidResponse(format!(
                    "contract {} has no events at position {}",
                    contract_address,
                    start + 1
                )));
            }
            events.extend(page.events.into_iter().take(limit).map(|e| Event {
                block_hash: e.block_hash,
                contract_address: contract_address.to_string(),
                tx_id: e.tx_id,
                index: e.event_index,
                fields: e.fields,
            }));
            start = page.next_start;
        }
        Ok(events)
    }

    async fn get_block_header(&self, block_hash: &str) -> WatcherResult<BlockHeader> {
        self.get(&format!("/blockflow/headers/{}", block_hash), &[])
            .await
    }

    async fn is_block_in_main_chain(&self, block_hash: &str) -> WatcherResult<bool> {
        self.get(
            "/blockflow/is-block-in-main-chain",
            &[("blockHash", block_hash.to_string())],
        )
        .await
    }

    async fn get_transaction_status(&self, tx_id: &str) -> WatcherResult<TxStatus> {
        self.get("/transactions/status", &[("txId", tx_id.to_string())])
            .await
    }

    async fn get_events_by_block_hash(
        &self,
        block_hash: &str,
        contract_address: &str,
    ) -> WatcherResult<Vec<Event>> {
        let page: BlockEvents = self
            .get(&format!("/events/block-hash/{}", block_hash), &[])
            .await?;
        Ok(page
            .events
            .into_iter()
            .filter(|e| e.contract_address == contract_address)
            .map(|e| Event {
                block_hash: block_hash.to_string(),
                contract_address: e.contract_address,
                tx_id: e.tx_id,
                index: e.event_index,
                fields: e.fields,
            })
            .collect())
    }

    async fn get_contract_state(&self, contract_address: &str) -> WatcherResult<ContractState> {
        let raw: RawContractState = self
            .get(
                &format!("/contracts/{}/state", contract_address),
                &[("group", self.group.to_string())],
            )
            .await?;
        Ok(raw.into())
    }
}
