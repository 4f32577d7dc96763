// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::client::{AlephiumRestClient, ChainClient, MeteredChainClient};
use crate::confirmation::{
    constant_confirmations, governance_confirmations, ConfirmationTracker, ConsistencyTable,
};
use crate::config::WatcherNodeConfig;
use crate::error::{WatcherError, WatcherResult};
use crate::metrics::WatcherMetrics;
use crate::poller::{run_height_watcher, EventPoller, PollerConfig};
use crate::registry_cache::Registry;
use crate::registry_updater::RegistryUpdater;
use crate::reobserve::ReobservationHandler;
use crate::retry_with_max_elapsed_time;
use crate::server::{run_server, RegistryQueryHandler};
use crate::storage::{KeyValueStore, RegistryDb, RocksStore};
use crate::types::{ContractRole, MessagePublication, ObservationRequest};
use crate::validator::Validator;
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const STARTUP_RETRY_DURATION: Duration = Duration::from_secs(60);
const CACHE_METRICS_INTERVAL: Duration = Duration::from_secs(10);

/// Settings of the event pipeline, independent of transport and storage.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub governance_contract: String,
    pub token_bridge_contract: String,
    pub emitter_chain_id: u16,
    pub min_confirmations: u64,
    pub consistency_table: ConsistencyTable,
    pub poll_interval: Duration,
    pub height_refresh_interval: Duration,
    pub max_events_per_fetch: u64,
    pub channel_size: usize,
    pub governance_start_event_index: u64,
    pub token_bridge_start_event_index: u64,
}

impl From<&WatcherNodeConfig> for PipelineSettings {
    fn from(config: &WatcherNodeConfig) -> Self {
        Self {
            governance_contract: config.governance_contract.clone(),
            token_bridge_contract: config.token_bridge_contract.clone(),
            emitter_chain_id: config.emitter_chain_id,
            min_confirmations: config.min_confirmations,
            consistency_table: config.consistency_table.clone(),
            poll_interval: config.poll_interval,
            height_refresh_interval: config.alephium.height_refresh_interval,
            max_events_per_fetch: config.max_events_per_fetch,
            channel_size: config.channel_size,
            governance_start_event_index: config.governance_start_event_index,
            token_bridge_start_event_index: config.token_bridge_start_event_index,
        }
    }
}

pub struct WatcherNodeHandle {
    pub handles: Vec<JoinHandle<()>>,
    /// Receives the error of any task that stopped on a fatal error.
    pub fatal_rx: mpsc::Receiver<WatcherError>,
    /// Feeds the re-observation handler. Requests for other chains are ignored.
    pub obsv_tx: mpsc::Sender<ObservationRequest>,
    pub registry: Registry,
}

impl WatcherNodeHandle {
    /// Wait for every task to finish, after the cancellation token fired.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!("Watcher task panicked: {}", e);
            }
        }
    }
}

pub async fn run_watcher_node(
    config: WatcherNodeConfig,
    prometheus_registry: &prometheus::Registry,
    message_tx: mpsc::Sender<MessagePublication>,
    cancel: CancellationToken,
) -> anyhow::Result<WatcherNodeHandle> {
    config.validate()?;
    let metrics = Arc::new(WatcherMetrics::new(prometheus_registry));

    let rest_client = AlephiumRestClient::new(
        config.alephium.rpc_url.clone(),
        config.alephium.api_key.clone(),
        config.alephium.group,
    )?;
    info!("Connecting to Alephium node at {}", rest_client.base_url());
    let client: Arc<dyn ChainClient> =
        Arc::new(MeteredChainClient::new(rest_client, metrics.clone()));
    let store: Arc<dyn KeyValueStore> = Arc::new(RocksStore::open(&config.db_path)?);

    let mut node = start_pipeline(
        PipelineSettings::from(&config),
        client,
        store,
        metrics.clone(),
        message_tx,
        cancel.clone(),
    )
    .await?;

    let socket_address = SocketAddr::new(
        IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
        config.server_listen_port,
    );
    node.handles.push(run_server(
        &socket_address,
        RegistryQueryHandler::new(node.registry.clone()),
        metrics,
        cancel,
    ));
    Ok(node)
}

/// Bootstrap cursors and spawn every pipeline task.
pub async fn start_pipeline(
    settings: PipelineSettings,
    client: Arc<dyn ChainClient>,
    store: Arc<dyn KeyValueStore>,
    metrics: Arc<WatcherMetrics>,
    message_tx: mpsc::Sender<MessagePublication>,
    cancel: CancellationToken,
) -> WatcherResult<WatcherNodeHandle> {
    let registry = Registry::new(RegistryDb::new(store));

    let height = retry_with_max_elapsed_time!(client.get_current_height(), STARTUP_RETRY_DURATION)??;
    info!("[alephium] Current chain height {}", height);
    metrics.current_height.set(height as i64);
    let governance_cursor = bootstrap_cursor(
        &client,
        &registry,
        ContractRole::Governance,
        &settings.governance_contract,
        settings.governance_start_event_index,
    )
    .await?;
    let token_bridge_cursor = bootstrap_cursor(
        &client,
        &registry,
        ContractRole::TokenBridge,
        &settings.token_bridge_contract,
        settings.token_bridge_start_event_index,
    )
    .await?;

    let (height_tx, height_rx) = watch::channel(height);
    let (governance_tx, governance_rx) = mpsc::channel(settings.channel_size);
    let (token_bridge_tx, token_bridge_rx) = mpsc::channel(settings.channel_size);
    let (fatal_tx, fatal_rx) = mpsc::channel(8);
    let (obsv_tx, obsv_rx) = mpsc::channel(settings.channel_size);

    let governance_tracker = ConfirmationTracker::new(
        ContractRole::Governance,
        settings.governance_contract.clone(),
        client.clone(),
        governance_confirmations(settings.consistency_table.clone(), settings.min_confirmations),
        metrics.clone(),
    );
    let token_bridge_tracker = ConfirmationTracker::new(
        ContractRole::TokenBridge,
        settings.token_bridge_contract.clone(),
        client.clone(),
        constant_confirmations(settings.min_confirmations),
        metrics.clone(),
    );

    let validator = Validator::new(
        &settings.token_bridge_contract,
        settings.emitter_chain_id,
        registry.clone(),
        message_tx,
        metrics.clone(),
    )?;
    let reobservation = ReobservationHandler::new(
        settings.emitter_chain_id,
        governance_tracker.clone(),
        height_rx.clone(),
        governance_tx.clone(),
        metrics.clone(),
    );
    let governance_poller = EventPoller::new(
        PollerConfig::new(ContractRole::Governance, settings.governance_contract.clone())
            .with_poll_interval(settings.poll_interval)
            .with_max_events_per_fetch(settings.max_events_per_fetch),
        client.clone(),
        governance_tracker,
        height_rx.clone(),
        governance_tx,
        metrics.clone(),
        governance_cursor,
    );
    let token_bridge_poller = EventPoller::new(
        PollerConfig::new(ContractRole::TokenBridge, settings.token_bridge_contract.clone())
            .with_poll_interval(settings.poll_interval)
            .with_max_events_per_fetch(settings.max_events_per_fetch),
        client.clone(),
        token_bridge_tracker,
        height_rx,
        token_bridge_tx,
        metrics.clone(),
        token_bridge_cursor,
    );
    let updater = RegistryUpdater::new(client.clone(), registry.clone(), metrics.clone());

    let handles = vec![
        tokio::spawn(run_height_watcher(
            client,
            settings.height_refresh_interval,
            height_tx,
            metrics.clone(),
            cancel.clone(),
        )),
        spawn_logged_task("governance poller", governance_poller.run(cancel.clone()), &fatal_tx),
        spawn_logged_task(
            "token-bridge poller",
            token_bridge_poller.run(cancel.clone()),
            &fatal_tx,
        ),
        spawn_logged_task("validator", validator.run(governance_rx, cancel.clone()), &fatal_tx),
        spawn_logged_task(
            "registry updater",
            updater.run(token_bridge_rx, cancel.clone()),
            &fatal_tx,
        ),
        spawn_logged_task(
            "re-observation handler",
            reobservation.run(obsv_rx, cancel.clone()),
            &fatal_tx,
        ),
        tokio::spawn(report_cache_metrics(registry.clone(), metrics, cancel)),
    ];

    Ok(WatcherNodeHandle {
        handles,
        fatal_rx,
        obsv_tx,
        registry,
    })
}

/// Stored checkpoint of `role`, or `start_event_index` on first run. A cursor
/// beyond the node's event count means the node or the database belongs to
/// another network.
async fn bootstrap_cursor(
    client: &Arc<dyn ChainClient>,
    registry: &Registry,
    role: ContractRole,
    contract_address: &str,
    start_event_index: u64,
) -> WatcherResult<u64> {
    let cursor = match registry.db().get_checkpoint(role) {
        Ok(checkpoint) => checkpoint,
        Err(WatcherError::NotFound(_)) => {
            info!(
                "[{}] No checkpoint stored, starting after position {}",
                role, start_event_index
            );
            start_event_index
        }
        Err(e) => return Err(e),
    };
    let count = retry_with_max_elapsed_time!(
        client.get_event_count(contract_address),
        STARTUP_RETRY_DURATION
    )??;
    if cursor > count {
        return Err(WatcherError::Config(format!(
            "[{}] cursor {} is beyond the {} events of {}",
            role, cursor, count, contract_address
        )));
    }
    info!(
        "[{}] Resuming {} at position {} of {}",
        role, contract_address, cursor, count
    );
    Ok(cursor)
}

fn spawn_logged_task<F>(
    name: &'static str,
    task: F,
    fatal_tx: &mpsc::Sender<WatcherError>,
) -> JoinHandle<()>
where
    F: Future<Output = WatcherResult<()>> + Send + 'static,
{
    let fatal_tx = fatal_tx.clone();
    tokio::spawn(async move {
        match task.await {
            Ok(()) => info!("{} exited", name),
            Err(e) => {
                error!("{} failed: {}", name, e);
                let _ = fatal_tx.send(e).await;
            }
        }
    })
}

async fn report_cache_metrics(
    registry: Registry,
    metrics: Arc<WatcherMetrics>,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(CACHE_METRICS_INTERVAL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                let stats = registry.cache_stats();
                metrics.registry_cache_hits.set(stats.hits as i64);
                metrics.registry_cache_misses.set(stats.misses as i64);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockChainClient;
    use crate::encoding::tests::governance_event;
    use crate::encoding::TransferMessage;
    use crate::poller::tests::header;
    use crate::registry_updater::{BRIDGE_FOR_CHAIN_CREATED, TOKEN_WRAPPER_CREATED};
    use crate::storage::MemoryStore;
    use crate::types::{address_from_contract_id, Byte32, ContractState, Event, Field, FieldType};
    use primitive_types::U256;
    use tokio::time::timeout;

    const GOVERNANCE: Byte32 = Byte32([0x10; 32]);
    const FACTORY: Byte32 = Byte32([0x20; 32]);
    const CHAIN_CONTRACT: Byte32 = Byte32([0x30; 32]);
    const WRAPPER: Byte32 = Byte32([0x40; 32]);
    const TOKEN: Byte32 = Byte32([0x50; 32]);

    fn settings() -> PipelineSettings {
        PipelineSettings {
            governance_contract: address_from_contract_id(&GOVERNANCE),
            token_bridge_contract: address_from_contract_id(&FACTORY),
            emitter_chain_id: 255,
            min_confirmations: 1,
            consistency_table: ConsistencyTable::default(),
            poll_interval: Duration::from_millis(10),
            height_refresh_interval: Duration::from_millis(10),
            max_events_per_fetch: 10,
            channel_size: 4,
            governance_start_event_index: 0,
            token_bridge_start_event_index: 0,
        }
    }

    fn factory_event(kind: u32, new_contract: &Byte32, tx: &str) -> Event {
        Event {
            block_hash: "b1".to_string(),
            contract_address: address_from_contract_id(&FACTORY),
            tx_id: tx.to_string(),
            index: kind,
            fields: vec![Field::new(FieldType::Address, address_from_contract_id(new_contract))],
        }
    }

    fn seed_registry_contracts(client: &MockChainClient) {
        client.set_contract_state(ContractState {
            address: address_from_contract_id(&CHAIN_CONTRACT),
            fields: vec![
                Field::new(FieldType::ByteVec, FACTORY.to_hex()),
                Field::new(FieldType::U256, "255"),
                Field::new(FieldType::U256, "2"),
            ],
        });
        client.set_contract_state(ContractState {
            address: address_from_contract_id(&WRAPPER),
            fields: vec![
                Field::new(FieldType::ByteVec, FACTORY.to_hex()),
                Field::new(FieldType::ByteVec, CHAIN_CONTRACT.to_hex()),
                Field::new(FieldType::U256, "255"),
                Field::new(FieldType::U256, "2"),
                Field::new(FieldType::ByteVec, TOKEN.to_hex()),
                Field::new(FieldType::Bool, "true"),
            ],
        });
        client.push_event(factory_event(BRIDGE_FOR_CHAIN_CREATED, &CHAIN_CONTRACT, "f1"));
        client.push_event(factory_event(TOKEN_WRAPPER_CREATED, &WRAPPER, "f2"));
    }

    fn transfer_event(tx: &str) -> Event {
        let payload = TransferMessage {
            amount: U256::from(5u64),
            token_id: TOKEN,
            token_chain_id: 255,
            to_address: Byte32([0x60; 32]),
            to_chain_id: 2,
            fee: U256::zero(),
            is_local_token: true,
            sender_id: WRAPPER,
        }
        .encode();
        let mut event = governance_event(tx, FACTORY, 0, 1, &payload, 0);
        event.contract_address = address_from_contract_id(&GOVERNANCE);
        event.block_hash = "b1".to_string();
        event
    }

    async fn wait_for_checkpoint(registry: &Registry, role: ContractRole, position: u64) {
        timeout(Duration::from_secs(5), async {
            while registry.checkpoint(role).unwrap() < position {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_factory_registration_then_transfer_forwarded() {
        let client = MockChainClient::default();
        client.set_height(10);
        client.add_header(header("b1", 1));
        seed_registry_contracts(&client);

        let (message_tx, mut message_rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let node = start_pipeline(
            settings(),
            Arc::new(client.clone()),
            Arc::new(MemoryStore::new()),
            Arc::new(WatcherMetrics::new_for_testing()),
            message_tx,
            cancel.clone(),
        )
        .await
        .unwrap();

        wait_for_checkpoint(&node.registry, ContractRole::TokenBridge, 2).await;
        assert_eq!(
            node.registry.token_wrapper_contract(&TOKEN, Some(2)).await.unwrap(),
            WRAPPER
        );

        client.push_event(transfer_event("cc".repeat(32).as_str()));
        let message = timeout(Duration::from_secs(5), message_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.emitter_chain, 255);
        assert_eq!(message.tx_hash, Byte32([0xcc; 32]));
        wait_for_checkpoint(&node.registry, ContractRole::Governance, 1).await;

        cancel.cancel();
        node.join().await;
    }

    #[tokio::test]
    async fn test_reobservation_request_through_node_handle() {
        let client = MockChainClient::default();
        client.set_height(10);
        client.add_header(header("b1", 1));
        seed_registry_contracts(&client);
        // already behind the governance start position, so only re-observation finds it
        client.push_event(transfer_event(&"dd".repeat(32)));
        let mut settings = settings();
        settings.governance_start_event_index = 1;

        let (message_tx, mut message_rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let node = start_pipeline(
            settings,
            Arc::new(client.clone()),
            Arc::new(MemoryStore::new()),
            Arc::new(WatcherMetrics::new_for_testing()),
            message_tx,
            cancel.clone(),
        )
        .await
        .unwrap();
        wait_for_checkpoint(&node.registry, ContractRole::TokenBridge, 2).await;

        node.obsv_tx
            .send(ObservationRequest {
                chain_id: 255,
                tx_hash: vec![0xdd; 32],
            })
            .await
            .unwrap();
        let message = timeout(Duration::from_secs(5), message_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.tx_hash, Byte32([0xdd; 32]));
        assert_eq!(message.emitter_address, FACTORY);
        assert_eq!(node.registry.checkpoint(ContractRole::Governance).unwrap(), 0);

        cancel.cancel();
        node.join().await;
    }

    #[tokio::test]
    async fn test_resumes_from_checkpoint_and_reports_fatal_errors() {
        let client = MockChainClient::default();
        client.set_height(10);
        client.add_header(header("b1", 1));
        let store = Arc::new(MemoryStore::new());
        let db = RegistryDb::new(store.clone());
        let mut batch = crate::storage::RegistryBatch::new();
        batch.set_checkpoint(ContractRole::Governance, 1);
        db.commit_batch(batch).unwrap();

        // position 1 was handled before the restart, position 2 is malformed
        client.push_event(transfer_event(&"aa".repeat(32)));
        let mut malformed = transfer_event(&"bb".repeat(32));
        malformed.fields.pop();
        client.push_event(malformed);

        let (message_tx, mut message_rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let mut node = start_pipeline(
            settings(),
            Arc::new(client.clone()),
            store,
            Arc::new(WatcherMetrics::new_for_testing()),
            message_tx,
            cancel.clone(),
        )
        .await
        .unwrap();

        let fatal = timeout(Duration::from_secs(5), node.fatal_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(fatal, WatcherError::MalformedEvent(_)));
        assert!(message_rx.try_recv().is_err());
        assert_eq!(node.registry.checkpoint(ContractRole::Governance).unwrap(), 1);
        assert_eq!(
            client.requested_ranges()[0],
            (address_from_contract_id(&GOVERNANCE), 2, 2)
        );

        cancel.cancel();
        node.join().await;
    }

    #[tokio::test]
    async fn test_checkpoint_beyond_event_count_is_rejected() {
        let client = MockChainClient::default();
        let mut settings = settings();
        settings.token_bridge_start_event_index = 3;
        let (message_tx, _message_rx) = mpsc::channel(1);
        let result = start_pipeline(
            settings,
            Arc::new(client),
            Arc::new(MemoryStore::new()),
            Arc::new(WatcherMetrics::new_for_testing()),
            message_tx,
            CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(WatcherError::Config(_))));
    }
}
