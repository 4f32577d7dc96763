// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use prometheus::{
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, register_int_gauge_vec_with_registry,
    register_int_gauge_with_registry, HistogramVec, IntCounter, IntCounterVec, IntGauge,
    IntGaugeVec, Registry,
};

const FINE_GRAINED_LATENCY_SEC_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.05, 0.1, 0.15, 0.2, 0.25, 0.3, 0.35, 0.4, 0.45, 0.5, 0.6, 0.7, 0.8, 0.9,
    1.0, 1.2, 1.4, 1.6, 1.8, 2.0, 2.5, 3.0, 3.5, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10., 15., 20., 30.,
    60.,
];

#[derive(Clone, Debug)]
pub struct WatcherMetrics {
    pub(crate) requests_received: IntCounterVec,
    pub(crate) requests_ok: IntCounterVec,
    pub(crate) err_requests: IntCounterVec,
    pub(crate) requests_inflight: IntGaugeVec,

    pub(crate) current_height: IntGauge,
    pub(crate) checkpoint: IntGaugeVec,

    pub(crate) received_events: IntCounterVec,
    pub(crate) confirmed_events: IntCounterVec,
    pub(crate) reobserved_events: IntCounter,
    pub(crate) forwarded_messages: IntCounter,
    pub(crate) dropped_messages: IntCounterVec,
    pub(crate) registry_records_committed: IntCounterVec,

    pub(crate) rpc_queries: IntCounterVec,
    pub(crate) rpc_queries_latency: HistogramVec,
    pub(crate) rpc_errors: IntCounterVec,

    pub(crate) registry_cache_hits: IntGauge,
    pub(crate) registry_cache_misses: IntGauge,
}

impl WatcherMetrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            requests_received: register_int_counter_vec_with_registry!(
                "watcher_requests_received",
                "Total number of requests received in the query service, by request type",
                &["type"],
                registry,
            )
            .unwrap(),
            requests_ok: register_int_counter_vec_with_registry!(
                "watcher_requests_ok",
                "Total number of ok requests, by request type",
                &["type"],
                registry,
            )
            .unwrap(),
            err_requests: register_int_counter_vec_with_registry!(
                "watcher_err_requests",
                "Total number of erred requests, by request type",
                &["type"],
                registry,
            )
            .unwrap(),
            requests_inflight: register_int_gauge_vec_with_registry!(
                "watcher_requests_inflight",
                "Total number of inflight requests, by request type",
                &["type"],
                registry,
            )
            .unwrap(),
            current_height: register_int_gauge_with_registry!(
                "watcher_current_height",
                "Latest chain height observed by the height watcher",
                registry,
            )
            .unwrap(),
            checkpoint: register_int_gauge_vec_with_registry!(
                "watcher_checkpoint",
                "Highest committed event position, by contract role",
                &["role"],
                registry,
            )
            .unwrap(),
            received_events: register_int_counter_vec_with_registry!(
                "watcher_received_events",
                "Total number of events fetched by the poller, by contract role",
                &["role"],
                registry,
            )
            .unwrap(),
            confirmed_events: register_int_counter_vec_with_registry!(
                "watcher_confirmed_events",
                "Total number of events that reached their confirmation depth, by contract role",
                &["role"],
                registry,
            )
            .unwrap(),
            reobserved_events: register_int_counter_with_registry!(
                "watcher_reobserved_events",
                "Total number of events produced by re-observation requests",
                registry,
            )
            .unwrap(),
            forwarded_messages: register_int_counter_with_registry!(
                "watcher_forwarded_messages",
                "Total number of messages forwarded downstream",
                registry,
            )
            .unwrap(),
            dropped_messages: register_int_counter_vec_with_registry!(
                "watcher_dropped_messages",
                "Total number of dropped events or messages, by reason",
                &["reason"],
                registry,
            )
            .unwrap(),
            registry_records_committed: register_int_counter_vec_with_registry!(
                "watcher_registry_records_committed",
                "Total number of registry records committed, by kind",
                &["kind"],
                registry,
            )
            .unwrap(),
            rpc_queries: register_int_counter_vec_with_registry!(
                "watcher_rpc_queries",
                "Total number of queries issued to the full node, by request type",
                &["type"],
                registry,
            )
            .unwrap(),
            rpc_queries_latency: register_histogram_vec_with_registry!(
                "watcher_rpc_queries_latency",
                "Latency of queries issued to the full node, by request type",
                &["type"],
                FINE_GRAINED_LATENCY_SEC_BUCKETS.to_vec(),
                registry,
            )
            .unwrap(),
            rpc_errors: register_int_counter_vec_with_registry!(
                "watcher_rpc_errors",
                "Total number of failed full node queries, by request type",
                &["type"],
                registry,
            )
            .unwrap(),
            registry_cache_hits: register_int_gauge_with_registry!(
                "watcher_registry_cache_hits",
                "Registry cache hits since start",
                registry,
            )
            .unwrap(),
            registry_cache_misses: register_int_gauge_with_registry!(
                "watcher_registry_cache_misses",
                "Registry cache misses since start",
                registry,
            )
            .unwrap(),
        }
    }

    pub fn new_for_testing() -> Self {
        let registry = Registry::new();
        Self::new(&registry)
    }

    pub(crate) fn drop_message(&self, reason: &str) {
        self.dropped_messages.with_label_values(&[reason]).inc();
    }
}
