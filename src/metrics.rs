//! Prometheus instrumentation for the sync/storage/query pipeline.
//!
//! Kept in the teacher's `lazy_static! { Registry + *Vec }` style, retargeted
//! at this spec's stages (fetch/parse/commit/refresh) instead of PIVX's
//! leveldb-import/parallel/enrich stages.

use lazy_static::lazy_static;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::time::Instant;

const LATENCY_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0];

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    /// Highest height committed to storage.
    pub static ref INDEXED_HEIGHT: IntGauge = IntGauge::new(
        "rxindexer_indexed_height",
        "Highest block height committed to storage"
    ).unwrap();

    /// Node-reported chain tip height, as last observed by the sync coordinator.
    pub static ref NODE_TIP_HEIGHT: IntGauge = IntGauge::new(
        "rxindexer_node_tip_height",
        "Chain tip height last reported by the node"
    ).unwrap();

    pub static ref BLOCKS_COMMITTED: IntCounter = IntCounter::new(
        "rxindexer_blocks_committed_total",
        "Total blocks committed to storage"
    ).unwrap();

    pub static ref TRANSACTIONS_COMMITTED: IntCounter = IntCounter::new(
        "rxindexer_transactions_committed_total",
        "Total transactions committed to storage"
    ).unwrap();

    pub static ref UTXOS_CREATED: IntCounter = IntCounter::new(
        "rxindexer_utxos_created_total",
        "Total UTXOs created"
    ).unwrap();

    pub static ref UTXOS_SPENT: IntCounter = IntCounter::new(
        "rxindexer_utxos_spent_total",
        "Total UTXOs spent"
    ).unwrap();

    pub static ref TOKEN_EVENTS: IntCounterVec = IntCounterVec::new(
        Opts::new("rxindexer_token_events_total", "Total Glyph token events by kind"),
        &["kind"]
    ).unwrap();

    pub static ref REORG_EVENTS: IntCounter = IntCounter::new(
        "rxindexer_reorg_events_total",
        "Total reorgs handled"
    ).unwrap();

    pub static ref REORG_DEPTH: IntGauge = IntGauge::new(
        "rxindexer_reorg_depth_blocks",
        "Depth of the most recently handled reorg, in blocks"
    ).unwrap();

    pub static ref CIRCUIT_STATE: IntGauge = IntGauge::new(
        "rxindexer_circuit_breaker_state",
        "Node RPC circuit breaker state (0=closed, 1=open, 2=half-open)"
    ).unwrap();

    pub static ref RPC_ERRORS: IntCounterVec = IntCounterVec::new(
        Opts::new("rxindexer_rpc_errors_total", "Total node RPC errors by method"),
        &["method"]
    ).unwrap();

    pub static ref RPC_CALL_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new("rxindexer_rpc_call_duration_seconds", "Node RPC call latency")
            .buckets(LATENCY_BUCKETS.to_vec())
    ).unwrap();

    pub static ref BLOCK_PARSE_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new("rxindexer_block_parse_duration_seconds", "Block parsing latency")
            .buckets(LATENCY_BUCKETS.to_vec())
    ).unwrap();

    pub static ref BLOCK_COMMIT_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new("rxindexer_block_commit_duration_seconds", "Storage commit latency per block")
            .buckets(LATENCY_BUCKETS.to_vec())
    ).unwrap();

    pub static ref PROJECTION_REFRESH_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new("rxindexer_projection_refresh_duration_seconds", "Holder projection refresh latency")
            .buckets(LATENCY_BUCKETS.to_vec())
    ).unwrap();

    pub static ref HTTP_REQUESTS: IntCounterVec = IntCounterVec::new(
        Opts::new("rxindexer_http_requests_total", "Total HTTP requests by route and status class"),
        &["route", "status_class"]
    ).unwrap();
}

pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    REGISTRY.register(Box::new(INDEXED_HEIGHT.clone()))?;
    REGISTRY.register(Box::new(NODE_TIP_HEIGHT.clone()))?;
    REGISTRY.register(Box::new(BLOCKS_COMMITTED.clone()))?;
    REGISTRY.register(Box::new(TRANSACTIONS_COMMITTED.clone()))?;
    REGISTRY.register(Box::new(UTXOS_CREATED.clone()))?;
    REGISTRY.register(Box::new(UTXOS_SPENT.clone()))?;
    REGISTRY.register(Box::new(TOKEN_EVENTS.clone()))?;
    REGISTRY.register(Box::new(REORG_EVENTS.clone()))?;
    REGISTRY.register(Box::new(REORG_DEPTH.clone()))?;
    REGISTRY.register(Box::new(CIRCUIT_STATE.clone()))?;
    REGISTRY.register(Box::new(RPC_ERRORS.clone()))?;
    REGISTRY.register(Box::new(RPC_CALL_DURATION.clone()))?;
    REGISTRY.register(Box::new(BLOCK_PARSE_DURATION.clone()))?;
    REGISTRY.register(Box::new(BLOCK_COMMIT_DURATION.clone()))?;
    REGISTRY.register(Box::new(PROJECTION_REFRESH_DURATION.clone()))?;
    REGISTRY.register(Box::new(HTTP_REQUESTS.clone()))?;
    Ok(())
}

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

pub fn record_blocks_committed(count: u64) {
    BLOCKS_COMMITTED.inc_by(count);
}

pub fn record_transactions_committed(count: u64) {
    TRANSACTIONS_COMMITTED.inc_by(count);
}

pub fn record_token_event(kind: &str) {
    TOKEN_EVENTS.with_label_values(&[kind]).inc();
}

pub fn record_reorg(depth: i64) {
    REORG_EVENTS.inc();
    REORG_DEPTH.set(depth);
}

pub fn set_circuit_state(state: i64) {
    CIRCUIT_STATE.set(state);
}

pub fn record_rpc_error(method: &str) {
    RPC_ERRORS.with_label_values(&[method]).inc();
}

pub fn record_http_request(route: &str, status_class: &str) {
    HTTP_REQUESTS.with_label_values(&[route, status_class]).inc();
}
