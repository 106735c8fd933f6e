//! Typed JSON-RPC client to the Radiant node (component C1).
//!
//! Transport is a blocking `reqwest` client invoked from async code via
//! `tokio::task::spawn_blocking`, the same pattern the teacher's
//! `monitor.rs` already uses to call its PIVX node directly rather than
//! trust a generic RPC crate's deserialization of mixed-shape `getblock`
//! payloads.

use super::circuit::CircuitBreaker;
use super::rate_limit::RateLimiter;
use crate::error::NodeError;
use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct RpcTxIn {
    pub txid: Option<String>,
    pub vout: Option<u32>,
    #[serde(rename = "scriptSig")]
    pub script_sig: Option<RpcScriptSig>,
    pub coinbase: Option<String>,
    pub sequence: u32,
    /// Populated by verbose=2 `getblock`; the resolved prevout being
    /// consumed, so the parser doesn't need a `get_raw_tx` round-trip per
    /// input in the common case.
    pub prevout: Option<RpcPrevout>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcScriptSig {
    pub hex: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcScriptPubKey {
    pub hex: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcPrevout {
    pub value: String,
    #[serde(rename = "scriptPubKey")]
    pub script_pub_key: RpcScriptPubKey,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcTxOut {
    pub value: String,
    pub n: u32,
    #[serde(rename = "scriptPubKey")]
    pub script_pub_key: RpcScriptPubKey,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcTransaction {
    pub txid: String,
    pub hex: String,
    pub size: u64,
    pub locktime: u32,
    pub vin: Vec<RpcTxIn>,
    pub vout: Vec<RpcTxOut>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcBlock {
    pub hash: String,
    pub height: u64,
    pub previousblockhash: Option<String>,
    pub merkleroot: String,
    pub time: u64,
    pub version: u32,
    pub bits: String,
    pub nonce: u32,
    pub tx: Vec<RpcTransaction>,
}

#[async_trait]
pub trait NodeApi: Send + Sync {
    async fn get_tip_height(&self) -> Result<u64, NodeError>;
    async fn get_block_hash(&self, height: u64) -> Result<String, NodeError>;
    async fn get_block(&self, hash: &str) -> Result<RpcBlock, NodeError>;
    async fn get_raw_tx(&self, txid: &str) -> Result<RpcTransaction, NodeError>;
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'a str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// Retryable JSON-RPC error codes (rate limiting, temporary unavailability).
const RETRYABLE_CODES: [i64; 2] = [-28, -429];

pub struct RpcClientConfig {
    pub url: String,
    pub user: String,
    pub password: String,
    pub timeout: Duration,
    pub rate_limit_rps: u32,
    pub circuit_failure_threshold: u32,
    pub circuit_reset_timeout: Duration,
    pub max_retries: u32,
}

pub struct RpcClient {
    config: RpcClientConfig,
    http: reqwest::blocking::Client,
    circuit: CircuitBreaker,
    rate_limiter: RateLimiter,
    request_id: AtomicU64,
}

impl RpcClient {
    pub fn new(config: RpcClientConfig) -> Self {
        let http = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .build()
            .expect("failed to build rpc http client");
        let circuit = CircuitBreaker::new(config.circuit_failure_threshold, config.circuit_reset_timeout);
        let rate_limiter = RateLimiter::new(config.rate_limit_rps);
        Self {
            config,
            http,
            circuit,
            rate_limiter,
            request_id: AtomicU64::new(0),
        }
    }

    async fn call<T: for<'de> Deserialize<'de> + Send + 'static>(
        &self,
        method: &'static str,
        params: Value,
    ) -> Result<T, NodeError> {
        if !self.circuit.allow_request() {
            return Err(NodeError::NodeUnavailable);
        }
        self.rate_limiter.acquire().await;

        let mut attempt = 0u32;
        loop {
            let id = self.request_id.fetch_add(1, Ordering::Relaxed);
            let body = RpcRequest { jsonrpc: "1.0", id, method, params: params.clone() };
            let url = self.config.url.clone();
            let user = self.config.user.clone();
            let password = self.config.password.clone();
            let http = self.http.clone();

            let outcome = tokio::task::spawn_blocking(move || {
                http.post(&url)
                    .basic_auth(user, Some(password))
                    .json(&body)
                    .send()
                    .and_then(|resp| resp.json::<RpcResponse<T>>())
            })
            .await
            .map_err(|e| NodeError::Transport(e.to_string()))?;

            match outcome {
                Ok(RpcResponse { result: Some(r), .. }) => {
                    self.circuit.record_success();
                    return Ok(r);
                }
                Ok(RpcResponse { error: Some(e), .. }) => {
                    if RETRYABLE_CODES.contains(&e.code) && attempt < self.config.max_retries {
                        attempt += 1;
                        backoff_sleep(attempt).await;
                        continue;
                    }
                    self.circuit.record_failure();
                    return Err(NodeError::Rpc { code: e.code, message: e.message });
                }
                Ok(_) => {
                    self.circuit.record_failure();
                    return Err(NodeError::MalformedResponse(
                        "response had neither result nor error".into(),
                    ));
                }
                Err(e) => {
                    if attempt < self.config.max_retries {
                        attempt += 1;
                        backoff_sleep(attempt).await;
                        continue;
                    }
                    self.circuit.record_failure();
                    return Err(NodeError::Transport(e.to_string()));
                }
            }
        }
    }
}

async fn backoff_sleep(attempt: u32) {
    let base_ms = 100u64.saturating_mul(1u64 << attempt.min(6));
    let jitter_ms = rand::thread_rng().gen_range(0..base_ms.max(1));
    tokio::time::sleep(Duration::from_millis(base_ms + jitter_ms)).await;
}

#[async_trait]
impl NodeApi for RpcClient {
    async fn get_tip_height(&self) -> Result<u64, NodeError> {
        self.call("getblockcount", json!([])).await
    }

    async fn get_block_hash(&self, height: u64) -> Result<String, NodeError> {
        self.call("getblockhash", json!([height])).await
    }

    async fn get_block(&self, hash: &str) -> Result<RpcBlock, NodeError> {
        self.call("getblock", json!([hash, 2])).await
    }

    async fn get_raw_tx(&self, txid: &str) -> Result<RpcTransaction, NodeError> {
        self.call("getrawtransaction", json!([txid, true])).await
    }
}
