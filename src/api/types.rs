//! Response and error types for the HTTP adapter.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
}

impl ApiError {
    pub fn new(message: impl Into<String>) -> Self {
        ApiError { error: ErrorDetail { message: message.into() } }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub address: String,
    pub rxd_balance: String,
    pub glyph_tokens: BTreeMap<String, String>,
    pub utxo_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UtxoEntry {
    pub txid: String,
    pub vout: u32,
    pub address: Option<String>,
    pub amount: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_ref: Option<String>,
    pub spent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spent_by_txid: Option<String>,
    pub block_height: u64,
    pub block_hash: String,
}

impl From<crate::model::Utxo> for UtxoEntry {
    fn from(u: crate::model::Utxo) -> Self {
        UtxoEntry {
            txid: u.txid,
            vout: u.vout,
            address: u.address,
            amount: u.amount.to_string(),
            token_ref: u.token_ref,
            spent: u.spent,
            spent_by_txid: u.spent_by_txid,
            block_height: u.block_height,
            block_hash: u.block_hash,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UtxoListResponse {
    pub items: Vec<UtxoEntry>,
    pub page: u32,
    pub page_size: u32,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionResponse {
    pub txid: String,
    pub block_hash: String,
    pub block_height: u64,
    pub index_in_block: u32,
    pub timestamp: u64,
    pub size: u64,
    pub locktime: u32,
    pub inputs: Vec<UtxoEntry>,
    pub outputs: Vec<UtxoEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    #[serde(rename = "ref")]
    pub ref_: String,
    pub token_type: String,
    pub protocols: Vec<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticker: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decimals: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supply: Option<u64>,
    pub genesis_txid: String,
    pub genesis_block_height: u64,
    pub current_txid: String,
    pub current_vout: u32,
}

impl From<crate::model::GlyphToken> for TokenResponse {
    fn from(t: crate::model::GlyphToken) -> Self {
        TokenResponse {
            ref_: t.ref_,
            token_type: t.token_type,
            protocols: t.protocols,
            name: t.name,
            ticker: t.ticker,
            decimals: t.decimals,
            supply: t.supply,
            genesis_txid: t.genesis_txid,
            genesis_block_height: t.genesis_block_height,
            current_txid: t.current_txid,
            current_vout: t.current_vout,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoldersCountResponse {
    pub asset: String,
    pub min_balance: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub indexed_height: Option<u64>,
    pub indexed_hash: Option<String>,
    pub is_syncing: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UtxoQuery {
    #[serde(default)]
    pub unspent_only: Option<bool>,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub page_size: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HoldersQuery {
    #[serde(default)]
    pub min_balance: Option<String>,
}
