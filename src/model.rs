//! Core domain records shared across the parser, storage engine, projection
//! and query layers (spec §3).

use crate::amount::Amount;
use crate::glyph::TokenDescriptor;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockRecord {
    pub hash: String,
    pub height: u64,
    pub prev_hash: Option<String>,
    pub merkle_root: String,
    pub timestamp: u64,
    pub version: u32,
    pub bits: String,
    pub nonce: u32,
    #[serde(with = "hex_32")]
    pub chainwork: [u8; 32],
    pub tx_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub txid: String,
    pub block_hash: String,
    pub block_height: u64,
    pub index_in_block: u32,
    pub timestamp: u64,
    pub size: u64,
    pub locktime: u32,
    pub input_count: u32,
    pub output_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Utxo {
    pub txid: String,
    pub vout: u32,
    pub address: Option<String>,
    pub amount: Amount,
    pub token_ref: Option<String>,
    pub spent: bool,
    pub spent_by_txid: Option<String>,
    pub block_height: u64,
    pub block_hash: String,
}

impl Utxo {
    pub fn key(&self) -> (String, u32) {
        (self.txid.clone(), self.vout)
    }
}

#[derive(Debug, Clone)]
pub struct Spend {
    pub prev_txid: String,
    pub prev_vout: u32,
    pub spending_txid: String,
}

#[derive(Debug, Clone)]
pub enum TokenEventKind {
    Mint,
    Transfer { from: (String, u32), to: (String, u32) },
    Burn,
}

#[derive(Debug, Clone)]
pub struct TokenEvent {
    pub ref_: String,
    pub kind: TokenEventKind,
    pub metadata: Option<TokenDescriptor>,
}

#[derive(Debug, Clone)]
pub struct TxMutation {
    pub tx_record: TransactionRecord,
    pub spends: Vec<Spend>,
    pub credits: Vec<Utxo>,
    pub token_events: Vec<TokenEvent>,
}

#[derive(Debug, Clone)]
pub struct BlockMutation {
    pub block_record: BlockRecord,
    pub tx_mutations: Vec<TxMutation>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TokenMutationEvent {
    Mint,
    Transfer { from_txid: String, from_vout: u32, to_txid: String, to_vout: u32 },
    Burn,
}

/// A single entry in a token's mutation log (spec §3 SUPPLEMENT), used to
/// make reorg-unwind of `current_txid`/`current_vout` deterministic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenMutation {
    pub ref_: String,
    pub block_height: u64,
    pub txid: String,
    pub vout: u32,
    pub event: TokenMutationEvent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlyphToken {
    pub ref_: String,
    pub token_type: String,
    pub protocols: Vec<u64>,
    pub name: Option<String>,
    pub ticker: Option<String>,
    pub decimals: Option<u32>,
    pub supply: Option<u64>,
    pub genesis_txid: String,
    pub genesis_block_height: u64,
    pub current_txid: String,
    pub current_vout: u32,
}

/// Aggregate per-address balance row, retained across reconciliations even
/// once a balance drops to zero (spec §3: history, not just current state).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Holder {
    pub address: String,
    pub rxd_balance: Amount,
    pub token_balances: BTreeMap<String, Amount>,
    pub first_seen_at: u64,
    pub last_seen_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncState {
    pub current_height: u64,
    pub current_hash: String,
    #[serde(with = "hex_32")]
    pub current_chainwork: [u8; 32],
    pub is_syncing: bool,
    pub last_error: Option<String>,
    pub last_updated_at: u64,
}

mod hex_32 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(d)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        let mut out = [0u8; 32];
        if bytes.len() != 32 {
            return Err(serde::de::Error::custom("expected 32 bytes"));
        }
        out.copy_from_slice(&bytes);
        Ok(out)
    }
}
