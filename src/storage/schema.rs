//! Column family layout and key encoding for the storage engine (spec §4.6).

pub const CF_BLOCKS: &str = "blocks";
pub const CF_BLOCKS_BY_HASH: &str = "blocks_by_hash";
pub const CF_TRANSACTIONS: &str = "transactions";
pub const CF_UTXO: &str = "utxo";
pub const CF_UTXO_BY_ADDRESS: &str = "utxo_by_address";
pub const CF_UTXO_BY_TOKEN_REF: &str = "utxo_by_token_ref";
pub const CF_TOKENS: &str = "tokens";
pub const CF_TOKEN_MUTATIONS: &str = "token_mutations";
pub const CF_HOLDERS: &str = "holders";
pub const CF_CHAIN_STATE: &str = "chain_state";
pub const CF_UNDO_LOG: &str = "undo_log";
pub const CF_BLOCK_TXIDS: &str = "block_txids";

pub const NATIVE_ASSET: &str = "RXD";

pub const COLUMN_FAMILIES: &[&str] = &[
    CF_BLOCKS,
    CF_BLOCKS_BY_HASH,
    CF_TRANSACTIONS,
    CF_UTXO,
    CF_UTXO_BY_ADDRESS,
    CF_UTXO_BY_TOKEN_REF,
    CF_TOKENS,
    CF_TOKEN_MUTATIONS,
    CF_HOLDERS,
    CF_CHAIN_STATE,
    CF_UNDO_LOG,
    CF_BLOCK_TXIDS,
];

pub fn block_key(height: u64) -> Vec<u8> {
    height.to_be_bytes().to_vec()
}

pub fn utxo_key(txid: &str, vout: u32) -> Vec<u8> {
    format!("{txid}:{vout}").into_bytes()
}

pub fn utxo_by_address_key(address: &str, txid: &str, vout: u32) -> Vec<u8> {
    format!("{address}:{txid}:{vout}").into_bytes()
}

pub fn utxo_by_address_prefix(address: &str) -> Vec<u8> {
    format!("{address}:").into_bytes()
}

pub fn utxo_by_token_ref_key(ref_: &str, txid: &str, vout: u32) -> Vec<u8> {
    format!("{ref_}:{txid}:{vout}").into_bytes()
}

pub fn utxo_by_token_ref_prefix(ref_: &str) -> Vec<u8> {
    format!("{ref_}:").into_bytes()
}

/// One row per address, holding every asset's balance (spec §3 Holder
/// entity) — not partitioned by asset, so the row survives a balance
/// dropping to zero instead of being deleted on reconciliation.
pub fn holder_key(address: &str) -> Vec<u8> {
    address.as_bytes().to_vec()
}

pub fn token_mutation_key(ref_: &str, height: u64, seq: u32) -> Vec<u8> {
    let mut key = format!("{ref_}:").into_bytes();
    key.extend_from_slice(&height.to_be_bytes());
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

pub fn token_mutation_prefix(ref_: &str) -> Vec<u8> {
    format!("{ref_}:").into_bytes()
}

pub fn undo_key(height: u64) -> Vec<u8> {
    height.to_be_bytes().to_vec()
}

pub const SYNC_STATE_KEY: &[u8] = b"sync_state";
