//! Component C6: Storage Engine (spec §4.6).
//!
//! RocksDB column families hold the canonical state plus the secondary
//! indices the query layer needs. Every mutating operation runs its reads,
//! validation and `WriteBatch` construction inside one `spawn_blocking`
//! closure (RocksDB's API is synchronous) and commits atomically, following
//! the teacher's `atomic_writer`/`db_handles` split between batching and
//! cached column-family access.

use super::schema::*;
use crate::error::StorageError;
use crate::model::{BlockMutation, BlockRecord, GlyphToken, Holder, SyncState, TokenMutation, TokenMutationEvent, Utxo};
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

fn codec_err<E: std::fmt::Display>(e: E) -> StorageError {
    StorageError::Codec(e.to_string())
}

#[derive(Debug, Serialize, Deserialize)]
struct UndoData {
    spent_utxos: Vec<Utxo>,
    created_keys: Vec<(String, u32)>,
    token_mutation_keys: Vec<Vec<u8>>,
    token_refs_touched: Vec<String>,
}

pub struct StorageEngine {
    db: Arc<DB>,
}

impl StorageEngine {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        let db = DB::open_cf(&opts, path, COLUMN_FAMILIES)?;
        Ok(Self { db: Arc::new(db) })
    }

    pub fn db(&self) -> &Arc<DB> {
        &self.db
    }

    pub async fn get_tip(&self) -> Result<Option<SyncState>, StorageError> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || read_tip(&db))
            .await
            .map_err(|e| StorageError::IntegrityViolation(e.to_string()))?
    }

    pub async fn get_block(&self, height: u64) -> Result<Option<BlockRecord>, StorageError> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || -> Result<Option<BlockRecord>, StorageError> {
            let cf = db
                .cf_handle(CF_BLOCKS)
                .ok_or_else(|| StorageError::IntegrityViolation("missing blocks cf".into()))?;
            match db.get_cf(&cf, block_key(height))? {
                Some(raw) => Ok(Some(bincode::deserialize(&raw).map_err(codec_err)?)),
                None => Ok(None),
            }
        })
        .await
        .map_err(|e| StorageError::IntegrityViolation(e.to_string()))?
    }

    pub async fn get_utxo(&self, txid: &str, vout: u32) -> Result<Option<Utxo>, StorageError> {
        let db = self.db.clone();
        let key = utxo_key(txid, vout);
        tokio::task::spawn_blocking(move || -> Result<Option<Utxo>, StorageError> {
            let cf = db
                .cf_handle(CF_UTXO)
                .ok_or_else(|| StorageError::IntegrityViolation("missing utxo cf".into()))?;
            match db.get_cf(&cf, &key)? {
                Some(raw) => Ok(Some(bincode::deserialize(&raw).map_err(codec_err)?)),
                None => Ok(None),
            }
        })
        .await
        .map_err(|e| StorageError::IntegrityViolation(e.to_string()))?
    }

    pub async fn get_block_txids(&self, height: u64) -> Result<Vec<String>, StorageError> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<String>, StorageError> {
            let cf = db
                .cf_handle(CF_BLOCK_TXIDS)
                .ok_or_else(|| StorageError::IntegrityViolation("missing block_txids cf".into()))?;
            match db.get_cf(&cf, block_key(height))? {
                Some(raw) => bincode::deserialize(&raw).map_err(codec_err),
                None => Ok(Vec::new()),
            }
        })
        .await
        .map_err(|e| StorageError::IntegrityViolation(e.to_string()))?
    }

    pub async fn get_transaction(&self, txid: &str) -> Result<Option<crate::model::TransactionRecord>, StorageError> {
        let db = self.db.clone();
        let txid = txid.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<crate::model::TransactionRecord>, StorageError> {
            let cf = db
                .cf_handle(CF_TRANSACTIONS)
                .ok_or_else(|| StorageError::IntegrityViolation("missing transactions cf".into()))?;
            match db.get_cf(&cf, txid.as_bytes())? {
                Some(raw) => Ok(Some(bincode::deserialize(&raw).map_err(codec_err)?)),
                None => Ok(None),
            }
        })
        .await
        .map_err(|e| StorageError::IntegrityViolation(e.to_string()))?
    }

    /// Outputs created by `txid`, looked up via the `{txid}:{vout}` prefix
    /// on the primary UTXO CF (they're never removed, only marked spent).
    pub async fn get_transaction_outputs(&self, txid: &str) -> Result<Vec<Utxo>, StorageError> {
        let db = self.db.clone();
        let txid = txid.to_string();
        tokio::task::spawn_blocking(move || -> Result<Vec<Utxo>, StorageError> {
            let cf = db
                .cf_handle(CF_UTXO)
                .ok_or_else(|| StorageError::IntegrityViolation("missing utxo cf".into()))?;
            let prefix = format!("{txid}:").into_bytes();
            let mut out = Vec::new();
            for item in db.iterator_cf(&cf, IteratorMode::From(&prefix, Direction::Forward)) {
                let (key, value) = item.map_err(StorageError::from)?;
                if !key.starts_with(&prefix) {
                    break;
                }
                out.push(bincode::deserialize(&value).map_err(codec_err)?);
            }
            out.sort_by_key(|u: &Utxo| u.vout);
            Ok(out)
        })
        .await
        .map_err(|e| StorageError::IntegrityViolation(e.to_string()))?
    }

    /// Inputs consumed by `txid`: a full scan of the UTXO CF matching
    /// `spent_by_txid`. There is no secondary index for this (spends are
    /// rare to query directly outside `get_transaction`), so this is O(n)
    /// in the total UTXO count.
    pub async fn get_transaction_inputs(&self, txid: &str) -> Result<Vec<Utxo>, StorageError> {
        let db = self.db.clone();
        let txid = txid.to_string();
        tokio::task::spawn_blocking(move || -> Result<Vec<Utxo>, StorageError> {
            let cf = db
                .cf_handle(CF_UTXO)
                .ok_or_else(|| StorageError::IntegrityViolation("missing utxo cf".into()))?;
            let mut out = Vec::new();
            for item in db.iterator_cf(&cf, IteratorMode::Start) {
                let (_, value) = item.map_err(StorageError::from)?;
                let utxo: Utxo = bincode::deserialize(&value).map_err(codec_err)?;
                if utxo.spent_by_txid.as_deref() == Some(txid.as_str()) {
                    out.push(utxo);
                }
            }
            Ok(out)
        })
        .await
        .map_err(|e| StorageError::IntegrityViolation(e.to_string()))?
    }

    pub async fn get_token(&self, ref_: &str) -> Result<Option<GlyphToken>, StorageError> {
        let db = self.db.clone();
        let ref_ = ref_.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<GlyphToken>, StorageError> {
            let cf = db
                .cf_handle(CF_TOKENS)
                .ok_or_else(|| StorageError::IntegrityViolation("missing tokens cf".into()))?;
            match db.get_cf(&cf, ref_.as_bytes())? {
                Some(raw) => Ok(Some(bincode::deserialize(&raw).map_err(codec_err)?)),
                None => Ok(None),
            }
        })
        .await
        .map_err(|e| StorageError::IntegrityViolation(e.to_string()))?
    }

    /// Applies one block's mutations atomically. Re-committing a block
    /// already at the tip with an identical hash is a no-op (idempotence,
    /// P2); a conflicting hash at an already-occupied height is rejected.
    pub async fn commit_block(&self, mutation: BlockMutation) -> Result<(), StorageError> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || commit_block_blocking(&db, &mutation))
            .await
            .map_err(|e| StorageError::IntegrityViolation(e.to_string()))?
    }

    /// Rolls storage back to `target_height` inclusive, undoing blocks from
    /// the tip downward using each block's undo log (spec §4.5 reorg path).
    pub async fn unwind_to(&self, target_height: u64) -> Result<(), StorageError> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || unwind_to_blocking(&db, target_height))
            .await
            .map_err(|e| StorageError::IntegrityViolation(e.to_string()))?
    }

    pub async fn get_holder(&self, address: &str) -> Result<Option<Holder>, StorageError> {
        let db = self.db.clone();
        let key = holder_key(address);
        tokio::task::spawn_blocking(move || -> Result<Option<Holder>, StorageError> {
            let cf = db
                .cf_handle(CF_HOLDERS)
                .ok_or_else(|| StorageError::IntegrityViolation("missing holders cf".into()))?;
            match db.get_cf(&cf, &key)? {
                Some(raw) => Ok(Some(bincode::deserialize(&raw).map_err(codec_err)?)),
                None => Ok(None),
            }
        })
        .await
        .map_err(|e| StorageError::IntegrityViolation(e.to_string()))?
    }

    pub async fn get_holder_balance(&self, asset: &str, address: &str) -> Result<crate::amount::Amount, StorageError> {
        let holder = self.get_holder(address).await?;
        Ok(match holder {
            Some(h) if asset == NATIVE_ASSET => h.rxd_balance,
            Some(h) => h.token_balances.get(asset).copied().unwrap_or(crate::amount::Amount::ZERO),
            None => crate::amount::Amount::ZERO,
        })
    }

    pub async fn list_utxos_by_address(
        &self,
        address: &str,
        unspent_only: bool,
    ) -> Result<Vec<Utxo>, StorageError> {
        let db = self.db.clone();
        let address = address.to_string();
        tokio::task::spawn_blocking(move || -> Result<Vec<Utxo>, StorageError> {
            let idx_cf = db
                .cf_handle(CF_UTXO_BY_ADDRESS)
                .ok_or_else(|| StorageError::IntegrityViolation("missing utxo_by_address cf".into()))?;
            let utxo_cf = db
                .cf_handle(CF_UTXO)
                .ok_or_else(|| StorageError::IntegrityViolation("missing utxo cf".into()))?;
            let prefix = utxo_by_address_prefix(&address);
            let mut out = Vec::new();
            for item in db.iterator_cf(&idx_cf, IteratorMode::From(&prefix, Direction::Forward)) {
                let (key, _) = item.map_err(StorageError::from)?;
                if !key.starts_with(&prefix) {
                    break;
                }
                let rest = std::str::from_utf8(&key[prefix.len()..]).map_err(codec_err)?;
                let Some((txid, vout_str)) = rest.rsplit_once(':') else { continue };
                let vout: u32 = vout_str.parse().map_err(codec_err)?;
                if let Some(raw) = db.get_cf(&utxo_cf, utxo_key(txid, vout))? {
                    let utxo: Utxo = bincode::deserialize(&raw).map_err(codec_err)?;
                    if !unspent_only || !utxo.spent {
                        out.push(utxo);
                    }
                }
            }
            out.sort_by(|a, b| (a.block_height, &a.txid, a.vout).cmp(&(b.block_height, &b.txid, b.vout)));
            Ok(out)
        })
        .await
        .map_err(|e| StorageError::IntegrityViolation(e.to_string()))?
    }
}

fn read_tip(db: &DB) -> Result<Option<SyncState>, StorageError> {
    let cf = db
        .cf_handle(CF_CHAIN_STATE)
        .ok_or_else(|| StorageError::IntegrityViolation("missing chain_state cf".into()))?;
    match db.get_cf(&cf, SYNC_STATE_KEY)? {
        Some(raw) => Ok(Some(bincode::deserialize(&raw).map_err(codec_err)?)),
        None => Ok(None),
    }
}

fn commit_block_blocking(db: &DB, mutation: &BlockMutation) -> Result<(), StorageError> {
    let height = mutation.block_record.height;
    let hash = &mutation.block_record.hash;

    let blocks_cf = db
        .cf_handle(CF_BLOCKS)
        .ok_or_else(|| StorageError::IntegrityViolation("missing blocks cf".into()))?;
    if let Some(existing) = db.get_cf(&blocks_cf, block_key(height))? {
        let existing: BlockRecord = bincode::deserialize(&existing).map_err(codec_err)?;
        if existing.hash == *hash {
            return Ok(());
        }
        return Err(StorageError::ConflictingBlock { height });
    }

    let utxo_cf = db
        .cf_handle(CF_UTXO)
        .ok_or_else(|| StorageError::IntegrityViolation("missing utxo cf".into()))?;
    for tx in &mutation.tx_mutations {
        for spend in &tx.spends {
            if db.get_cf(&utxo_cf, utxo_key(&spend.prev_txid, spend.prev_vout))?.is_none() {
                return Err(StorageError::MissingPrevout {
                    txid: spend.prev_txid.clone(),
                    vout: spend.prev_vout,
                });
            }
        }
    }

    let blocks_by_hash_cf = db.cf_handle(CF_BLOCKS_BY_HASH).ok_or_else(|| cf_missing(CF_BLOCKS_BY_HASH))?;
    let tx_cf = db.cf_handle(CF_TRANSACTIONS).ok_or_else(|| cf_missing(CF_TRANSACTIONS))?;
    let utxo_by_addr_cf = db.cf_handle(CF_UTXO_BY_ADDRESS).ok_or_else(|| cf_missing(CF_UTXO_BY_ADDRESS))?;
    let utxo_by_ref_cf = db.cf_handle(CF_UTXO_BY_TOKEN_REF).ok_or_else(|| cf_missing(CF_UTXO_BY_TOKEN_REF))?;
    let tokens_cf = db.cf_handle(CF_TOKENS).ok_or_else(|| cf_missing(CF_TOKENS))?;
    let token_mut_cf = db.cf_handle(CF_TOKEN_MUTATIONS).ok_or_else(|| cf_missing(CF_TOKEN_MUTATIONS))?;
    let chain_state_cf = db.cf_handle(CF_CHAIN_STATE).ok_or_else(|| cf_missing(CF_CHAIN_STATE))?;
    let undo_cf = db.cf_handle(CF_UNDO_LOG).ok_or_else(|| cf_missing(CF_UNDO_LOG))?;
    let block_txids_cf = db.cf_handle(CF_BLOCK_TXIDS).ok_or_else(|| cf_missing(CF_BLOCK_TXIDS))?;

    let mut batch = WriteBatch::default();
    let block_bytes = bincode::serialize(&mutation.block_record).map_err(codec_err)?;
    batch.put_cf(&blocks_cf, block_key(height), &block_bytes);
    batch.put_cf(&blocks_by_hash_cf, hash.as_bytes(), block_key(height));

    let mut spent_for_undo = Vec::new();
    let mut created_keys = Vec::new();
    let mut token_mutation_keys = Vec::new();
    let mut token_refs_touched = Vec::new();
    let mut txids = Vec::new();
    let mut seq: u32 = 0;

    for tx in &mutation.tx_mutations {
        txids.push(tx.tx_record.txid.clone());
        let tx_bytes = bincode::serialize(&tx.tx_record).map_err(codec_err)?;
        batch.put_cf(&tx_cf, tx.tx_record.txid.as_bytes(), &tx_bytes);

        let mut spent_token_refs: Vec<String> = Vec::new();
        for spend in &tx.spends {
            let key = utxo_key(&spend.prev_txid, spend.prev_vout);
            let raw = db.get_cf(&utxo_cf, &key)?.expect("validated above");
            let mut utxo: Utxo = bincode::deserialize(&raw).map_err(codec_err)?;
            spent_for_undo.push(utxo.clone());
            utxo.spent = true;
            utxo.spent_by_txid = Some(spend.spending_txid.clone());
            batch.put_cf(&utxo_cf, &key, bincode::serialize(&utxo).map_err(codec_err)?);
            if let Some(addr) = &utxo.address {
                batch.delete_cf(&utxo_by_addr_cf, utxo_by_address_key(addr, &utxo.txid, utxo.vout));
            }
            if let Some(r) = &utxo.token_ref {
                batch.delete_cf(&utxo_by_ref_cf, utxo_by_token_ref_key(r, &utxo.txid, utxo.vout));
                spent_token_refs.push(r.clone());
            }
        }

        for credit in &tx.credits {
            let key = utxo_key(&credit.txid, credit.vout);
            batch.put_cf(&utxo_cf, &key, bincode::serialize(credit).map_err(codec_err)?);
            created_keys.push((credit.txid.clone(), credit.vout));
            if let Some(addr) = &credit.address {
                batch.put_cf(&utxo_by_addr_cf, utxo_by_address_key(addr, &credit.txid, credit.vout), b"");
            }
            if let Some(r) = &credit.token_ref {
                batch.put_cf(&utxo_by_ref_cf, utxo_by_token_ref_key(r, &credit.txid, credit.vout), b"");
            }
        }

        // Burn inference: a spent UTXO that carried a token_ref with no
        // matching credit (and no explicit envelope event) in this same
        // transaction is a burn — the token's lineage ends here.
        for ref_ in &spent_token_refs {
            if tx.credits.iter().any(|c| c.token_ref.as_deref() == Some(ref_.as_str())) {
                continue;
            }
            if tx.token_events.iter().any(|e| &e.ref_ == ref_) {
                continue;
            }
            seq += 1;
            let token_mutation = TokenMutation {
                ref_: ref_.clone(),
                block_height: height,
                txid: tx.tx_record.txid.clone(),
                vout: 0,
                event: TokenMutationEvent::Burn,
            };
            let key = token_mutation_key(ref_, height, seq);
            batch.put_cf(&token_mut_cf, key.clone(), bincode::serialize(&token_mutation).map_err(codec_err)?);
            token_mutation_keys.push(key);
            if !token_refs_touched.contains(ref_) {
                token_refs_touched.push(ref_.clone());
            }
            batch.delete_cf(&tokens_cf, ref_.as_bytes());
        }

        for event in &tx.token_events {
            seq += 1;
            let bound_credit = tx.credits.iter().find(|c| c.token_ref.as_deref() == Some(event.ref_.as_str()));
            let (txid_for_key, vout_for_key) = match bound_credit {
                Some(c) => (c.txid.clone(), c.vout),
                None => (tx.tx_record.txid.clone(), 0),
            };

            let mutation_event = match &event.kind {
                crate::model::TokenEventKind::Mint => TokenMutationEvent::Mint,
                crate::model::TokenEventKind::Transfer { from, to } => TokenMutationEvent::Transfer {
                    from_txid: from.0.clone(),
                    from_vout: from.1,
                    to_txid: to.0.clone(),
                    to_vout: to.1,
                },
                crate::model::TokenEventKind::Burn => TokenMutationEvent::Burn,
            };

            let token_mutation = TokenMutation {
                ref_: event.ref_.clone(),
                block_height: height,
                txid: txid_for_key.clone(),
                vout: vout_for_key,
                event: mutation_event,
            };
            let key = token_mutation_key(&event.ref_, height, seq);
            batch.put_cf(&token_mut_cf, key.clone(), bincode::serialize(&token_mutation).map_err(codec_err)?);
            token_mutation_keys.push(key);
            if !token_refs_touched.contains(&event.ref_) {
                token_refs_touched.push(event.ref_.clone());
            }

            match &event.kind {
                crate::model::TokenEventKind::Mint => {
                    if let Some(descriptor) = &event.metadata {
                        let token = GlyphToken {
                            ref_: event.ref_.clone(),
                            token_type: format!("{:?}", descriptor.token_type),
                            protocols: descriptor.protocols.clone(),
                            name: descriptor.name.clone(),
                            ticker: descriptor.ticker.clone(),
                            decimals: descriptor.decimals,
                            supply: descriptor.supply,
                            genesis_txid: txid_for_key.clone(),
                            genesis_block_height: height,
                            current_txid: txid_for_key,
                            current_vout: vout_for_key,
                        };
                        batch.put_cf(&tokens_cf, event.ref_.as_bytes(), bincode::serialize(&token).map_err(codec_err)?);
                    }
                }
                crate::model::TokenEventKind::Transfer { to, .. } => {
                    if let Some(raw) = db.get_cf(&tokens_cf, event.ref_.as_bytes())? {
                        let mut token: GlyphToken = bincode::deserialize(&raw).map_err(codec_err)?;
                        token.current_txid = to.0.clone();
                        token.current_vout = to.1;
                        batch.put_cf(&tokens_cf, event.ref_.as_bytes(), bincode::serialize(&token).map_err(codec_err)?);
                    }
                }
                crate::model::TokenEventKind::Burn => {
                    batch.delete_cf(&tokens_cf, event.ref_.as_bytes());
                }
            }
        }
    }

    let sync_state = SyncState {
        current_height: height,
        current_hash: hash.clone(),
        current_chainwork: mutation.block_record.chainwork,
        is_syncing: true,
        last_error: None,
        last_updated_at: now_secs(),
    };
    batch.put_cf(&chain_state_cf, SYNC_STATE_KEY, bincode::serialize(&sync_state).map_err(codec_err)?);
    batch.put_cf(&block_txids_cf, block_key(height), bincode::serialize(&txids).map_err(codec_err)?);

    let undo = UndoData {
        spent_utxos: spent_for_undo,
        created_keys,
        token_mutation_keys,
        token_refs_touched,
    };
    batch.put_cf(&undo_cf, undo_key(height), bincode::serialize(&undo).map_err(codec_err)?);

    db.write(batch)?;
    Ok(())
}

fn cf_missing(name: &str) -> StorageError {
    StorageError::IntegrityViolation(format!("missing column family {name}"))
}

fn unwind_to_blocking(db: &DB, target_height: u64) -> Result<(), StorageError> {
    loop {
        let Some(tip) = read_tip(db)? else { return Ok(()) };
        if tip.current_height <= target_height {
            return Ok(());
        }
        let height = tip.current_height;

        let blocks_cf = db.cf_handle(CF_BLOCKS).ok_or_else(|| cf_missing(CF_BLOCKS))?;
        let blocks_by_hash_cf = db.cf_handle(CF_BLOCKS_BY_HASH).ok_or_else(|| cf_missing(CF_BLOCKS_BY_HASH))?;
        let tx_cf = db.cf_handle(CF_TRANSACTIONS).ok_or_else(|| cf_missing(CF_TRANSACTIONS))?;
        let utxo_cf = db.cf_handle(CF_UTXO).ok_or_else(|| cf_missing(CF_UTXO))?;
        let utxo_by_addr_cf = db.cf_handle(CF_UTXO_BY_ADDRESS).ok_or_else(|| cf_missing(CF_UTXO_BY_ADDRESS))?;
        let utxo_by_ref_cf = db.cf_handle(CF_UTXO_BY_TOKEN_REF).ok_or_else(|| cf_missing(CF_UTXO_BY_TOKEN_REF))?;
        let tokens_cf = db.cf_handle(CF_TOKENS).ok_or_else(|| cf_missing(CF_TOKENS))?;
        let token_mut_cf = db.cf_handle(CF_TOKEN_MUTATIONS).ok_or_else(|| cf_missing(CF_TOKEN_MUTATIONS))?;
        let chain_state_cf = db.cf_handle(CF_CHAIN_STATE).ok_or_else(|| cf_missing(CF_CHAIN_STATE))?;
        let undo_log_cf = db.cf_handle(CF_UNDO_LOG).ok_or_else(|| cf_missing(CF_UNDO_LOG))?;
        let block_txids_cf = db.cf_handle(CF_BLOCK_TXIDS).ok_or_else(|| cf_missing(CF_BLOCK_TXIDS))?;

        let block_raw = db
            .get_cf(&blocks_cf, block_key(height))?
            .ok_or_else(|| StorageError::IntegrityViolation(format!("missing block record at height {height}")))?;
        let block_record: BlockRecord = bincode::deserialize(&block_raw).map_err(codec_err)?;

        let txids: Vec<String> = match db.get_cf(&block_txids_cf, block_key(height))? {
            Some(raw) => bincode::deserialize(&raw).map_err(codec_err)?,
            None => Vec::new(),
        };

        let undo_raw = db
            .get_cf(&undo_log_cf, undo_key(height))?
            .ok_or_else(|| StorageError::IntegrityViolation(format!("missing undo log for height {height}")))?;
        let undo: UndoData = bincode::deserialize(&undo_raw).map_err(codec_err)?;

        let mut batch = WriteBatch::default();

        for (txid, vout) in &undo.created_keys {
            let key = utxo_key(txid, *vout);
            if let Some(raw) = db.get_cf(&utxo_cf, &key)? {
                let utxo: Utxo = bincode::deserialize(&raw).map_err(codec_err)?;
                if let Some(addr) = &utxo.address {
                    batch.delete_cf(&utxo_by_addr_cf, utxo_by_address_key(addr, txid, *vout));
                }
                if let Some(r) = &utxo.token_ref {
                    batch.delete_cf(&utxo_by_ref_cf, utxo_by_token_ref_key(r, txid, *vout));
                }
            }
            batch.delete_cf(&utxo_cf, &key);
        }

        for utxo in &undo.spent_utxos {
            let key = utxo_key(&utxo.txid, utxo.vout);
            batch.put_cf(&utxo_cf, &key, bincode::serialize(utxo).map_err(codec_err)?);
            if let Some(addr) = &utxo.address {
                batch.put_cf(&utxo_by_addr_cf, utxo_by_address_key(addr, &utxo.txid, utxo.vout), b"");
            }
            if let Some(r) = &utxo.token_ref {
                batch.put_cf(&utxo_by_ref_cf, utxo_by_token_ref_key(r, &utxo.txid, utxo.vout), b"");
            }
        }

        for key in &undo.token_mutation_keys {
            batch.delete_cf(&token_mut_cf, key);
        }

        for ref_ in &undo.token_refs_touched {
            let prefix = token_mutation_prefix(ref_);
            let mut latest: Option<TokenMutation> = None;
            for item in db.iterator_cf(&token_mut_cf, IteratorMode::From(&prefix, Direction::Forward)) {
                let (k, v) = item.map_err(StorageError::from)?;
                if !k.starts_with(&prefix) {
                    break;
                }
                if undo.token_mutation_keys.iter().any(|dk| dk.as_slice() == &k[..]) {
                    continue;
                }
                latest = Some(bincode::deserialize(&v).map_err(codec_err)?);
            }
            match latest {
                Some(tm) => match &tm.event {
                    TokenMutationEvent::Burn => {
                        batch.delete_cf(&tokens_cf, ref_.as_bytes());
                    }
                    _ => {
                        if let Some(raw) = db.get_cf(&tokens_cf, ref_.as_bytes())? {
                            let mut token: GlyphToken = bincode::deserialize(&raw).map_err(codec_err)?;
                            match &tm.event {
                                TokenMutationEvent::Mint => {
                                    token.current_txid = tm.txid.clone();
                                    token.current_vout = tm.vout;
                                }
                                TokenMutationEvent::Transfer { to_txid, to_vout, .. } => {
                                    token.current_txid = to_txid.clone();
                                    token.current_vout = *to_vout;
                                }
                                TokenMutationEvent::Burn => unreachable!(),
                            }
                            batch.put_cf(&tokens_cf, ref_.as_bytes(), bincode::serialize(&token).map_err(codec_err)?);
                        }
                    }
                },
                None => {
                    batch.delete_cf(&tokens_cf, ref_.as_bytes());
                }
            }
        }

        for txid in &txids {
            batch.delete_cf(&tx_cf, txid.as_bytes());
        }
        batch.delete_cf(&blocks_cf, block_key(height));
        batch.delete_cf(&blocks_by_hash_cf, block_record.hash.as_bytes());
        batch.delete_cf(&undo_log_cf, undo_key(height));
        batch.delete_cf(&block_txids_cf, block_key(height));

        let new_height = height
            .checked_sub(1)
            .ok_or_else(|| StorageError::IntegrityViolation("cannot unwind past genesis".into()))?;
        match db.get_cf(&blocks_cf, block_key(new_height))? {
            Some(raw) if height != 0 => {
                let prev: BlockRecord = bincode::deserialize(&raw).map_err(codec_err)?;
                let sync_state = SyncState {
                    current_height: prev.height,
                    current_hash: prev.hash,
                    current_chainwork: prev.chainwork,
                    is_syncing: true,
                    last_error: None,
                    last_updated_at: now_secs(),
                };
                batch.put_cf(&chain_state_cf, SYNC_STATE_KEY, bincode::serialize(&sync_state).map_err(codec_err)?);
            }
            _ => {
                batch.delete_cf(&chain_state_cf, SYNC_STATE_KEY);
            }
        }

        db.write(batch)?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::glyph::{TokenDescriptor, TokenType};
    use crate::model::{BlockRecord, Spend, TokenEvent, TokenEventKind, TransactionRecord, TxMutation};
    use tempfile::TempDir;

    fn engine() -> (StorageEngine, TempDir) {
        let dir = TempDir::new().unwrap();
        let engine = StorageEngine::open(dir.path().to_str().unwrap()).unwrap();
        (engine, dir)
    }

    fn coinbase_mutation(height: u64, hash: &str, prev: Option<&str>, txid: &str, address: &str) -> BlockMutation {
        let block_record = BlockRecord {
            hash: hash.to_string(),
            height,
            prev_hash: prev.map(|s| s.to_string()),
            merkle_root: "m".repeat(64),
            timestamp: 1_700_000_000 + height,
            version: 1,
            bits: "1d00ffff".to_string(),
            nonce: 0,
            chainwork: [0u8; 32],
            tx_count: 1,
        };
        let tx_record = TransactionRecord {
            txid: txid.to_string(),
            block_hash: hash.to_string(),
            block_height: height,
            index_in_block: 0,
            timestamp: block_record.timestamp,
            size: 100,
            locktime: 0,
            input_count: 0,
            output_count: 1,
        };
        let credit = crate::model::Utxo {
            txid: txid.to_string(),
            vout: 0,
            address: Some(address.to_string()),
            amount: "50.00000000".parse().unwrap(),
            token_ref: None,
            spent: false,
            spent_by_txid: None,
            block_height: height,
            block_hash: hash.to_string(),
        };
        BlockMutation {
            block_record,
            tx_mutations: vec![TxMutation { tx_record, spends: vec![], credits: vec![credit], token_events: vec![] }],
        }
    }

    #[tokio::test]
    async fn commit_then_idempotent_recommit() {
        let (engine, _dir) = engine();
        let mutation = coinbase_mutation(0, &"a".repeat(64), None, &"t0".repeat(16), "addr1");
        engine.commit_block(mutation.clone()).await.unwrap();
        engine.commit_block(mutation).await.unwrap(); // idempotent, P2

        let tip = engine.get_tip().await.unwrap().unwrap();
        assert_eq!(tip.current_height, 0);
        let utxos = engine.list_utxos_by_address("addr1", true).await.unwrap();
        assert_eq!(utxos.len(), 1);
    }

    #[tokio::test]
    async fn conflicting_block_at_occupied_height_rejected() {
        let (engine, _dir) = engine();
        let m0 = coinbase_mutation(0, &"a".repeat(64), None, &"t0".repeat(16), "addr1");
        engine.commit_block(m0).await.unwrap();
        let m0_conflict = coinbase_mutation(0, &"b".repeat(64), None, &"t1".repeat(16), "addr1");
        let err = engine.commit_block(m0_conflict).await.unwrap_err();
        assert!(matches!(err, StorageError::ConflictingBlock { height: 0 }));
    }

    #[tokio::test]
    async fn spend_of_unknown_prevout_rejected() {
        let (engine, _dir) = engine();
        let mut m0 = coinbase_mutation(0, &"a".repeat(64), None, &"t0".repeat(16), "addr1");
        m0.tx_mutations[0].spends.push(Spend {
            prev_txid: "f".repeat(64),
            prev_vout: 0,
            spending_txid: "t0".repeat(16),
        });
        let err = engine.commit_block(m0).await.unwrap_err();
        assert!(matches!(err, StorageError::MissingPrevout { .. }));
    }

    #[tokio::test]
    async fn unwind_restores_prior_utxo_set() {
        let (engine, _dir) = engine();
        let m0 = coinbase_mutation(0, &"a".repeat(64), None, &"t0".repeat(16), "addr1");
        engine.commit_block(m0).await.unwrap();
        let m1 = coinbase_mutation(1, &"b".repeat(64), Some(&"a".repeat(64)), &"t1".repeat(16), "addr2");
        engine.commit_block(m1).await.unwrap();

        assert_eq!(engine.get_tip().await.unwrap().unwrap().current_height, 1);

        engine.unwind_to(0).await.unwrap();

        let tip = engine.get_tip().await.unwrap().unwrap();
        assert_eq!(tip.current_height, 0); // P4-adjacent: tip only moves forward after a fresh commit
        assert!(engine.get_block(1).await.unwrap().is_none());
        assert!(engine.list_utxos_by_address("addr2", true).await.unwrap().is_empty());
        assert_eq!(engine.list_utxos_by_address("addr1", true).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn spend_without_continuation_infers_burn() {
        let (engine, _dir) = engine();

        let hash0 = "a".repeat(64);
        let mint_txid = "b".repeat(64);
        let descriptor = TokenDescriptor {
            token_type: TokenType::Fungible,
            ref_: Some("ref1".to_string()),
            name: Some("Test".to_string()),
            ticker: Some("TST".to_string()),
            decimals: Some(8),
            supply: Some(1_000),
            protocols: vec![1],
            token_id: None,
            contract_ref: None,
            algorithm: None,
            difficulty: None,
            reward: None,
            icon_ref: None,
            extra: Default::default(),
        };
        let mint_credit = Utxo {
            txid: mint_txid.clone(),
            vout: 0,
            address: Some("addr1".to_string()),
            amount: "1.00000000".parse().unwrap(),
            token_ref: Some("ref1".to_string()),
            spent: false,
            spent_by_txid: None,
            block_height: 0,
            block_hash: hash0.clone(),
        };
        let m0 = BlockMutation {
            block_record: BlockRecord {
                hash: hash0.clone(),
                height: 0,
                prev_hash: None,
                merkle_root: "m".repeat(64),
                timestamp: 1_700_000_000,
                version: 1,
                bits: "1d00ffff".to_string(),
                nonce: 0,
                chainwork: [0u8; 32],
                tx_count: 1,
            },
            tx_mutations: vec![TxMutation {
                tx_record: TransactionRecord {
                    txid: mint_txid.clone(),
                    block_hash: hash0.clone(),
                    block_height: 0,
                    index_in_block: 0,
                    timestamp: 1_700_000_000,
                    size: 100,
                    locktime: 0,
                    input_count: 0,
                    output_count: 1,
                },
                spends: vec![],
                credits: vec![mint_credit],
                token_events: vec![TokenEvent {
                    ref_: "ref1".to_string(),
                    kind: TokenEventKind::Mint,
                    metadata: Some(descriptor),
                }],
            }],
        };
        engine.commit_block(m0).await.unwrap();
        assert!(engine.get_token("ref1").await.unwrap().is_some());

        let hash1 = "c".repeat(64);
        let spend_txid = "d".repeat(64);
        let m1 = BlockMutation {
            block_record: BlockRecord {
                hash: hash1.clone(),
                height: 1,
                prev_hash: Some(hash0.clone()),
                merkle_root: "m".repeat(64),
                timestamp: 1_700_000_001,
                version: 1,
                bits: "1d00ffff".to_string(),
                nonce: 0,
                chainwork: [0u8; 32],
                tx_count: 1,
            },
            tx_mutations: vec![TxMutation {
                tx_record: TransactionRecord {
                    txid: spend_txid.clone(),
                    block_hash: hash1.clone(),
                    block_height: 1,
                    index_in_block: 0,
                    timestamp: 1_700_000_001,
                    size: 100,
                    locktime: 0,
                    input_count: 1,
                    output_count: 1,
                },
                spends: vec![Spend { prev_txid: mint_txid.clone(), prev_vout: 0, spending_txid: spend_txid.clone() }],
                credits: vec![Utxo {
                    txid: spend_txid.clone(),
                    vout: 0,
                    address: Some("addr1".to_string()),
                    amount: "1.00000000".parse().unwrap(),
                    token_ref: None,
                    spent: false,
                    spent_by_txid: None,
                    block_height: 1,
                    block_hash: hash1.clone(),
                }],
                token_events: vec![],
            }],
        };
        engine.commit_block(m1).await.unwrap();

        assert!(engine.get_token("ref1").await.unwrap().is_none());
    }
}
