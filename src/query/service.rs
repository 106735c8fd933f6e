//! Component C8: Query Service (spec §4.8). Read-only views over storage,
//! with no mutation path back into the indexer.

use crate::amount::Amount;
use crate::error::StorageError;
use crate::model::{GlyphToken, TransactionRecord, Utxo};
use crate::storage::schema::NATIVE_ASSET;
use crate::storage::StorageEngine;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct UtxoPage {
    pub items: Vec<Utxo>,
    pub page: u32,
    pub page_size: u32,
    pub total: usize,
}

/// Full per-address balance view (spec §4.8): native RXD, every Glyph
/// token held, and the count of unspent UTXOs backing them.
#[derive(Debug, Clone)]
pub struct BalanceDetail {
    pub rxd_balance: Amount,
    pub token_balances: BTreeMap<String, Amount>,
    pub utxo_count: u64,
}

#[derive(Debug, Clone)]
pub struct TransactionView {
    pub record: TransactionRecord,
    pub inputs: Vec<Utxo>,
    pub outputs: Vec<Utxo>,
}

pub struct QueryService {
    storage: Arc<StorageEngine>,
}

impl QueryService {
    pub fn new(storage: Arc<StorageEngine>) -> Self {
        Self { storage }
    }

    pub async fn get_balance(&self, address: &str) -> Result<BalanceDetail, StorageError> {
        let holder = self.storage.get_holder(address).await?;
        let (rxd_balance, token_balances) = match holder {
            Some(h) => (h.rxd_balance, h.token_balances),
            None => (Amount::ZERO, BTreeMap::new()),
        };
        let utxo_count = self.storage.list_utxos_by_address(address, true).await?.len() as u64;
        Ok(BalanceDetail { rxd_balance, token_balances, utxo_count })
    }

    pub async fn get_token_balance(&self, ref_: &str, address: &str) -> Result<Amount, StorageError> {
        self.storage.get_holder_balance(ref_, address).await
    }

    pub async fn list_utxos(
        &self,
        address: &str,
        unspent_only: bool,
        page: u32,
        page_size: u32,
    ) -> Result<UtxoPage, StorageError> {
        let all = self.storage.list_utxos_by_address(address, unspent_only).await?;
        let total = all.len();
        let page_size = page_size.max(1) as usize;
        let start = (page as usize) * page_size;
        let items = all.into_iter().skip(start).take(page_size).collect();
        Ok(UtxoPage { items, page, page_size: page_size as u32, total })
    }

    pub async fn get_transaction(&self, txid: &str) -> Result<Option<TransactionView>, StorageError> {
        let Some(record) = self.storage.get_transaction(txid).await? else { return Ok(None) };
        let outputs = self.storage.get_transaction_outputs(txid).await?;
        let inputs = self.storage.get_transaction_inputs(txid).await?;
        Ok(Some(TransactionView { record, inputs, outputs }))
    }

    pub async fn get_token(&self, ref_: &str) -> Result<Option<GlyphToken>, StorageError> {
        self.storage.get_token(ref_).await
    }

    pub async fn count_holders(&self, asset: &str, min_balance: Amount) -> Result<u64, StorageError> {
        crate::projection::count_holders(self.storage.db().clone(), asset, min_balance).await
    }

    pub async fn get_block_txs(&self, height: u64) -> Result<Vec<TransactionRecord>, StorageError> {
        let txids = self.storage.get_block_txids(height).await?;
        let mut out = Vec::with_capacity(txids.len());
        for txid in txids {
            if let Some(record) = self.storage.get_transaction(&txid).await? {
                out.push(record);
            }
        }
        out.sort_by_key(|r| r.index_in_block);
        Ok(out)
    }
}
