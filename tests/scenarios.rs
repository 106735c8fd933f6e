//! End-to-end scenarios from spec.md §8 (S1-S6) plus the testable
//! properties P1/P2/P4, driven directly against `StorageEngine` +
//! `projection` + `QueryService` with hand-built `BlockMutation`s.
//!
//! Block parsing itself (two-phase ref-push/envelope scan, P5's v1/v2A/v2B
//! disambiguation) is covered by `src/script/envelope.rs` and
//! `src/glyph/decode.rs` unit tests; these scenarios exercise the
//! commit/unwind/projection pipeline that sits downstream of the parser.

use rxindexer::amount::Amount;
use rxindexer::model::{BlockMutation, BlockRecord, Spend, TransactionRecord, TxMutation, Utxo};
use rxindexer::projection::{count_holders, reconcile_holders};
use rxindexer::query::QueryService;
use rxindexer::storage::StorageEngine;
use std::sync::Arc;
use tempfile::TempDir;

fn block_hash(height: u64, salt: &str) -> String {
    format!("{salt}{height:0>63}")
}

fn block_record(height: u64, hash: &str, prev_hash: Option<&str>) -> BlockRecord {
    BlockRecord {
        hash: hash.to_string(),
        height,
        prev_hash: prev_hash.map(|s| s.to_string()),
        merkle_root: "m".repeat(64),
        timestamp: 1_700_000_000 + height,
        version: 1,
        bits: "1d00ffff".to_string(),
        nonce: 0,
        chainwork: [0u8; 32],
        tx_count: 1,
    }
}

fn utxo(txid: &str, vout: u32, address: &str, amount: &str, height: u64, block_hash: &str) -> Utxo {
    Utxo {
        txid: txid.to_string(),
        vout,
        address: Some(address.to_string()),
        amount: amount.parse().unwrap(),
        token_ref: None,
        spent: false,
        spent_by_txid: None,
        block_height: height,
        block_hash: block_hash.to_string(),
    }
}

fn coinbase_mutation(height: u64, hash: &str, prev_hash: Option<&str>, txid: &str, credits: Vec<Utxo>) -> BlockMutation {
    let block_record = block_record(height, hash, prev_hash);
    let tx_record = TransactionRecord {
        txid: txid.to_string(),
        block_hash: hash.to_string(),
        block_height: height,
        index_in_block: 0,
        timestamp: block_record.timestamp,
        size: 120,
        locktime: 0,
        input_count: 0,
        output_count: credits.len() as u32,
    };
    BlockMutation {
        block_record,
        tx_mutations: vec![TxMutation { tx_record, spends: vec![], credits, token_events: vec![] }],
    }
}

fn spend_mutation(
    height: u64,
    hash: &str,
    prev_hash: Option<&str>,
    txid: &str,
    spends: Vec<(String, u32)>,
    credits: Vec<Utxo>,
) -> BlockMutation {
    let block_record = block_record(height, hash, prev_hash);
    let tx_record = TransactionRecord {
        txid: txid.to_string(),
        block_hash: hash.to_string(),
        block_height: height,
        index_in_block: 0,
        timestamp: block_record.timestamp,
        size: 250,
        locktime: 0,
        input_count: spends.len() as u32,
        output_count: credits.len() as u32,
    };
    let spends = spends
        .into_iter()
        .map(|(prev_txid, prev_vout)| Spend { prev_txid, prev_vout, spending_txid: txid.to_string() })
        .collect();
    BlockMutation {
        block_record,
        tx_mutations: vec![TxMutation { tx_record, spends, credits, token_events: vec![] }],
    }
}

async fn open_storage(dir: &TempDir) -> Arc<StorageEngine> {
    Arc::new(StorageEngine::open(dir.path().to_str().unwrap()).unwrap())
}

/// S1: coinbase mint to A, two empty blocks on top.
#[tokio::test]
async fn s1_coinbase_mint_then_empty_blocks() {
    let dir = TempDir::new().unwrap();
    let storage = open_storage(&dir).await;

    let coinbase_txid = "a".repeat(64);
    let h0 = block_hash(0, "0");
    let h1 = block_hash(1, "1");
    let h2 = block_hash(2, "2");

    storage
        .commit_block(coinbase_mutation(0, &h0, None, &coinbase_txid, vec![utxo(&coinbase_txid, 0, "A", "50.00000000", 0, &h0)]))
        .await
        .unwrap();
    storage.commit_block(coinbase_mutation(1, &h1, Some(&h0), &"b".repeat(64), vec![])).await.unwrap();
    storage.commit_block(coinbase_mutation(2, &h2, Some(&h1), &"c".repeat(64), vec![])).await.unwrap();

    reconcile_holders(storage.db().clone()).await.unwrap();

    let query = QueryService::new(storage.clone());
    let balance = query.get_balance("A").await.unwrap();
    assert_eq!(balance.rxd_balance.to_string(), "50.00000000");

    let holders = count_holders(storage.db().clone(), "RXD", "1.0".parse().unwrap()).await.unwrap();
    assert_eq!(holders, 1);

    let tip = storage.get_tip().await.unwrap().unwrap();
    assert_eq!(tip.current_height, 2);
    assert_eq!(tip.current_hash, h2);

    let page = query.list_utxos("A", true, 0, 10).await.unwrap();
    assert_eq!(page.total, 1);
}

/// S2: extend S1 with a spend splitting the coinbase output between A and B,
/// leaving a fee behind.
#[tokio::test]
async fn s2_spend_splits_balance_with_fee() {
    let dir = TempDir::new().unwrap();
    let storage = open_storage(&dir).await;

    let coinbase_txid = "a".repeat(64);
    let h0 = block_hash(0, "0");
    let h1 = block_hash(1, "1");
    let h2 = block_hash(2, "2");
    let h3 = block_hash(3, "3");
    let spend_txid = "d".repeat(64);

    storage
        .commit_block(coinbase_mutation(0, &h0, None, &coinbase_txid, vec![utxo(&coinbase_txid, 0, "A", "50.00000000", 0, &h0)]))
        .await
        .unwrap();
    storage.commit_block(coinbase_mutation(1, &h1, Some(&h0), &"b".repeat(64), vec![])).await.unwrap();
    storage.commit_block(coinbase_mutation(2, &h2, Some(&h1), &"c".repeat(64), vec![])).await.unwrap();
    storage
        .commit_block(spend_mutation(
            3,
            &h3,
            Some(&h2),
            &spend_txid,
            vec![(coinbase_txid.clone(), 0)],
            vec![
                utxo(&spend_txid, 0, "A", "25.00000000", 3, &h3),
                utxo(&spend_txid, 1, "B", "24.99990000", 3, &h3),
            ],
        ))
        .await
        .unwrap();

    reconcile_holders(storage.db().clone()).await.unwrap();
    let query = QueryService::new(storage.clone());

    assert_eq!(query.get_balance("A").await.unwrap().rxd_balance.to_string(), "25.00000000");
    assert_eq!(query.get_balance("B").await.unwrap().rxd_balance.to_string(), "24.99990000");
    assert_eq!(query.list_utxos("A", true, 0, 10).await.unwrap().total, 1);
    assert_eq!(query.list_utxos("B", true, 0, 10).await.unwrap().total, 1);

    let holders = count_holders(storage.db().clone(), "RXD", Amount::from_units(100_000_000)).await.unwrap();
    assert_eq!(holders, 2);

    // The spent coinbase output is no longer unspent.
    assert!(storage.get_utxo(&coinbase_txid, 0).await.unwrap().unwrap().spent);
}

/// S3: reorg at height 3 replaces the spend with a different transaction
/// sending everything to C; storage must show no trace of the old tx.
#[tokio::test]
async fn s3_reorg_replaces_spend_and_clears_old_trace() {
    let dir = TempDir::new().unwrap();
    let storage = open_storage(&dir).await;

    let coinbase_txid = "a".repeat(64);
    let h0 = block_hash(0, "0");
    let h1 = block_hash(1, "1");
    let h2 = block_hash(2, "2");
    let h3 = block_hash(3, "3");
    let spend_txid = "d".repeat(64);

    storage
        .commit_block(coinbase_mutation(0, &h0, None, &coinbase_txid, vec![utxo(&coinbase_txid, 0, "A", "50.00000000", 0, &h0)]))
        .await
        .unwrap();
    storage.commit_block(coinbase_mutation(1, &h1, Some(&h0), &"b".repeat(64), vec![])).await.unwrap();
    storage.commit_block(coinbase_mutation(2, &h2, Some(&h1), &"c".repeat(64), vec![])).await.unwrap();
    storage
        .commit_block(spend_mutation(
            3,
            &h3,
            Some(&h2),
            &spend_txid,
            vec![(coinbase_txid.clone(), 0)],
            vec![
                utxo(&spend_txid, 0, "A", "25.00000000", 3, &h3),
                utxo(&spend_txid, 1, "B", "24.99990000", 3, &h3),
            ],
        ))
        .await
        .unwrap();

    // Reorg: unwind back to height 2, then commit an alternative block 3'.
    storage.unwind_to(2).await.unwrap();
    assert!(storage.get_transaction(&spend_txid).await.unwrap().is_none());
    assert!(!storage.get_utxo(&coinbase_txid, 0).await.unwrap().unwrap().spent);

    let h3b = block_hash(3, "e");
    let spend_txid_b = "f".repeat(64);
    storage
        .commit_block(spend_mutation(
            3,
            &h3b,
            Some(&h2),
            &spend_txid_b,
            vec![(coinbase_txid.clone(), 0)],
            vec![utxo(&spend_txid_b, 0, "C", "49.99990000", 3, &h3b)],
        ))
        .await
        .unwrap();

    reconcile_holders(storage.db().clone()).await.unwrap();
    let query = QueryService::new(storage.clone());

    assert_eq!(query.get_balance("A").await.unwrap().rxd_balance, Amount::ZERO);
    assert_eq!(query.get_balance("B").await.unwrap().rxd_balance, Amount::ZERO);
    assert_eq!(query.get_balance("C").await.unwrap().rxd_balance.to_string(), "49.99990000");

    let holders = count_holders(storage.db().clone(), "RXD", "1.0".parse().unwrap()).await.unwrap();
    assert_eq!(holders, 1);

    assert!(storage.get_transaction(&spend_txid).await.unwrap().is_none());
    let tip = storage.get_tip().await.unwrap().unwrap();
    assert_eq!(tip.current_hash, h3b);
}

/// S6: holder counts under an increasing balance threshold.
#[tokio::test]
async fn s6_holder_count_under_threshold() {
    let dir = TempDir::new().unwrap();
    let storage = open_storage(&dir).await;

    let h0 = block_hash(0, "0");
    storage
        .commit_block(coinbase_mutation(
            0,
            &h0,
            None,
            &"a".repeat(64),
            vec![
                utxo(&"a".repeat(64), 0, "A", "0.50000000", 0, &h0),
                utxo(&"a".repeat(64), 1, "B", "1.00000000", 0, &h0),
                utxo(&"a".repeat(64), 2, "C", "100.00000000", 0, &h0),
            ],
        ))
        .await
        .unwrap();

    reconcile_holders(storage.db().clone()).await.unwrap();

    assert_eq!(count_holders(storage.db().clone(), "RXD", Amount::ZERO).await.unwrap(), 3);
    assert_eq!(count_holders(storage.db().clone(), "RXD", "1.0".parse().unwrap()).await.unwrap(), 2);
    assert_eq!(count_holders(storage.db().clone(), "RXD", "100.0".parse().unwrap()).await.unwrap(), 1);
}

/// P2: committing the same mutation twice is a no-op the second time.
#[tokio::test]
async fn p2_commit_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let storage = open_storage(&dir).await;

    let h0 = block_hash(0, "0");
    let mutation = coinbase_mutation(0, &h0, None, &"a".repeat(64), vec![utxo(&"a".repeat(64), 0, "A", "10.00000000", 0, &h0)]);

    storage.commit_block(mutation.clone()).await.unwrap();
    storage.commit_block(mutation).await.unwrap();

    let tip = storage.get_tip().await.unwrap().unwrap();
    assert_eq!(tip.current_height, 0);

    reconcile_holders(storage.db().clone()).await.unwrap();
    let query = QueryService::new(storage.clone());
    assert_eq!(query.get_balance("A").await.unwrap().rxd_balance.to_string(), "10.00000000");
}

/// P4: every successful commit advances the tip by exactly one and matches
/// the committed block's hash.
#[tokio::test]
async fn p4_tip_advances_monotonically() {
    let dir = TempDir::new().unwrap();
    let storage = open_storage(&dir).await;

    let mut prev: Option<String> = None;
    for height in 0..5u64 {
        let hash = block_hash(height, "x");
        storage
            .commit_block(coinbase_mutation(height, &hash, prev.as_deref(), &format!("{height:0>64}"), vec![]))
            .await
            .unwrap();

        let tip = storage.get_tip().await.unwrap().unwrap();
        assert_eq!(tip.current_height, height);
        assert_eq!(tip.current_hash, hash);
        prev = Some(hash);
    }
}
