//! Component C4: pure `RpcBlock -> BlockMutation` transform (spec §4.4).
//!
//! Burn detection is intentionally not attempted here: recognising that a
//! spent prevout carried a token ref requires the token's previously
//! indexed state, which this parser never touches (it is pure, RPC-payload
//! in, `BlockMutation` out). The storage engine infers burns when it
//! applies a spend against a UTXO that carries a `token_ref` with no
//! corresponding credit or explicit token event in the same transaction.

use crate::address::scriptpubkey_to_address;
use crate::amount::Amount;
use crate::glyph;
use crate::model::{BlockMutation, BlockRecord, Spend, TokenEvent, TokenEventKind, TransactionRecord, TxMutation, Utxo};
use crate::node_client::client::RpcBlock;
use crate::script::envelope::EnvelopeKind;
use crate::script::{detect_in_output_script, detect_in_script_sig, parse_script, Op};
use std::collections::HashMap;
use std::str::FromStr;

fn decode_ref(payload: &[u8; 36]) -> (String, u32) {
    let txid = hex::encode(&payload[0..32]);
    let vout = u32::from_le_bytes([payload[32], payload[33], payload[34], payload[35]]);
    (txid, vout)
}

fn canonical_ref(txid: &str, vout: u32) -> String {
    format!("{}_{}", txid.to_lowercase(), vout)
}

fn split_ref(ref_: &str) -> (String, u32) {
    match ref_.rsplit_once('_') {
        Some((txid, vout)) => (txid.to_string(), vout.parse().unwrap_or(0)),
        None => (ref_.to_string(), 0),
    }
}

pub fn parse_block(block: &RpcBlock, chainwork: [u8; 32]) -> BlockMutation {
    let block_record = BlockRecord {
        hash: block.hash.clone(),
        height: block.height,
        prev_hash: block.previousblockhash.clone(),
        merkle_root: block.merkleroot.clone(),
        timestamp: block.time,
        version: block.version,
        bits: block.bits.clone(),
        nonce: block.nonce,
        chainwork,
        tx_count: block.tx.len() as u32,
    };

    let mut tx_mutations = Vec::with_capacity(block.tx.len());

    for (idx, tx) in block.tx.iter().enumerate() {
        let is_coinbase = tx.vin.iter().any(|vin| vin.coinbase.is_some());
        let size = (tx.hex.len() / 2) as u64;

        let tx_record = TransactionRecord {
            txid: tx.txid.clone(),
            block_hash: block.hash.clone(),
            block_height: block.height,
            index_in_block: idx as u32,
            timestamp: block.time,
            size,
            locktime: tx.locktime,
            input_count: tx.vin.len() as u32,
            output_count: tx.vout.len() as u32,
        };

        let spends: Vec<Spend> = if is_coinbase {
            Vec::new()
        } else {
            tx.vin
                .iter()
                .filter_map(|vin| match (&vin.txid, vin.vout) {
                    (Some(prev_txid), Some(prev_vout)) => Some(Spend {
                        prev_txid: prev_txid.clone(),
                        prev_vout,
                        spending_txid: tx.txid.clone(),
                    }),
                    _ => None,
                })
                .collect()
        };

        // Phase 1: scan outputs for Radiant ref-push opcodes.
        let mut output_refs: HashMap<u32, String> = HashMap::new();
        let mut credits = Vec::with_capacity(tx.vout.len());
        for out in &tx.vout {
            let script_bytes = hex::decode(&out.script_pub_key.hex).unwrap_or_default();
            let address = scriptpubkey_to_address(&script_bytes);
            let amount = Amount::from_str(&out.value).unwrap_or(Amount::ZERO);

            for op in parse_script(&script_bytes) {
                if let Op::RefPush { data, .. } = op {
                    let (rtxid, rvout) = decode_ref(&data);
                    output_refs.insert(out.n, canonical_ref(&rtxid, rvout));
                    break;
                }
            }

            credits.push(Utxo {
                txid: tx.txid.clone(),
                vout: out.n,
                address,
                amount,
                token_ref: None,
                spent: false,
                spent_by_txid: None,
                block_height: block.height,
                block_hash: block.hash.clone(),
            });
        }

        // Phase 2: reveals from scriptSigs (v1, v2 Style B); Phase 2b falls
        // back to output OP_RETURN reveals (v2 Style A) only if none found.
        let mut envelopes = Vec::new();
        if !is_coinbase {
            for vin in &tx.vin {
                if let Some(sig) = &vin.script_sig {
                    if let Ok(bytes) = hex::decode(&sig.hex) {
                        if let Some(env) = detect_in_script_sig(&bytes) {
                            envelopes.push(env);
                        }
                    }
                }
            }
        }
        if envelopes.is_empty() {
            for out in &tx.vout {
                if let Ok(bytes) = hex::decode(&out.script_pub_key.hex) {
                    if let Some(env) = detect_in_output_script(&bytes) {
                        envelopes.push(env);
                    }
                }
            }
        }

        let mut token_events = Vec::new();
        for env in &envelopes {
            if env.kind != EnvelopeKind::Reveal {
                continue; // commit-only envelopes carry no metadata yet
            }
            let descriptor = match glyph::decode(&env.raw_metadata) {
                Ok(d) => d,
                Err(_) => continue, // malformed metadata: dropped, tx still indexed
            };

            let candidate_ref = descriptor
                .ref_
                .clone()
                .or_else(|| output_refs.values().next().cloned());
            let Some(ref_) = candidate_ref else { continue };

            let bound_vout = output_refs
                .iter()
                .find(|(_, r)| **r == ref_)
                .map(|(v, _)| *v)
                .or_else(|| {
                    if output_refs.len() == 1 {
                        output_refs.keys().next().copied()
                    } else {
                        None
                    }
                });
            let Some(vout) = bound_vout else { continue };

            if let Some(credit) = credits.iter_mut().find(|c| c.vout == vout) {
                credit.token_ref = Some(ref_.clone());
            }

            let (ref_txid, ref_vout) = split_ref(&ref_);
            let kind = if ref_txid.eq_ignore_ascii_case(&tx.txid) {
                TokenEventKind::Mint
            } else {
                let from = spends
                    .iter()
                    .find(|s| s.prev_txid.eq_ignore_ascii_case(&ref_txid))
                    .map(|s| (s.prev_txid.clone(), s.prev_vout))
                    .unwrap_or((ref_txid, ref_vout));
                TokenEventKind::Transfer { from, to: (tx.txid.clone(), vout) }
            };

            token_events.push(TokenEvent { ref_, kind, metadata: Some(descriptor) });
        }

        tx_mutations.push(TxMutation { tx_record, spends, credits, token_events });
    }

    BlockMutation { block_record, tx_mutations }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node_client::client::{RpcScriptPubKey, RpcTransaction, RpcTxOut};

    fn coinbase_block(address_script: Vec<u8>) -> RpcBlock {
        let tx = RpcTransaction {
            txid: "a".repeat(64),
            hex: "00".repeat(10),
            size: 10,
            locktime: 0,
            vin: vec![crate::node_client::client::RpcTxIn {
                txid: None,
                vout: None,
                script_sig: None,
                coinbase: Some("00".into()),
                sequence: 0xffffffff,
                prevout: None,
            }],
            vout: vec![RpcTxOut {
                value: "50.00000000".to_string(),
                n: 0,
                script_pub_key: RpcScriptPubKey { hex: hex::encode(address_script) },
            }],
        };

        RpcBlock {
            hash: "b".repeat(64),
            height: 0,
            previousblockhash: None,
            merkleroot: "c".repeat(64),
            time: 1_700_000_000,
            version: 1,
            bits: "1d00ffff".to_string(),
            nonce: 0,
            tx: vec![tx],
        }
    }

    #[test]
    fn coinbase_produces_one_credit_no_spends() {
        let mut script = vec![0x76, 0xa9, 0x14];
        script.extend_from_slice(&[0xaa; 20]);
        script.extend_from_slice(&[0x88, 0xac]);

        let block = coinbase_block(script);
        let mutation = parse_block(&block, [0u8; 32]);

        assert_eq!(mutation.block_record.height, 0);
        assert_eq!(mutation.tx_mutations.len(), 1);
        let tx = &mutation.tx_mutations[0];
        assert!(tx.spends.is_empty());
        assert_eq!(tx.credits.len(), 1);
        assert_eq!(tx.credits[0].amount.to_string(), "50.00000000");
        assert!(tx.credits[0].address.is_some());
    }
}
