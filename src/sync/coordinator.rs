//! Component C5: Sync Coordinator (spec §4.5).
//!
//! Fetches blocks from the node a bounded window ahead of the commit
//! cursor, reassembles them in height order via `ReorderBuffer`, detects
//! reorgs by comparing `previousblockhash` against the local tip, and
//! unwinds bounded by `reorg_limit` before resuming forward sync.

use super::reassembly::ReorderBuffer;
use crate::chainwork::{add_chainwork, calculate_work_from_bits};
use crate::error::SyncError;
use crate::node_client::{NodeApi, RpcBlock};
use crate::parser::parse_block;
use crate::storage::StorageEngine;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Planning,
    Fetching,
    Committing,
    Unwinding,
    Error(String),
}

pub struct SyncCoordinator<N: NodeApi> {
    node: Arc<N>,
    storage: Arc<StorageEngine>,
    reorg_limit: u32,
    checkpoint_interval: u64,
    max_inflight: usize,
    cancelled: Arc<AtomicBool>,
    phase: Mutex<SyncPhase>,
}

impl<N: NodeApi + 'static> SyncCoordinator<N> {
    pub fn new(node: Arc<N>, storage: Arc<StorageEngine>, reorg_limit: u32, checkpoint_interval: u64) -> Self {
        Self {
            node,
            storage,
            reorg_limit,
            checkpoint_interval,
            max_inflight: 8,
            cancelled: Arc::new(AtomicBool::new(false)),
            phase: Mutex::new(SyncPhase::Idle),
        }
    }

    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    pub async fn phase(&self) -> SyncPhase {
        self.phase.lock().await.clone()
    }

    async fn set_phase(&self, phase: SyncPhase) {
        *self.phase.lock().await = phase;
    }

    /// Syncs from the current local tip up to the node's tip height,
    /// handling any reorgs encountered along the way. Returns the number of
    /// blocks committed.
    pub async fn run_once(&self) -> Result<u64, SyncError> {
        self.set_phase(SyncPhase::Planning).await;

        let tip = self.storage.get_tip().await?;
        let mut next_height = tip.as_ref().map(|t| t.current_height + 1).unwrap_or(0);
        let mut local_chainwork = tip.as_ref().map(|t| t.current_chainwork).unwrap_or([0u8; 32]);
        let mut local_hash = tip.map(|t| t.current_hash);

        let node_tip = self.node.get_tip_height().await?;
        let mut committed = 0u64;
        let mut buffer: ReorderBuffer<RpcBlock> = ReorderBuffer::new(self.max_inflight);

        while next_height <= node_tip {
            if self.cancelled.load(Ordering::SeqCst) {
                return Err(SyncError::Cancelled);
            }

            self.set_phase(SyncPhase::Fetching).await;
            let window_end = (next_height + self.max_inflight as u64 - 1).min(node_tip);
            let mut fetches = Vec::new();
            for h in next_height..=window_end {
                if buffer.is_full() {
                    break;
                }
                let node = self.node.clone();
                fetches.push(async move {
                    let hash = node.get_block_hash(h).await?;
                    let block = node.get_block(&hash).await?;
                    Ok::<_, SyncError>((h, block))
                });
            }
            for result in futures::future::join_all(fetches).await {
                let (h, block) = result?;
                buffer.insert(h, block);
            }

            let ready = buffer.drain_from(next_height);
            if ready.is_empty() {
                continue;
            }

            for (height, block) in ready {
                if self.cancelled.load(Ordering::SeqCst) {
                    return Err(SyncError::Cancelled);
                }

                if let Some(expected_prev) = &local_hash {
                    if block.previousblockhash.as_deref() != Some(expected_prev.as_str()) {
                        self.set_phase(SyncPhase::Unwinding).await;
                        let fork_height = self.find_fork_point(height.saturating_sub(1)).await?;
                        self.storage.unwind_to(fork_height).await?;

                        let tip = self.storage.get_tip().await?;
                        next_height = tip.as_ref().map(|t| t.current_height + 1).unwrap_or(0);
                        local_chainwork = tip.as_ref().map(|t| t.current_chainwork).unwrap_or([0u8; 32]);
                        local_hash = tip.map(|t| t.current_hash);
                        buffer = ReorderBuffer::new(self.max_inflight);
                        break;
                    }
                }

                let bits = u32::from_str_radix(&block.bits, 16)
                    .map_err(|e| SyncError::Storage(crate::error::StorageError::Codec(e.to_string())))?;
                let block_work = calculate_work_from_bits(bits);
                let chainwork = add_chainwork(&local_chainwork, &block_work);

                let mutation = parse_block(&block, chainwork);
                self.set_phase(SyncPhase::Committing).await;
                self.storage.commit_block(mutation).await?;

                local_chainwork = chainwork;
                local_hash = Some(block.hash.clone());
                committed += 1;
                next_height = height + 1;

                if self.checkpoint_interval > 0 && committed % self.checkpoint_interval == 0 {
                    crate::projection::refresh_balance_projection(&self.storage, true).await?;
                }
            }
        }

        self.set_phase(SyncPhase::Idle).await;
        Ok(committed)
    }

    /// Walks backward from `from_height` comparing local block hashes
    /// against the node's, bounded by `reorg_limit` below the local tip.
    async fn find_fork_point(&self, mut height: u64) -> Result<u64, SyncError> {
        let local_tip_height = self.storage.get_tip().await?.map(|t| t.current_height).unwrap_or(0);
        let floor = local_tip_height.saturating_sub(self.reorg_limit as u64);

        loop {
            if height < floor {
                self.set_phase(SyncPhase::Error("reorg exceeded reorg_limit".into())).await;
                return Err(SyncError::DeepReorg { limit: self.reorg_limit });
            }
            let Some(local_block) = self.storage.get_block(height).await? else {
                if height == 0 {
                    return Ok(0);
                }
                height -= 1;
                continue;
            };
            let remote_hash = self.node.get_block_hash(height).await?;
            if remote_hash == local_block.hash {
                return Ok(height);
            }
            if height == 0 {
                return Err(SyncError::DeepReorg { limit: self.reorg_limit });
            }
            height -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node_client::client::fake::FakeNodeApi;
    use crate::node_client::client::{RpcScriptPubKey, RpcTransaction, RpcTxOut};
    use tempfile::TempDir;

    fn block(height: u64, hash: &str, prev: Option<&str>) -> RpcBlock {
        RpcBlock {
            hash: hash.to_string(),
            height,
            previousblockhash: prev.map(|s| s.to_string()),
            merkleroot: "m".repeat(64),
            time: 1_700_000_000 + height,
            version: 1,
            bits: "1d00ffff".to_string(),
            nonce: 0,
            tx: vec![RpcTransaction {
                txid: format!("{:0>64}", height),
                hex: "00".repeat(10),
                size: 10,
                locktime: 0,
                vin: vec![],
                vout: vec![RpcTxOut {
                    value: "1.00000000".to_string(),
                    n: 0,
                    script_pub_key: RpcScriptPubKey { hex: "6a0100".to_string() },
                }],
            }],
        }
    }

    async fn node_with_chain(hashes: &[&str]) -> Arc<FakeNodeApi> {
        let node = Arc::new(FakeNodeApi::default());
        let mut prev: Option<&str> = None;
        for (h, hash) in hashes.iter().enumerate() {
            let b = block(h as u64, hash, prev);
            node.blocks_by_height.lock().await.insert(h as u64, b.clone());
            node.blocks_by_hash.lock().await.insert(hash.to_string(), b);
            prev = Some(hash);
        }
        *node.tip.lock().await = hashes.len() as u64 - 1;
        node
    }

    #[tokio::test]
    async fn syncs_linear_chain() {
        let node = node_with_chain(&["a".repeat(64).as_str(), "b".repeat(64).as_str(), "c".repeat(64).as_str()]).await;
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(StorageEngine::open(dir.path().to_str().unwrap()).unwrap());
        let coordinator = SyncCoordinator::new(node, storage.clone(), 10, 0);

        let committed = coordinator.run_once().await.unwrap();
        assert_eq!(committed, 3);
        assert_eq!(storage.get_tip().await.unwrap().unwrap().current_height, 2);
    }
}
