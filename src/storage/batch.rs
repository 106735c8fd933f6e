//! Atomic multi-CF write batch, adapted from the teacher's `atomic_writer`.
//!
//! Every storage mutation (commit, unwind, projection refresh) is staged
//! here and flushed as a single `rocksdb::WriteBatch` so a crash mid-write
//! never leaves the indices out of sync with each other.

use crate::error::StorageError;
use rocksdb::{WriteBatch, DB};
use std::sync::Arc;

#[derive(Clone)]
enum Op {
    Put { cf: String, key: Vec<u8>, value: Vec<u8> },
    Delete { cf: String, key: Vec<u8> },
}

pub struct AtomicBatchWriter {
    db: Arc<DB>,
    ops: Vec<Op>,
}

impl AtomicBatchWriter {
    pub fn new(db: Arc<DB>) -> Self {
        Self { db, ops: Vec::new() }
    }

    pub fn put(&mut self, cf: &str, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push(Op::Put { cf: cf.to_string(), key, value });
    }

    pub fn delete(&mut self, cf: &str, key: Vec<u8>) {
        self.ops.push(Op::Delete { cf: cf.to_string(), key });
    }

    pub fn pending_count(&self) -> usize {
        self.ops.len()
    }

    /// Commits every staged operation across every column family in one
    /// atomic `WriteBatch`. Blocking RocksDB I/O runs via `spawn_blocking`.
    pub async fn flush(self) -> Result<(), StorageError> {
        if self.ops.is_empty() {
            return Ok(());
        }
        let db = self.db;
        let ops = self.ops;

        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            let mut batch = WriteBatch::default();
            for op in &ops {
                match op {
                    Op::Put { cf, key, value } => {
                        let handle = db.cf_handle(cf).ok_or_else(|| {
                            StorageError::IntegrityViolation(format!("missing column family {cf}"))
                        })?;
                        batch.put_cf(&handle, key, value);
                    }
                    Op::Delete { cf, key } => {
                        let handle = db.cf_handle(cf).ok_or_else(|| {
                            StorageError::IntegrityViolation(format!("missing column family {cf}"))
                        })?;
                        batch.delete_cf(&handle, key);
                    }
                }
            }
            db.write(batch)?;
            Ok(())
        })
        .await
        .map_err(|e| StorageError::IntegrityViolation(e.to_string()))??;

        Ok(())
    }
}
