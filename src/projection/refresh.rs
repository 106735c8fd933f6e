//! Single-writer refresh gate (spec §4.7): a concurrent refresh request
//! while one is already running returns immediately rather than queuing.
//! A refresh otherwise runs when either `min_interval` has elapsed since
//! the last completed refresh, or the caller explicitly forces it (the
//! sync coordinator's checkpoint trigger).

use super::holders::reconcile_holders;
use crate::error::StorageError;
use crate::storage::StorageEngine;
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

pub struct ProjectionRefresher {
    refreshing: AtomicBool,
    last_refresh_at: AtomicU64,
    min_interval_secs: u64,
}

impl ProjectionRefresher {
    pub fn new(min_interval_secs: u64) -> Self {
        Self { refreshing: AtomicBool::new(false), last_refresh_at: AtomicU64::new(0), min_interval_secs }
    }

    /// Returns `Ok(true)` if a refresh actually ran, `Ok(false)` if it was
    /// skipped (already in progress, or too soon after the last one and
    /// not `force`d). `force` bypasses the `min_interval` gate but never
    /// the in-progress gate — an explicit request still loses to a refresh
    /// already running.
    pub async fn refresh(&self, storage: &StorageEngine, force: bool) -> Result<bool, StorageError> {
        if self.refreshing.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }

        let guard = scopeguard(&self.refreshing);
        let now = now_secs();
        let last = self.last_refresh_at.load(Ordering::SeqCst);
        if !force && last != 0 && now.saturating_sub(last) < self.min_interval_secs {
            drop(guard);
            return Ok(false);
        }

        reconcile_holders(storage.db().clone()).await?;
        self.last_refresh_at.store(now, Ordering::SeqCst);
        drop(guard);
        Ok(true)
    }
}

/// RAII guard resetting `refreshing` back to false, even on early return.
struct ResetOnDrop<'a>(&'a AtomicBool);

fn scopeguard(flag: &AtomicBool) -> ResetOnDrop<'_> {
    ResetOnDrop(flag)
}

impl Drop for ResetOnDrop<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

static GLOBAL_REFRESHER: OnceCell<ProjectionRefresher> = OnceCell::new();

pub fn init_global_refresher(min_interval_secs: u64) {
    let _ = GLOBAL_REFRESHER.set(ProjectionRefresher::new(min_interval_secs));
}

fn global_refresher() -> &'static ProjectionRefresher {
    GLOBAL_REFRESHER.get_or_init(|| ProjectionRefresher::new(0))
}

/// Entry point used by the sync coordinator's checkpoint trigger and by
/// the composition root's startup refresh.
pub async fn refresh_balance_projection(storage: &StorageEngine, force: bool) -> Result<bool, StorageError> {
    global_refresher().refresh(storage, force).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn second_refresh_within_interval_is_skipped() {
        let dir = TempDir::new().unwrap();
        let storage = StorageEngine::open(dir.path().to_str().unwrap()).unwrap();
        let refresher = ProjectionRefresher::new(3600);

        assert!(refresher.refresh(&storage, false).await.unwrap());
        assert!(!refresher.refresh(&storage, false).await.unwrap());
    }

    #[tokio::test]
    async fn immediate_refresh_runs_when_interval_is_zero() {
        let dir = TempDir::new().unwrap();
        let storage = StorageEngine::open(dir.path().to_str().unwrap()).unwrap();
        let refresher = ProjectionRefresher::new(0);

        assert!(refresher.refresh(&storage, false).await.unwrap());
        assert!(refresher.refresh(&storage, false).await.unwrap());
    }

    #[tokio::test]
    async fn forced_refresh_bypasses_interval_gate() {
        let dir = TempDir::new().unwrap();
        let storage = StorageEngine::open(dir.path().to_str().unwrap()).unwrap();
        let refresher = ProjectionRefresher::new(3600);

        assert!(refresher.refresh(&storage, false).await.unwrap());
        assert!(!refresher.refresh(&storage, false).await.unwrap());
        assert!(refresher.refresh(&storage, true).await.unwrap());
    }
}
