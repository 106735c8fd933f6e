//! Request caching for the query layer.
//!
//! LRU + TTL cache kept in the teacher's style, retargeted at
//! `get_balance`/`get_token` lookups instead of PIVX's block/tx/address
//! triad: these are the two highest-traffic read paths behind the HTTP
//! adapter and benefit most from a short-lived cache in front of RocksDB.

use lru::LruCache;
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Rendered balance view cached per address, covering every asset at once
/// so a cache hit never needs a second lookup for token balances.
#[derive(Debug, Clone)]
pub struct CachedBalance {
    pub rxd_balance: String,
    pub glyph_tokens: BTreeMap<String, String>,
    pub utxo_count: u64,
}

#[derive(Debug, Clone)]
struct CachedEntry<T> {
    value: T,
    expires_at: Instant,
}

impl<T: Clone> CachedEntry<T> {
    fn new(value: T, ttl: Duration) -> Self {
        Self { value, expires_at: Instant::now() + ttl }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

pub struct CacheManager {
    balances: Arc<RwLock<LruCache<String, CachedEntry<CachedBalance>>>>,
    tokens: Arc<RwLock<LruCache<String, CachedEntry<crate::model::GlyphToken>>>>,
    default_ttl: Duration,
}

impl CacheManager {
    pub fn new() -> Self {
        Self::with_capacities(5000, 2000, Duration::from_secs(5))
    }

    pub fn with_capacities(balances_cap: usize, tokens_cap: usize, default_ttl: Duration) -> Self {
        Self {
            balances: Arc::new(RwLock::new(LruCache::new(NonZeroUsize::new(balances_cap).unwrap()))),
            tokens: Arc::new(RwLock::new(LruCache::new(NonZeroUsize::new(tokens_cap).unwrap()))),
            default_ttl,
        }
    }

    pub async fn get_balance(&self, address: &str) -> Option<CachedBalance> {
        let mut cache = self.balances.write().await;
        match cache.get(address) {
            Some(entry) if !entry.is_expired() => Some(entry.value.clone()),
            Some(_) => {
                cache.pop(address);
                None
            }
            None => None,
        }
    }

    pub async fn put_balance(&self, address: &str, balance: CachedBalance) {
        let mut cache = self.balances.write().await;
        cache.put(address.to_string(), CachedEntry::new(balance, self.default_ttl));
    }

    pub async fn invalidate_balance(&self, address: &str) {
        self.balances.write().await.pop(address);
    }

    pub async fn get_token(&self, ref_: &str) -> Option<crate::model::GlyphToken> {
        let mut cache = self.tokens.write().await;
        match cache.get(ref_) {
            Some(entry) if !entry.is_expired() => Some(entry.value.clone()),
            Some(_) => {
                cache.pop(ref_);
                None
            }
            None => None,
        }
    }

    pub async fn put_token(&self, ref_: &str, token: crate::model::GlyphToken) {
        let mut cache = self.tokens.write().await;
        cache.put(ref_.to_string(), CachedEntry::new(token, self.default_ttl));
    }

    pub async fn invalidate_token(&self, ref_: &str) {
        self.tokens.write().await.pop(ref_);
    }

    /// Drop every cached entry. Called after a reorg unwind, since balances
    /// and token locations may have changed underneath any cached value.
    pub async fn clear_all(&self) {
        self.balances.write().await.clear();
        self.tokens.write().await.clear();
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            balances_count: self.balances.read().await.len(),
            tokens_count: self.tokens.read().await.len(),
        }
    }
}

impl Default for CacheManager {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct CacheStats {
    pub balances_count: usize,
    pub tokens_count: usize,
}
