//! Keyed, expiring storage for verified proxies.

use crate::error::{NoProxyAvailable, StoreError};
use crate::proxy::{Address, Proxy};

use async_trait::async_trait;
use log::debug;
use parking_lot::RwLock;
use rand::Rng;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Lifetime of a record that is not written again.
pub const RECORD_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Persistence for the pool, keyed by `host:port`.
///
/// Every write is atomic per key; no operation spans several keys.
#[async_trait]
pub trait PoolStore: Send + Sync {
    /// Insert or replace the record and restart its expiry.
    async fn save(&self, proxy: &Proxy) -> Result<(), StoreError>;

    /// All live records, in no particular order.
    async fn get_all(&self) -> Result<Vec<Proxy>, StoreError>;

    /// One live record chosen uniformly at random.
    async fn get_random(&self) -> Result<Proxy, StoreError>;

    /// Delete the record if present. Absent records are not an error.
    async fn remove(&self, address: &Address) -> Result<(), StoreError>;

    /// Replace only the score of a stored record, clamped into range.
    async fn update_score(&self, address: &Address, score: i64) -> Result<(), StoreError>;
}

#[derive(Debug, Clone)]
struct Entry {
    proxy: Proxy,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// In-process store. Expiry follows the tokio clock, so paused-time tests can
/// move past the TTL.
#[derive(Debug)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
    ttl: Duration,
}

impl MemoryStore {
    /// Create an empty store with the standard record TTL.
    pub fn new() -> Self {
        Self::with_ttl(RECORD_TTL)
    }

    /// Create an empty store with a custom record TTL.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.read().values().filter(|e| e.is_live(now)).count()
    }

    /// Whether the store holds no live record.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop expired entries, returning how many were dropped.
    ///
    /// `get_all` does this on every call, so a running recheck loop keeps the
    /// map bounded by the live records.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        let purged = before - entries.len();
        if purged > 0 {
            debug!("Purged {} expired proxies", purged);
        }
        purged
    }

    fn live(&self) -> Vec<Proxy> {
        let now = Instant::now();
        self.entries
            .read()
            .values()
            .filter(|e| e.is_live(now))
            .map(|e| e.proxy.clone())
            .collect()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PoolStore for MemoryStore {
    async fn save(&self, proxy: &Proxy) -> Result<(), StoreError> {
        let key = proxy.key();
        debug!("Saving proxy {}", key);
        let entry = Entry {
            proxy: proxy.clone(),
            expires_at: Instant::now() + self.ttl,
        };
        self.entries.write().insert(key, entry);
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<Proxy>, StoreError> {
        self.purge_expired();
        Ok(self.live())
    }

    async fn get_random(&self) -> Result<Proxy, StoreError> {
        let mut live = self.live();
        if live.is_empty() {
            return Err(NoProxyAvailable.into());
        }
        let idx = rand::rng().random_range(0..live.len());
        Ok(live.swap_remove(idx))
    }

    async fn remove(&self, address: &Address) -> Result<(), StoreError> {
        let key = address.to_string();
        if self.entries.write().remove(&key).is_some() {
            debug!("Removed proxy {}", key);
        }
        Ok(())
    }

    async fn update_score(&self, address: &Address, score: i64) -> Result<(), StoreError> {
        let key = address.to_string();
        let now = Instant::now();
        let mut entries = self.entries.write();
        match entries.get_mut(&key) {
            Some(entry) if entry.is_live(now) => {
                entry.proxy.set_score(score);
                entry.expires_at = now + self.ttl;
                Ok(())
            }
            _ => Err(StoreError::NotFound(key)),
        }
    }
}
