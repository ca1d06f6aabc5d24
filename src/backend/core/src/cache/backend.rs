//! Cache backend implementations.
//!
//! - **InMemoryBackend**: `DashMap` store with lazy expiry, a background
//!   sweeper and a capacity bound
//! - **RedisBackend**: shared store using `SET EX`
//!
//! Both honour the logical TTL on every read: an entry is live while
//! `now - created_at < ttl`, whether or not it has been physically removed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};
use crate::error::{GatekeeperError, Result};

// ═══════════════════════════════════════════════════════════════════════════════
// Cache Entry
// ═══════════════════════════════════════════════════════════════════════════════

/// How far ahead of the reading clock an entry's `created_at` may be and
/// still count as live. Beyond this the entry is treated as expired.
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(5);

/// A cached payload with its creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Whether the entry is still within its window at `now`.
    ///
    /// An entry stamped ahead of `now` (another node's clock running fast)
    /// is live only within `MAX_CLOCK_SKEW`, capped at `ttl`.
    pub fn is_live(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        match now.signed_duration_since(self.created_at).to_std() {
            Ok(age) => age < ttl,
            Err(_) => match self.created_at.signed_duration_since(now).to_std() {
                Ok(ahead) => ahead <= MAX_CLOCK_SKEW.min(ttl),
                Err(_) => false,
            },
        }
    }
}

/// Outcome of a backend read.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Hit(CacheEntry),
    Miss,
    /// Present but past its TTL; treated as a miss.
    Expired,
}

impl CacheLookup {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hit(_) => "hit",
            Self::Miss => "miss",
            Self::Expired => "expired",
        }
    }

    pub fn into_entry(self) -> Option<CacheEntry> {
        match self {
            Self::Hit(entry) => Some(entry),
            Self::Miss | Self::Expired => None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Cache Backend Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Key-value store with fixed-window expiry.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Read an entry, honouring the TTL.
    async fn get(&self, key: &str) -> Result<CacheLookup>;

    /// Store a payload, replacing any entry under `key` and restarting its window.
    async fn set(&self, key: &str, payload: serde_json::Value) -> Result<()>;

    /// Remove an entry. Returns whether one was present.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Physically remove expired entries. Returns how many were removed.
    async fn purge_expired(&self) -> Result<usize>;

    /// Number of stored entries, including expired ones not yet purged.
    async fn len(&self) -> Result<usize>;

    /// Get the backend name.
    fn name(&self) -> &'static str;
}

// ═══════════════════════════════════════════════════════════════════════════════
// In-Memory Backend
// ═══════════════════════════════════════════════════════════════════════════════

/// In-process cache backend.
#[derive(Debug)]
pub struct InMemoryBackend {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
    max_entries: usize,
    clock: Arc<dyn Clock>,
}

impl InMemoryBackend {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self::with_clock(ttl, max_entries, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, max_entries: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            max_entries: max_entries.max(1),
            clock,
        }
    }

    /// Make room for one more entry, dropping expired entries first and
    /// then the oldest ones.
    fn make_room(&self, incoming: &str) {
        if self.entries.len() < self.max_entries || self.entries.contains_key(incoming) {
            return;
        }

        self.remove_expired();

        let mut evicted = 0;
        while self.entries.len() >= self.max_entries {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|e| e.value().created_at)
                .map(|e| e.key().clone());

            match oldest {
                Some(key) => {
                    self.entries.remove(&key);
                    evicted += 1;
                }
                None => break,
            }
        }

        if evicted > 0 {
            debug!(evicted, "Evicted oldest cache entries");
        }
    }

    fn remove_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now, self.ttl));
        before.saturating_sub(self.entries.len())
    }

    /// Periodically purge expired entries until the returned task is aborted.
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let purged = self.remove_expired();
                if purged > 0 {
                    debug!(purged, remaining = self.entries.len(), "Swept expired cache entries");
                }
            }
        })
    }
}

#[async_trait]
impl CacheBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> Result<CacheLookup> {
        let now = self.clock.now();

        let lookup = match self.entries.get(key) {
            None => CacheLookup::Miss,
            Some(entry) if entry.is_live(now, self.ttl) => CacheLookup::Hit(entry.value().clone()),
            Some(_) => CacheLookup::Expired,
        };

        if lookup == CacheLookup::Expired {
            // A concurrent `set` may have refreshed the entry in the meantime.
            self.entries.remove_if(key, |_, entry| !entry.is_live(now, self.ttl));
        }

        Ok(lookup)
    }

    async fn set(&self, key: &str, payload: serde_json::Value) -> Result<()> {
        self.make_room(key);

        let entry = CacheEntry {
            key: key.to_string(),
            payload,
            created_at: self.clock.now(),
        };
        self.entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn purge_expired(&self) -> Result<usize> {
        Ok(self.remove_expired())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.entries.len())
    }

    fn name(&self) -> &'static str {
        "in_memory"
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Redis Backend
// ═══════════════════════════════════════════════════════════════════════════════

/// Redis cache backend.
///
/// Redis drops keys on its own once `SET EX` runs out; `created_at` is still
/// checked on read so that the window stays exact.
#[derive(Clone)]
pub struct RedisBackend {
    conn: ConnectionManager,
    key_prefix: String,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend")
            .field("key_prefix", &self.key_prefix)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl RedisBackend {
    /// Connect and verify the connection with a `PING`.
    pub async fn connect(url: &str, key_prefix: impl Into<String>, ttl: Duration) -> Result<Self> {
        let client = redis::Client::open(url).map_err(|e| {
            GatekeeperError::configuration(format!("invalid redis url: {}", e))
        })?;

        let mut conn = ConnectionManager::new(client).await.map_err(|e| {
            GatekeeperError::configuration(format!("failed to connect to redis: {}", e))
        })?;

        let _: String = redis::cmd("PING").query_async(&mut conn).await.map_err(|e| {
            GatekeeperError::configuration(format!("redis ping failed: {}", e))
        })?;

        info!(url = %url, "Redis cache backend connected");

        Ok(Self {
            conn,
            key_prefix: key_prefix.into(),
            ttl,
            clock: Arc::new(SystemClock),
        })
    }

    /// Expiry handed to Redis, in whole seconds, never zero.
    fn expiry_secs(&self) -> u64 {
        let secs = self.ttl.as_secs();
        if self.ttl.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs.max(1)
        }
    }
}

/// Errors on the read path are reported apart from write failures.
fn read_error(error: redis::RedisError) -> GatekeeperError {
    GatekeeperError::cache_read(error.to_string()).with_source(error)
}

#[async_trait]
impl CacheBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<CacheLookup> {
        let mut conn = self.conn.clone();
        let data: Option<Vec<u8>> = conn.get(key).await.map_err(read_error)?;

        let Some(bytes) = data else {
            return Ok(CacheLookup::Miss);
        };

        let entry: CacheEntry = match serde_json::from_slice(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable cache entry");
                let _: i64 = conn.del(key).await.map_err(read_error)?;
                return Ok(CacheLookup::Miss);
            }
        };

        if entry.is_live(self.clock.now(), self.ttl) {
            Ok(CacheLookup::Hit(entry))
        } else {
            Ok(CacheLookup::Expired)
        }
    }

    async fn set(&self, key: &str, payload: serde_json::Value) -> Result<()> {
        let entry = CacheEntry {
            key: key.to_string(),
            payload,
            created_at: self.clock.now(),
        };
        let data = serde_json::to_vec(&entry)
            .map_err(|e| GatekeeperError::cache_write(e.to_string()))?;

        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, data, self.expiry_secs()).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let deleted: i64 = conn.del(key).await?;
        Ok(deleted > 0)
    }

    async fn purge_expired(&self) -> Result<usize> {
        // Redis expires keys itself.
        Ok(0)
    }

    async fn len(&self) -> Result<usize> {
        let mut conn = self.conn.clone();
        let mut keys = conn
            .scan_match::<_, String>(format!("{}*", self.key_prefix))
            .await?;

        let mut count = 0;
        while keys.next_item().await.is_some() {
            count += 1;
        }
        Ok(count)
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use serde_json::json;

    const TTL: Duration = Duration::from_secs(300);

    fn backend(max_entries: usize) -> (InMemoryBackend, ManualClock) {
        let clock = ManualClock::default();
        let backend = InMemoryBackend::with_clock(TTL, max_entries, Arc::new(clock.clone()));
        (backend, clock)
    }

    #[tokio::test]
    async fn test_ttl_boundary() {
        let (backend, clock) = backend(10);
        backend.set("k", json!({"id": 1})).await.unwrap();

        clock.advance(TTL - Duration::from_millis(1));
        assert!(matches!(backend.get("k").await.unwrap(), CacheLookup::Hit(_)));

        clock.advance(Duration::from_millis(2));
        assert_eq!(backend.get("k").await.unwrap(), CacheLookup::Expired);

        // Removed by the read that saw it expire.
        assert_eq!(backend.len().await.unwrap(), 0);
        assert_eq!(backend.get("k").await.unwrap(), CacheLookup::Miss);
    }

    #[tokio::test]
    async fn test_exactly_at_ttl_is_expired() {
        let (backend, clock) = backend(10);
        backend.set("k", json!(1)).await.unwrap();
        clock.advance(TTL);
        assert_eq!(backend.get("k").await.unwrap(), CacheLookup::Expired);
    }

    #[tokio::test]
    async fn test_entry_from_far_future_is_expired() {
        let (backend, clock) = backend(10);
        let start = clock.now();

        clock.advance(Duration::from_secs(3600));
        backend.set("k", json!(1)).await.unwrap();
        clock.set(start);

        assert_eq!(backend.get("k").await.unwrap(), CacheLookup::Expired);
        assert_eq!(backend.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_small_clock_skew_is_tolerated() {
        let (backend, clock) = backend(10);
        let start = clock.now();

        clock.advance(MAX_CLOCK_SKEW);
        backend.set("k", json!(1)).await.unwrap();
        clock.set(start);
        assert!(matches!(backend.get("k").await.unwrap(), CacheLookup::Hit(_)));

        clock.advance(Duration::from_secs(3600));
        backend.set("k", json!(2)).await.unwrap();
        clock.set(start);
        assert_eq!(backend.get("k").await.unwrap(), CacheLookup::Expired);
    }

    #[test]
    fn test_skew_allowance_never_exceeds_ttl() {
        let now = Utc::now();
        let entry = CacheEntry {
            key: "k".to_string(),
            payload: json!(1),
            created_at: now + chrono::Duration::seconds(2),
        };

        assert!(entry.is_live(now, TTL));
        assert!(!entry.is_live(now, Duration::from_secs(1)));
    }

    #[test]
    fn test_redis_read_errors_are_read_failures() {
        let error = redis::RedisError::from((redis::ErrorKind::IoError, "connection reset"));
        let mapped = read_error(error);

        assert_eq!(mapped.code(), crate::error::ErrorCode::CacheReadFailure);
    }

    #[tokio::test]
    async fn test_set_restarts_window() {
        let (backend, clock) = backend(10);
        backend.set("k", json!(1)).await.unwrap();
        clock.advance(Duration::from_secs(200));
        backend.set("k", json!(2)).await.unwrap();
        clock.advance(Duration::from_secs(200));

        match backend.get("k").await.unwrap() {
            CacheLookup::Hit(entry) => assert_eq!(entry.payload, json!(2)),
            other => panic!("expected hit, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let (backend, clock) = backend(10);
        backend.set("old", json!(1)).await.unwrap();
        clock.advance(Duration::from_secs(250));
        backend.set("new", json!(2)).await.unwrap();
        clock.advance(Duration::from_secs(100));

        assert_eq!(backend.purge_expired().await.unwrap(), 1);
        assert_eq!(backend.len().await.unwrap(), 1);
        assert!(matches!(backend.get("new").await.unwrap(), CacheLookup::Hit(_)));
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest() {
        let (backend, clock) = backend(2);
        backend.set("a", json!(1)).await.unwrap();
        clock.advance(Duration::from_secs(1));
        backend.set("b", json!(2)).await.unwrap();
        clock.advance(Duration::from_secs(1));
        backend.set("c", json!(3)).await.unwrap();

        assert_eq!(backend.len().await.unwrap(), 2);
        assert_eq!(backend.get("a").await.unwrap(), CacheLookup::Miss);
        assert!(matches!(backend.get("c").await.unwrap(), CacheLookup::Hit(_)));

        // Overwriting an existing key does not evict.
        backend.set("b", json!(4)).await.unwrap();
        assert_eq!(backend.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_delete() {
        let (backend, _) = backend(10);
        backend.set("k", json!(1)).await.unwrap();
        assert!(backend.delete("k").await.unwrap());
        assert!(!backend.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_sweeper_purges_in_background() {
        let clock = ManualClock::default();
        let backend = Arc::new(InMemoryBackend::with_clock(TTL, 10, Arc::new(clock.clone())));
        backend.set("k", json!(1)).await.unwrap();

        let sweeper = backend.clone().spawn_sweeper(Duration::from_millis(10));
        clock.advance(TTL + Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(backend.len().await.unwrap(), 0);
        sweeper.abort();
    }
}
