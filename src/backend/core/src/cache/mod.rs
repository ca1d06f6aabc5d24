//! Identity and profile caching.
//!
//! ```text
//!   IdentityCache / ProfileCache      typed get(token) / put(token, value)
//!              │
//!         KeyBuilder                  prefix + namespace + token digest
//!              │
//!        CacheBackend                 get / set / delete / purge_expired
//!         ┌────┴─────┐
//!   InMemoryBackend  RedisBackend
//! ```
//!
//! Reads never fail a request: a backend error or an undecodable payload is
//! logged and treated as a miss. Writes report failures to the caller, which
//! is expected to log and carry on.

pub mod backend;
pub mod clock;
pub mod key;

pub use backend::{CacheBackend, CacheEntry, CacheLookup, InMemoryBackend, RedisBackend};
pub use clock::{Clock, ManualClock, SystemClock};
pub use key::{KeyBuilder, KeyType};

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{GatekeeperError, Result};
use crate::identity::{Identity, Profile};
use crate::telemetry::metrics::{record_cache_lookup, record_cache_write};
use crate::telemetry::token_fingerprint;

/// A cache of `T` values keyed by token.
pub struct TypedCache<T> {
    backend: Arc<dyn CacheBackend>,
    keys: KeyBuilder,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for TypedCache<T> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            keys: self.keys.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for TypedCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypedCache")
            .field("backend", &self.backend.name())
            .field("key_type", &self.keys.key_type())
            .finish()
    }
}

/// Resolved identities.
pub type IdentityCache = TypedCache<Identity>;

/// Enriched profiles, stored apart from identities.
pub type ProfileCache = TypedCache<Profile>;

impl TypedCache<Identity> {
    pub fn new(backend: Arc<dyn CacheBackend>, key_prefix: &str) -> Self {
        Self::with_key_type(backend, key_prefix, KeyType::Identity)
    }
}

impl TypedCache<Profile> {
    pub fn new(backend: Arc<dyn CacheBackend>, key_prefix: &str) -> Self {
        Self::with_key_type(backend, key_prefix, KeyType::Profile)
    }
}

impl<T: Serialize + DeserializeOwned> TypedCache<T> {
    fn with_key_type(backend: Arc<dyn CacheBackend>, key_prefix: &str, key_type: KeyType) -> Self {
        Self {
            backend,
            keys: KeyBuilder::new(key_prefix, key_type),
            _marker: PhantomData,
        }
    }

    fn namespace(&self) -> &'static str {
        self.keys.key_type().namespace()
    }

    /// The live value stored for `token`, if any.
    pub async fn get(&self, token: &str) -> Option<T> {
        let key = self.keys.for_token(token);

        let lookup = match self.backend.get(&key).await {
            Ok(lookup) => lookup,
            Err(e) => {
                warn!(
                    namespace = self.namespace(),
                    token = %token_fingerprint(token),
                    error = %e,
                    "Cache read failed, treating as miss"
                );
                record_cache_lookup(self.namespace(), "error");
                return None;
            }
        };

        record_cache_lookup(self.namespace(), lookup.as_str());
        debug!(
            namespace = self.namespace(),
            token = %token_fingerprint(token),
            result = lookup.as_str(),
            "Cache lookup"
        );

        let entry = lookup.into_entry()?;
        match serde_json::from_value(entry.payload) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(namespace = self.namespace(), error = %e, "Undecodable cache payload, treating as miss");
                None
            }
        }
    }

    /// Store `value` for `token`, replacing any previous entry.
    pub async fn put(&self, token: &str, value: &T) -> Result<()> {
        let key = self.keys.for_token(token);
        let payload =
            serde_json::to_value(value).map_err(|e| GatekeeperError::cache_write(e.to_string()))?;

        let result = self.backend.set(&key, payload).await;
        record_cache_write(self.namespace(), result.is_ok());
        result
    }

    /// Forget the entry for `token`.
    pub async fn invalidate(&self, token: &str) -> Result<bool> {
        self.backend.delete(&self.keys.for_token(token)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;

    fn memory() -> Arc<dyn CacheBackend> {
        Arc::new(InMemoryBackend::new(Duration::from_secs(300), 100))
    }

    #[tokio::test]
    async fn test_identity_and_profile_are_separate() {
        let backend = memory();
        let identities = IdentityCache::new(backend.clone(), "gk:");
        let profiles = ProfileCache::new(backend.clone(), "gk:");

        identities.put("tok", &Identity::new("1")).await.unwrap();
        assert_eq!(identities.get("tok").await.map(|i| i.id.to_string()), Some("1".to_string()));
        assert!(profiles.get("tok").await.is_none());

        profiles.put("tok", &Profile::default()).await.unwrap();
        assert_eq!(backend.len().await.unwrap(), 2);

        assert!(identities.invalidate("tok").await.unwrap());
        assert!(identities.get("tok").await.is_none());
        assert!(profiles.get("tok").await.is_some());
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_a_miss() {
        let backend = memory();
        let cache = IdentityCache::new(backend.clone(), "gk:");
        let key = KeyBuilder::new("gk:", KeyType::Identity).for_token("tok");
        backend.set(&key, serde_json::json!({"no_id": true})).await.unwrap();

        assert!(cache.get("tok").await.is_none());
    }

    #[derive(Debug)]
    struct BrokenBackend;

    #[async_trait]
    impl CacheBackend for BrokenBackend {
        async fn get(&self, _key: &str) -> Result<CacheLookup> {
            Err(GatekeeperError::cache_read("down"))
        }
        async fn set(&self, _key: &str, _payload: serde_json::Value) -> Result<()> {
            Err(GatekeeperError::cache_write("down"))
        }
        async fn delete(&self, _key: &str) -> Result<bool> {
            Ok(false)
        }
        async fn purge_expired(&self) -> Result<usize> {
            Ok(0)
        }
        async fn len(&self) -> Result<usize> {
            Ok(0)
        }
        fn name(&self) -> &'static str {
            "broken"
        }
    }

    #[tokio::test]
    async fn test_backend_errors() {
        let cache = IdentityCache::new(Arc::new(BrokenBackend), "gk:");
        assert!(cache.get("tok").await.is_none());

        let err = cache.put("tok", &Identity::new("1")).await.unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::CacheWriteFailure);
    }
}
