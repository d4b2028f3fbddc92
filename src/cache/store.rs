//! Cache store adapter.
//!
//! [`CacheStore`] is the seam to the external key-value store. [`Segment`] binds a store
//! to this layer's private namespace, and [`StoreCatalog`] resolves named stores at
//! registration time. [`MemoryStore`] is the in-process LRU implementation.

use std::{
    collections::HashMap,
    num::NonZeroUsize,
    sync::{Arc, RwLock},
    time::Duration,
};

use async_trait::async_trait;
use lru::LruCache;
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;

use super::{
    METRIC_STORE_EVICT_TOTAL,
    error::{ConfigurationError, StoreError},
    freshness::DEFAULT_EXPIRES_IN_MS,
    keys::{CacheKey, SEGMENT},
    lock::{rw_read, rw_write},
};

const SOURCE: &str = "cache::store";

pub const DEFAULT_CACHE_NAME: &str = "_default";
pub const DEFAULT_STORE_CAPACITY: usize = 1000;

/// Value persisted for a key after a successful hydration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub result: Value,
    pub state: Option<Value>,
    pub stored_ttl_ms: u64,
    /// Max-age advertised by the response that stored the entry.
    #[serde(default)]
    pub advertised_max_age_ms: u64,
}

/// A live entry together with the time it has left in the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredItem {
    pub entry: CacheEntry,
    pub ttl_remaining_ms: u64,
}

/// Keyed store with per-entry TTL.
///
/// A `ttl_ms` of zero on [`CacheStore::set`] means the store applies its own default.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, segment: &str, key: &str) -> Result<Option<StoredItem>, StoreError>;

    async fn set(
        &self,
        segment: &str,
        key: &str,
        entry: &CacheEntry,
        ttl_ms: u64,
    ) -> Result<(), StoreError>;
}

/// A store addressed through the layer's own segment.
#[derive(Clone)]
pub struct Segment {
    store: Arc<dyn CacheStore>,
    name: &'static str,
}

impl Segment {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            name: SEGMENT,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub async fn get(&self, key: &CacheKey) -> Result<Option<StoredItem>, StoreError> {
        self.store.get(self.name, key.as_str()).await
    }

    pub async fn set(
        &self,
        key: &CacheKey,
        entry: &CacheEntry,
        ttl_ms: u64,
    ) -> Result<(), StoreError> {
        self.store.set(self.name, key.as_str(), entry, ttl_ms).await
    }
}

/// Named stores available to the plugin. The default store is always present.
#[derive(Clone)]
pub struct StoreCatalog {
    default: Arc<dyn CacheStore>,
    named: HashMap<String, Arc<dyn CacheStore>>,
}

impl Default for StoreCatalog {
    fn default() -> Self {
        Self::new(Arc::new(MemoryStore::new(
            DEFAULT_STORE_CAPACITY,
            DEFAULT_EXPIRES_IN_MS,
        )))
    }
}

impl StoreCatalog {
    pub fn new(default: Arc<dyn CacheStore>) -> Self {
        Self {
            default,
            named: HashMap::new(),
        }
    }

    pub fn with_store(mut self, name: impl Into<String>, store: Arc<dyn CacheStore>) -> Self {
        self.named.insert(name.into(), store);
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.named.keys().map(String::as_str)
    }

    /// Look up a store by name; `None` and `_default` select the default store.
    pub fn resolve(&self, name: Option<&str>) -> Result<Arc<dyn CacheStore>, ConfigurationError> {
        match name {
            None | Some(DEFAULT_CACHE_NAME) => Ok(Arc::clone(&self.default)),
            Some(name) => self.named.get(name).cloned().ok_or_else(|| {
                ConfigurationError::UnknownCache {
                    name: name.to_string(),
                }
            }),
        }
    }
}

// ============================================================================
// Memory store
// ============================================================================

struct Slot {
    payload: String,
    stored_at: Instant,
    ttl: Duration,
}

impl Slot {
    fn remaining(&self, now: Instant) -> Option<Duration> {
        self.ttl
            .checked_sub(now.saturating_duration_since(self.stored_at))
            .filter(|left| !left.is_zero())
    }
}

/// Snapshot of a raw slot, for diagnostics and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotInfo {
    pub payload: String,
    pub ttl_ms: u64,
}

/// In-process store: JSON-encoded entries in an LRU, expired lazily on read.
///
/// Time is read from the tokio clock, so a paused runtime controls expiry.
pub struct MemoryStore {
    slots: RwLock<LruCache<(String, String), Slot>>,
    default_ttl_ms: u64,
}

impl MemoryStore {
    pub fn new(capacity: usize, default_ttl_ms: u64) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            slots: RwLock::new(LruCache::new(capacity)),
            default_ttl_ms,
        }
    }

    pub fn default_ttl_ms(&self) -> u64 {
        self.default_ttl_ms
    }

    /// Number of slots held, expired ones included until they are read.
    pub fn len(&self) -> usize {
        rw_read(&self.slots, SOURCE, "memory_len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn segment_len(&self, segment: &str) -> usize {
        rw_read(&self.slots, SOURCE, "memory_segment_len")
            .iter()
            .filter(|((seg, _), _)| seg == segment)
            .count()
    }

    pub fn inspect(&self, segment: &str, key: &str) -> Option<SlotInfo> {
        rw_read(&self.slots, SOURCE, "memory_inspect")
            .peek(&(segment.to_string(), key.to_string()))
            .map(|slot| SlotInfo {
                payload: slot.payload.clone(),
                ttl_ms: duration_ms(slot.ttl),
            })
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, segment: &str, key: &str) -> Result<Option<StoredItem>, StoreError> {
        let id = (segment.to_string(), key.to_string());
        let now = Instant::now();

        let payload = {
            let mut slots = rw_write(&self.slots, SOURCE, "memory_get");
            let remaining = match slots.get(&id) {
                None => return Ok(None),
                Some(slot) => slot.remaining(now).map(|left| (slot.payload.clone(), left)),
            };
            if remaining.is_none() {
                slots.pop(&id);
            }
            remaining
        };

        let Some((payload, left)) = payload else {
            return Ok(None);
        };
        let entry: CacheEntry = serde_json::from_str(&payload)?;
        Ok(Some(StoredItem {
            entry,
            ttl_remaining_ms: duration_ms(left),
        }))
    }

    async fn set(
        &self,
        segment: &str,
        key: &str,
        entry: &CacheEntry,
        ttl_ms: u64,
    ) -> Result<(), StoreError> {
        let payload = serde_json::to_string(entry)?;
        let ttl_ms = if ttl_ms == 0 {
            self.default_ttl_ms
        } else {
            ttl_ms
        };
        let id = (segment.to_string(), key.to_string());
        let slot = Slot {
            payload,
            stored_at: Instant::now(),
            ttl: Duration::from_millis(ttl_ms),
        };

        let evicted = rw_write(&self.slots, SOURCE, "memory_set").push(id.clone(), slot);
        if evicted.is_some_and(|(evicted_id, _)| evicted_id != id) {
            counter!(METRIC_STORE_EVICT_TOTAL).increment(1);
        }
        Ok(())
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
