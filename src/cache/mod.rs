//! Cache-aside response materialization.
//!
//! A cached route answers from the store when it can and otherwise calls its hydrate
//! function, responds immediately and writes the fresh value back in the background:
//!
//! ```text
//! request -> key -> store.get -+-> hit  -> respond (remaining TTL)
//!                              +-> miss -> hydrate -> respond -> deferred store.set
//! ```
//!
//! Every response carries [`CacheMetadata`]; the [`emit_cache_control`] middleware turns
//! it into a `cache-control` header whose max-age is jittered below the stored TTL.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! expires_in_ms = 3600000
//! privacy = "default"      # default | private | public
//! jitter_floor = 0.6
//! # cache_name = "shared"
//!
//! [cache.stores.shared]
//! capacity = 5000
//! expires_in_ms = 600000
//! ```

mod config;
mod error;
mod freshness;
mod headers;
mod hydrate;
mod keys;
mod lock;
mod pipeline;
mod plugin;
mod route;
mod store;
mod tail;

pub use config::{CacheConfig, StoreSpec};
pub use error::{
    BoxError, ConfigurationError, HydrationError, KeyContractViolation, PipelineError,
    StoreError,
};
pub use freshness::{
    DEFAULT_EXPIRES_IN_MS, DEFAULT_JITTER_FLOOR, FreshnessPolicy, FreshnessSpec, Privacy,
    UnknownPrivacy, cache_control_line,
};
pub use headers::{apply_cache_control, emit_cache_control};
pub use hydrate::{Hydrate, HydrationOutcome};
pub use keys::{CacheKey, CacheRequest, KeyGenerator, SEGMENT, raw_url_key};
pub use pipeline::CacheMetadata;
pub use plugin::ResponseCache;
pub use route::{CacheRoute, CacheRouteBuilder};
pub use store::{
    CacheEntry, CacheStore, DEFAULT_CACHE_NAME, DEFAULT_STORE_CAPACITY, MemoryStore, Segment,
    SlotInfo, StoreCatalog, StoredItem,
};
pub use tail::{RequestTail, TailTracker};

pub const METRIC_CACHE_HIT_TOTAL: &str = "tacky_cache_hit_total";
pub const METRIC_CACHE_MISS_TOTAL: &str = "tacky_cache_miss_total";
pub const METRIC_CACHE_BYPASS_TOTAL: &str = "tacky_cache_bypass_total";
pub const METRIC_CACHE_READ_FAULT_TOTAL: &str = "tacky_cache_read_fault_total";
pub const METRIC_CACHE_WRITE_FAULT_TOTAL: &str = "tacky_cache_write_fault_total";
pub const METRIC_HYDRATE_FAULT_TOTAL: &str = "tacky_hydrate_fault_total";
pub const METRIC_HYDRATE_MS: &str = "tacky_hydrate_ms";
pub const METRIC_STORE_EVICT_TOTAL: &str = "tacky_store_evict_total";
