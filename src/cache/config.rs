//! Plugin-wide cache settings.

use std::{collections::BTreeMap, sync::Arc};

use serde::Deserialize;

use super::{
    error::ConfigurationError,
    freshness::{DEFAULT_EXPIRES_IN_MS, DEFAULT_JITTER_FLOOR, FreshnessPolicy, Privacy},
    store::{DEFAULT_STORE_CAPACITY, MemoryStore, StoreCatalog},
};

/// Settings for [`ResponseCache::register`](super::ResponseCache::register).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Stored TTL for routes without their own `expires_in`.
    pub expires_in_ms: u64,
    /// Privacy directive for routes without their own override.
    pub privacy: Privacy,
    /// Named store to use; `None` selects the default store.
    pub cache_name: Option<String>,
    /// Lower bound of the advertised max-age, as a fraction of the stored TTL.
    pub jitter_floor: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            expires_in_ms: DEFAULT_EXPIRES_IN_MS,
            privacy: Privacy::Default,
            cache_name: None,
            jitter_floor: DEFAULT_JITTER_FLOOR,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            expires_in_ms: settings.expires_in_ms,
            privacy: settings.privacy,
            cache_name: settings.cache_name.clone(),
            jitter_floor: settings.jitter_floor,
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !(0.0..=1.0).contains(&self.jitter_floor) {
            return Err(ConfigurationError::invalid(
                "jitter_floor",
                format!("must be within 0.0..=1.0, got {}", self.jitter_floor),
            ));
        }
        if matches!(self.cache_name.as_deref(), Some(name) if name.trim().is_empty()) {
            return Err(ConfigurationError::invalid("cache_name", "must not be blank"));
        }
        Ok(())
    }

    pub fn policy(&self) -> FreshnessPolicy {
        FreshnessPolicy::new(self.expires_in_ms, self.jitter_floor)
    }
}

/// Capacity and default TTL of one in-memory store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreSpec {
    pub capacity: usize,
    pub expires_in_ms: u64,
}

impl Default for StoreSpec {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_STORE_CAPACITY,
            expires_in_ms: DEFAULT_EXPIRES_IN_MS,
        }
    }
}

impl StoreSpec {
    fn build(&self) -> Arc<MemoryStore> {
        Arc::new(MemoryStore::new(self.capacity, self.expires_in_ms))
    }
}

impl StoreCatalog {
    /// Memory-backed catalog: one default store plus one store per named entry.
    pub fn from_specs(default: StoreSpec, named: &BTreeMap<String, StoreSpec>) -> Self {
        named
            .iter()
            .fold(Self::new(default.build()), |catalog, (name, spec)| {
                catalog.with_store(name.clone(), spec.build())
            })
    }
}

impl From<&crate::config::CacheSettings> for StoreCatalog {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self::from_specs(settings.default_store, &settings.stores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert_eq!(config.expires_in_ms, 3_600_000);
        assert_eq!(config.privacy, Privacy::Default);
        assert_eq!(config.cache_name, None);
        assert_eq!(config.jitter_floor, 0.60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn jitter_floor_out_of_range_is_rejected() {
        for floor in [-0.1, 1.5, f64::NAN] {
            let config = CacheConfig {
                jitter_floor: floor,
                ..Default::default()
            };
            let err = config.validate().unwrap_err();
            assert!(matches!(
                err,
                ConfigurationError::InvalidSetting {
                    key: "jitter_floor",
                    ..
                }
            ));
        }
    }

    #[test]
    fn blank_cache_name_is_rejected() {
        let config = CacheConfig {
            cache_name: Some("  ".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn policy_carries_expiry() {
        let config = CacheConfig {
            expires_in_ms: 100_000,
            ..Default::default()
        };
        assert_eq!(config.policy().stored_ttl(None), 100_000);
    }

    #[test]
    fn catalog_from_specs_registers_named_stores() {
        let mut named = BTreeMap::new();
        named.insert(
            "sessions".to_string(),
            StoreSpec {
                capacity: 10,
                expires_in_ms: 1_000,
            },
        );
        let catalog = StoreCatalog::from_specs(StoreSpec::default(), &named);

        assert_eq!(catalog.names().collect::<Vec<_>>(), vec!["sessions"]);
        assert!(catalog.resolve(Some("sessions")).is_ok());
        assert!(catalog.resolve(None).is_ok());
        assert!(catalog.resolve(Some("other")).is_err());
    }

    #[test]
    fn deserializes_partial_settings() {
        let config: CacheConfig =
            serde_json::from_str(r#"{"privacy": "private", "cache_name": "shared"}"#).unwrap();
        assert_eq!(config.privacy, Privacy::Private);
        assert_eq!(config.cache_name.as_deref(), Some("shared"));
        assert_eq!(config.expires_in_ms, DEFAULT_EXPIRES_IN_MS);
    }
}
