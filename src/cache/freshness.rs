//! Freshness policy: stored TTLs, jittered max-age and the `cache-control` line.
//!
//! Responses hydrated at nearly the same moment would otherwise all expire together
//! downstream and revalidate in a burst. The advertised max-age is therefore drawn at
//! random from the upper band of the stored TTL.

use std::{fmt, str::FromStr};

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_EXPIRES_IN_MS: u64 = 3_600_000;
pub const DEFAULT_JITTER_FLOOR: f64 = 0.60;

/// Privacy directive appended to the `cache-control` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Privacy {
    /// No directive; shared caches apply their own defaults.
    #[default]
    Default,
    Private,
    Public,
}

impl Privacy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Privacy::Default => "default",
            Privacy::Private => "private",
            Privacy::Public => "public",
        }
    }
}

impl fmt::Display for Privacy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown privacy `{0}` (expected default, private or public)")]
pub struct UnknownPrivacy(String);

impl FromStr for Privacy {
    type Err = UnknownPrivacy;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "default" => Ok(Privacy::Default),
            "private" => Ok(Privacy::Private),
            "public" => Ok(Privacy::Public),
            _ => Err(UnknownPrivacy(value.to_string())),
        }
    }
}

/// Freshness attached to a single response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FreshnessSpec {
    /// Lifetime handed to the store (or remaining in it, on a hit).
    pub stored_ttl_ms: u64,
    /// Jittered lifetime advertised to clients.
    pub advertised_max_age_ms: u64,
    pub privacy: Privacy,
}

impl FreshnessSpec {
    pub fn max_age_secs(&self) -> u64 {
        self.advertised_max_age_ms / 1000
    }

    pub fn cache_control(&self) -> String {
        cache_control_line(self.max_age_secs(), self.privacy)
    }
}

/// Format `max-age=<secs>, must-revalidate[, <privacy>]`.
pub fn cache_control_line(max_age_secs: u64, privacy: Privacy) -> String {
    let mut line = format!("max-age={max_age_secs}, must-revalidate");
    if privacy != Privacy::Default {
        line.push_str(", ");
        line.push_str(privacy.as_str());
    }
    line
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FreshnessPolicy {
    expires_in_ms: u64,
    jitter_floor: f64,
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_EXPIRES_IN_MS, DEFAULT_JITTER_FLOOR)
    }
}

impl FreshnessPolicy {
    /// `jitter_floor` is clamped into `0.0..=1.0`; NaN falls back to the default.
    pub fn new(expires_in_ms: u64, jitter_floor: f64) -> Self {
        let jitter_floor = if jitter_floor.is_nan() {
            DEFAULT_JITTER_FLOOR
        } else {
            jitter_floor.clamp(0.0, 1.0)
        };
        Self {
            expires_in_ms,
            jitter_floor,
        }
    }

    pub fn expires_in_ms(&self) -> u64 {
        self.expires_in_ms
    }

    pub fn jitter_floor(&self) -> f64 {
        self.jitter_floor
    }

    /// TTL for a freshly hydrated entry. Zero asks the store for its own default.
    pub fn stored_ttl(&self, route_override: Option<u64>) -> u64 {
        route_override.unwrap_or(self.expires_in_ms)
    }

    pub fn advertised_max_age(&self, basis_ms: u64) -> u64 {
        self.advertised_max_age_with(&mut rand::thread_rng(), basis_ms)
    }

    /// Uniform draw from `[ceil(floor × basis), basis]`.
    pub fn advertised_max_age_with<R: Rng>(&self, rng: &mut R, basis_ms: u64) -> u64 {
        let lower = ((basis_ms as f64) * self.jitter_floor).ceil() as u64;
        rng.gen_range(lower.min(basis_ms)..=basis_ms)
    }

    /// Basis for the advertised max-age. A zero TTL is resolved by the store to the plugin
    /// default, so that default is advertised too.
    pub fn max_age_basis(&self, stored_ttl_ms: u64) -> u64 {
        if stored_ttl_ms == 0 {
            self.expires_in_ms
        } else {
            stored_ttl_ms
        }
    }

    /// Freshness for a freshly hydrated entry.
    pub fn freshness(&self, stored_ttl_ms: u64, privacy: Privacy) -> FreshnessSpec {
        FreshnessSpec {
            stored_ttl_ms,
            advertised_max_age_ms: self.advertised_max_age(self.max_age_basis(stored_ttl_ms)),
            privacy,
        }
    }

    /// Freshness for an entry replayed from the store.
    ///
    /// The advertised age never exceeds what the storing response advertised, less the time
    /// the entry has spent in the store since.
    pub fn replayed(
        &self,
        stored_ttl_ms: u64,
        advertised_at_store_ms: u64,
        ttl_remaining_ms: u64,
        privacy: Privacy,
    ) -> FreshnessSpec {
        let elapsed = self
            .max_age_basis(stored_ttl_ms)
            .saturating_sub(ttl_remaining_ms);
        let ceiling = advertised_at_store_ms.saturating_sub(elapsed);
        FreshnessSpec {
            stored_ttl_ms: ttl_remaining_ms,
            advertised_max_age_ms: self.advertised_max_age(ttl_remaining_ms).min(ceiling),
            privacy,
        }
    }
}
