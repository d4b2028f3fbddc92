use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::{
    cache::{
        METRIC_CACHE_BYPASS_TOTAL, METRIC_CACHE_HIT_TOTAL, METRIC_CACHE_MISS_TOTAL,
        METRIC_CACHE_READ_FAULT_TOTAL, METRIC_CACHE_WRITE_FAULT_TOTAL, METRIC_HYDRATE_FAULT_TOTAL,
        METRIC_HYDRATE_MS, METRIC_STORE_EVICT_TOTAL,
    },
    config::{LogFormat, LoggingSettings},
};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

/// Register descriptions for the cache metrics with the installed recorder.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_CACHE_HIT_TOTAL,
            Unit::Count,
            "Requests answered from the cache store."
        );
        describe_counter!(
            METRIC_CACHE_MISS_TOTAL,
            Unit::Count,
            "Keyed requests that had to hydrate."
        );
        describe_counter!(
            METRIC_CACHE_BYPASS_TOTAL,
            Unit::Count,
            "Requests whose key generator switched caching off."
        );
        describe_counter!(
            METRIC_CACHE_READ_FAULT_TOTAL,
            Unit::Count,
            "Store reads that failed and were treated as misses."
        );
        describe_counter!(
            METRIC_CACHE_WRITE_FAULT_TOTAL,
            Unit::Count,
            "Deferred store writes that failed."
        );
        describe_counter!(
            METRIC_HYDRATE_FAULT_TOTAL,
            Unit::Count,
            "Hydrate calls that returned an error."
        );
        describe_histogram!(
            METRIC_HYDRATE_MS,
            Unit::Milliseconds,
            "Hydrate latency in milliseconds."
        );
        describe_counter!(
            METRIC_STORE_EVICT_TOTAL,
            Unit::Count,
            "Memory store evictions due to capacity."
        );
    });
}
