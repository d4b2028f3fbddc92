//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{collections::BTreeMap, net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::{
    DEFAULT_EXPIRES_IN_MS, DEFAULT_JITTER_FLOOR, DEFAULT_STORE_CAPACITY, Privacy, StoreSpec,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "tacky";
const ENV_PREFIX: &str = "TACKY";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 9001;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 10;

/// Command-line arguments for the tacky binary.
#[derive(Debug, Parser)]
#[command(name = "tacky", version, about = "Cache-aside response server")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "TACKY_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Serve the demo routes through the response cache.
    Serve(Box<ServeArgs>),
    /// Resolve and validate the configuration, then exit.
    #[command(name = "check-config")]
    CheckConfig,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the default stored TTL in milliseconds.
    #[arg(long = "cache-expires-in-ms", value_name = "MILLIS")]
    pub cache_expires_in_ms: Option<u64>,

    /// Override the privacy directive (default|private|public).
    #[arg(long = "cache-privacy", value_name = "PRIVACY")]
    pub cache_privacy: Option<String>,

    /// Select a named cache store.
    #[arg(long = "cache-name", value_name = "NAME")]
    pub cache_name: Option<String>,

    /// Override the demo upstream URL.
    #[arg(long = "upstream-url", value_name = "URL")]
    pub upstream_url: Option<String>,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
    pub demo: DemoSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub expires_in_ms: u64,
    pub privacy: Privacy,
    pub cache_name: Option<String>,
    pub jitter_floor: f64,
    pub default_store: StoreSpec,
    pub stores: BTreeMap<String, StoreSpec>,
}

#[derive(Debug, Clone)]
pub struct DemoSettings {
    pub upstream_url: Option<String>,
    pub upstream_timeout: Duration,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: String, reason: String },
}

impl LoadError {
    fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::CheckConfig) | None => {}
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
    demo: RawDemoSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(expires_in_ms) = overrides.cache_expires_in_ms {
            self.cache.expires_in_ms = Some(expires_in_ms);
        }
        if let Some(privacy) = overrides.cache_privacy.as_ref() {
            self.cache.privacy = Some(privacy.clone());
        }
        if let Some(name) = overrides.cache_name.as_ref() {
            self.cache.cache_name = Some(name.clone());
        }
        if let Some(url) = overrides.upstream_url.as_ref() {
            self.demo.upstream_url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            cache,
            demo,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            cache: build_cache_settings(cache)?,
            demo: build_demo_settings(demo)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid("server.port", "port must be greater than zero"));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let expires_in_ms = cache.expires_in_ms.unwrap_or(DEFAULT_EXPIRES_IN_MS);

    let privacy = match cache.privacy {
        Some(value) => value
            .parse::<Privacy>()
            .map_err(|err| LoadError::invalid("cache.privacy", err.to_string()))?,
        None => Privacy::Default,
    };

    let cache_name = cache.cache_name.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let jitter_floor = cache.jitter_floor.unwrap_or(DEFAULT_JITTER_FLOOR);
    if !(0.0..=1.0).contains(&jitter_floor) {
        return Err(LoadError::invalid("cache.jitter_floor", "must be within 0.0..=1.0"));
    }

    let default_store = StoreSpec {
        capacity: non_zero_usize(
            cache.default_capacity.unwrap_or(DEFAULT_STORE_CAPACITY),
            "cache.default_capacity",
        )?,
        expires_in_ms,
    };

    let stores = cache
        .stores
        .into_iter()
        .map(|(name, store)| {
            let capacity = non_zero_usize(
                store.capacity.unwrap_or(DEFAULT_STORE_CAPACITY),
                format!("cache.stores.{name}.capacity"),
            )?;
            let spec = StoreSpec {
                capacity,
                expires_in_ms: store.expires_in_ms.unwrap_or(expires_in_ms),
            };
            Ok((name, spec))
        })
        .collect::<Result<BTreeMap<_, _>, LoadError>>()?;

    Ok(CacheSettings {
        expires_in_ms,
        privacy,
        cache_name,
        jitter_floor,
        default_store,
        stores,
    })
}

fn build_demo_settings(demo: RawDemoSettings) -> Result<DemoSettings, LoadError> {
    let upstream_url = demo.upstream_url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });
    if let Some(url) = upstream_url.as_deref() {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(LoadError::invalid(
                "demo.upstream_url",
                format!("`{url}` is not an http(s) URL"),
            ));
        }
    }

    let timeout_secs = demo
        .upstream_timeout_seconds
        .unwrap_or(DEFAULT_UPSTREAM_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "demo.upstream_timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(DemoSettings {
        upstream_url,
        upstream_timeout: Duration::from_secs(timeout_secs),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    expires_in_ms: Option<u64>,
    privacy: Option<String>,
    cache_name: Option<String>,
    jitter_floor: Option<f64>,
    default_capacity: Option<usize>,
    stores: BTreeMap<String, RawStoreSettings>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStoreSettings {
    capacity: Option<usize>,
    expires_in_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDemoSettings {
    upstream_url: Option<String>,
    upstream_timeout_seconds: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_usize(value: usize, key: impl Into<String>) -> Result<usize, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(value)
}
