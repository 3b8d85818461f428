//! Configuration management for Gatekeeper.
//!
//! Limiter parameters that are missing or malformed never abort startup:
//! they are replaced by defaults and a warning is logged.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::warn;

use crate::error::{GatekeeperError, Result};
use crate::ratelimit::TierLimits;

/// Service-wide requests per window when unset or invalid.
pub const DEFAULT_GLOBAL_LIMIT: u64 = 15;
/// Per-client requests per window when unset or invalid.
pub const DEFAULT_IP_LIMIT: u64 = 3;
/// Window length when unset or invalid.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);
/// Longest accepted window or purge interval.
pub const MAX_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);
/// Store round-trip deadline when unset or invalid.
pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 500;

/// Environment variable prefix, e.g. `GATEKEEPER__RATE_LIMITING__IP_LIMIT=10`.
pub const ENV_PREFIX: &str = "GATEKEEPER";

/// Main configuration for the Gatekeeper service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatekeeperConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,

    /// Take the client address from `X-Forwarded-For` / `X-Real-IP`
    #[serde(default)]
    pub trust_forwarded_headers: bool,

    /// Key per-client budgets by authenticated identity when one is present
    #[serde(default)]
    pub key_by_identity: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            trust_forwarded_headers: false,
            key_by_identity: false,
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

/// Where counters live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// In process memory
    #[default]
    Local,
    /// In a shared counter store
    Distributed,
}

/// A raw limiter setting as written by the operator.
///
/// Kept loose so that a typo becomes a warning, not a startup failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawSetting {
    /// A bare number
    Int(i64),
    /// Anything written as text, including numbers from environment variables
    Text(String),
    /// Any other value (floats, booleans, lists), always rejected
    Other(serde_json::Value),
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Local or distributed counters
    #[serde(default)]
    pub strategy: Strategy,

    /// Requests per window across all clients
    #[serde(default)]
    pub global_limit: Option<RawSetting>,

    /// Requests per window for one client
    #[serde(default)]
    pub ip_limit: Option<RawSetting>,

    /// Window length, e.g. `"1m"`, `"30s"`, or a number of seconds
    #[serde(default)]
    pub window: Option<RawSetting>,

    /// How often to drop idle per-client windows, e.g. `"5m"`; never if unset
    #[serde(default)]
    pub purge_interval: Option<RawSetting>,

    /// Shared counter store for the distributed strategy
    #[serde(default)]
    pub store: StoreConfig,
}

impl RateLimitingConfig {
    /// Resolve the configured limits, substituting defaults for bad values.
    pub fn tier_limits(&self) -> TierLimits {
        let global = self.global_limit.as_ref();
        let client = self.ip_limit.as_ref();
        TierLimits {
            global_limit: resolve_limit("global_limit", global, DEFAULT_GLOBAL_LIMIT),
            client_limit: resolve_limit("ip_limit", client, DEFAULT_IP_LIMIT),
            window: resolve_window(self.window.as_ref()),
        }
    }

    /// The purge interval, if one is configured and valid.
    pub fn purge_interval(&self) -> Option<Duration> {
        let raw = self.purge_interval.as_ref()?;
        let interval = parse_duration(raw);
        if interval.is_none() {
            warn!(value = ?raw, "Invalid purge interval, idle windows will not be purged");
        }
        interval
    }
}

fn resolve_limit(name: &str, raw: Option<&RawSetting>, default: u64) -> u64 {
    let parsed = match raw {
        None => return default,
        Some(RawSetting::Int(n)) => u64::try_from(*n).ok(),
        Some(RawSetting::Text(s)) => s.trim().parse::<u64>().ok(),
        Some(RawSetting::Other(_)) => None,
    };

    match parsed {
        Some(limit) if limit > 0 => limit,
        _ => {
            warn!(
                setting = name,
                value = ?raw,
                default,
                "Invalid rate limit, using default"
            );
            default
        }
    }
}

fn resolve_window(raw: Option<&RawSetting>) -> Duration {
    let Some(raw) = raw else {
        return DEFAULT_WINDOW;
    };

    parse_duration(raw).unwrap_or_else(|| {
        warn!(
            value = ?raw,
            default = ?DEFAULT_WINDOW,
            "Invalid rate limit window, using default"
        );
        DEFAULT_WINDOW
    })
}

/// A positive duration no longer than [`MAX_WINDOW`]: plain seconds or a
/// duration string.
fn parse_duration(raw: &RawSetting) -> Option<Duration> {
    let parsed = match raw {
        RawSetting::Int(secs) => u64::try_from(*secs).ok().map(Duration::from_secs),
        RawSetting::Text(s) => match duration_str::parse(s.trim()) {
            Ok(duration) => Some(duration),
            Err(e) => {
                warn!(value = %s, error = %e, "Unparseable duration");
                None
            }
        },
        RawSetting::Other(_) => None,
    };

    parsed.filter(|d| !d.is_zero() && *d <= MAX_WINDOW)
}

/// Which counter store backs the distributed strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// A Redis server
    #[default]
    Redis,
    /// Process memory (single node only)
    Memory,
}

/// Shared counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store implementation
    #[serde(default)]
    pub backend: StoreBackend,

    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Prepended to `rate:global` and `rate:ip:<address>`
    #[serde(default)]
    pub key_prefix: String,

    /// Increment and set expiry in one server-side script
    #[serde(default = "default_atomic_expiry")]
    pub atomic_expiry: bool,

    /// Deadline for one store round trip, in milliseconds
    #[serde(default = "default_store_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: default_redis_url(),
            key_prefix: String::new(),
            atomic_expiry: default_atomic_expiry(),
            timeout_ms: default_store_timeout_ms(),
        }
    }
}

impl StoreConfig {
    /// The store deadline, falling back to the default for zero.
    pub fn timeout(&self) -> Duration {
        if self.timeout_ms == 0 {
            warn!(default_ms = DEFAULT_STORE_TIMEOUT_MS, "Zero store timeout, using default");
            return Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS);
        }
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_atomic_expiry() -> bool {
    true
}

fn default_store_timeout_ms() -> u64 {
    DEFAULT_STORE_TIMEOUT_MS
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl GatekeeperConfig {
    /// Load configuration from an optional file plus `GATEKEEPER__*` environment variables.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::with_name(path));
        }
        let env = ::config::Environment::with_prefix(ENV_PREFIX).separator("__");
        builder = builder.add_source(env);

        let config = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| GatekeeperError::Config(e.to_string()))
    }
}
