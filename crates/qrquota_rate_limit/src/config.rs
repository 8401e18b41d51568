//! Configuration structures for quota enforcement.
//!
//! This module provides TOML-based configuration. The configuration system supports:
//! - Bundled defaults (include_str! from qrquota.toml)
//! - User overrides (./qrquota.toml or ~/.config/qrquota/qrquota.toml)
//! - Automatic merging with user values taking precedence

use config::{Config, File, FileFormat};
use qrquota_core::{Limit, TierPolicy, WindowKind, WindowLimit};
use qrquota_error::{ConfigError, QrQuotaError, QrQuotaResult, TierError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, instrument};

/// What a denied request does to the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CountingPolicy {
    /// Every attempt counts, denied ones included.
    ///
    /// A single atomic increment per window decides the request, so there is
    /// no race between concurrent requests of one subject.
    #[default]
    Attempted,
    /// Denied requests are decremented again after the decision.
    ///
    /// Concurrent requests may observe each other's speculative increments
    /// before they are undone, so a burst at the limit can deny slightly more
    /// than strictly necessary.
    Admitted,
}

/// Rate limiter settings.
///
/// ```toml
/// [limiter]
/// key_prefix = "rate_limit"
/// store_timeout_ms = 250
/// counting = "attempted"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LimiterConfig {
    /// Namespace for every counter key in the store
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Deadline for each counter store call in milliseconds
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,

    /// Retry hint given to callers when the store is unavailable, in seconds
    #[serde(default = "default_unavailable_retry_after_secs")]
    pub unavailable_retry_after_secs: u64,

    /// Whether denied requests keep their increments
    #[serde(default)]
    pub counting: CountingPolicy,
}

fn default_key_prefix() -> String {
    qrquota_store::DEFAULT_KEY_PREFIX.to_string()
}

fn default_store_timeout_ms() -> u64 {
    250
}

fn default_unavailable_retry_after_secs() -> u64 {
    1
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
            store_timeout_ms: default_store_timeout_ms(),
            unavailable_retry_after_secs: default_unavailable_retry_after_secs(),
            counting: CountingPolicy::default(),
        }
    }
}

impl LimiterConfig {
    /// Store call deadline.
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// Retry hint for store outages.
    pub fn unavailable_retry_after(&self) -> Duration {
        Duration::from_secs(self.unavailable_retry_after_secs)
    }
}

/// Which counter store backs the limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StoreBackend {
    /// In-process counters, single instance only
    Memory,
    /// Shared Redis counters
    #[default]
    Redis,
}

/// Counter store settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StoreConfig {
    /// Backend selection
    #[serde(default)]
    pub backend: StoreBackend,

    /// Redis connection URL, used by the redis backend
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// How often the memory backend drops expired counters, in seconds
    #[serde(default = "default_purge_interval_secs")]
    pub purge_interval_secs: u64,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_purge_interval_secs() -> u64 {
    qrquota_store::DEFAULT_PURGE_INTERVAL.as_secs()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            redis_url: default_redis_url(),
            purge_interval_secs: default_purge_interval_secs(),
        }
    }
}

impl StoreConfig {
    /// Period of the memory backend's expired-counter purge.
    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs)
    }
}

/// HTTP enforcement service settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Only paths under this prefix are metered
    #[serde(default = "default_metered_prefix")]
    pub metered_prefix: String,

    /// Tier applied to requests without an authenticated subject
    #[serde(default = "default_anonymous_tier")]
    pub anonymous_tier: String,

    /// Path prefixes never metered
    #[serde(default)]
    pub excluded_paths: Vec<String>,

    /// Count each request path separately instead of one budget per subject
    #[serde(default)]
    pub scope_by_path: bool,

    /// Log filter when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON log lines
    #[serde(default)]
    pub json_logs: bool,
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_metered_prefix() -> String {
    "/api/".to_string()
}

fn default_anonymous_tier() -> String {
    "free".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            metered_prefix: default_metered_prefix(),
            anonymous_tier: default_anonymous_tier(),
            excluded_paths: Vec::new(),
            scope_by_path: false,
            log_level: default_log_level(),
            json_logs: false,
        }
    }
}

/// Window limits of one tier as written in configuration.
///
/// Omitted windows are not metered for the tier; `-1` meters the window
/// without ever denying.
///
/// ```toml
/// [tiers.free]
/// description = "Free tier with basic rate limits for personal use"
/// minute = 10
/// hour = 100
/// day = 1000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct TierConfig {
    /// Human readable summary
    #[serde(default)]
    pub description: String,

    /// Requests per UTC minute
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minute: Option<Limit>,

    /// Requests per UTC hour
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hour: Option<Limit>,

    /// Requests per UTC day
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<Limit>,

    /// Requests per UTC calendar month
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub month: Option<Limit>,
}

impl TierConfig {
    /// Build the validated policy for tier `name`.
    ///
    /// # Errors
    ///
    /// Returns a tier error if no window is configured.
    pub fn to_policy(&self, name: &str) -> Result<TierPolicy, TierError> {
        let windows = [
            (WindowKind::Minute, self.minute),
            (WindowKind::Hour, self.hour),
            (WindowKind::Day, self.day),
            (WindowKind::Month, self.month),
        ];
        let limits = windows
            .into_iter()
            .filter_map(|(kind, limit)| limit.map(|limit| WindowLimit::new(kind, limit)));
        TierPolicy::new(name, self.description.clone(), limits)
    }
}

/// Top-level qrquota configuration.
///
/// Loads configuration from TOML files with a precedence system:
/// 1. Bundled defaults (include_str! from qrquota.toml)
/// 2. User override (~/.config/qrquota/qrquota.toml, then ./qrquota.toml)
///
/// # Example
///
/// ```no_run
/// use qrquota_rate_limit::QuotaConfig;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = QuotaConfig::load()?;
/// let free = &config.tiers["free"];
/// println!("free tier per-minute limit: {:?}", free.minute);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Default)]
pub struct QuotaConfig {
    /// Rate limiter settings
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Counter store settings
    #[serde(default)]
    pub store: StoreConfig,

    /// HTTP service settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Tier name to window limits
    #[serde(default)]
    pub tiers: BTreeMap<String, TierConfig>,
}

/// Bundled default configuration
const DEFAULT_CONFIG: &str = include_str!("../../../qrquota.toml");

impl QuotaConfig {
    /// Load configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn from_file(path: impl AsRef<std::path::Path>) -> QrQuotaResult<Self> {
        debug!("Loading configuration from file");

        Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()
            .map_err(|e| {
                QrQuotaError::from(ConfigError::new(format!(
                    "Failed to read configuration from {}: {}",
                    path.as_ref().display(),
                    e
                )))
            })?
            .try_deserialize()
            .map_err(|e| {
                QrQuotaError::from(ConfigError::new(format!(
                    "Failed to parse configuration: {}",
                    e
                )))
            })
    }

    /// Parse configuration from a TOML string, without defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not valid configuration.
    pub fn from_toml_str(toml: &str) -> QrQuotaResult<Self> {
        Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .and_then(Config::try_deserialize)
            .map_err(|e| {
                QrQuotaError::from(ConfigError::new(format!(
                    "Failed to parse configuration: {}",
                    e
                )))
            })
    }

    /// The bundled defaults alone, ignoring user files.
    ///
    /// # Errors
    ///
    /// Returns an error only if the bundled file is malformed.
    pub fn bundled() -> QrQuotaResult<Self> {
        Self::from_toml_str(DEFAULT_CONFIG)
    }

    /// Load configuration with precedence: user override > bundled default.
    ///
    /// Configuration sources in order of precedence (later sources override earlier):
    /// 1. Bundled defaults (qrquota.toml shipped with the library)
    /// 2. User config in home directory (~/.config/qrquota/qrquota.toml)
    /// 3. User config in current directory (./qrquota.toml)
    ///
    /// User config files are optional and will be silently skipped if not found.
    #[instrument]
    pub fn load() -> QrQuotaResult<Self> {
        debug!("Loading configuration with precedence: current dir > home dir > bundled defaults");

        let mut builder = Config::builder()
            // Start with bundled defaults
            .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml));

        // Add user config from home directory (optional)
        if let Some(home) = dirs::home_dir() {
            let home_config = home.join(".config/qrquota/qrquota.toml");
            builder = builder.add_source(File::from(home_config).required(false));
        }

        // Add user config from current directory (optional, highest precedence)
        builder = builder.add_source(File::with_name("qrquota").required(false));

        builder
            .build()
            .map_err(|e| {
                QrQuotaError::from(ConfigError::new(format!(
                    "Failed to build configuration: {}",
                    e
                )))
            })?
            .try_deserialize()
            .map_err(|e| {
                QrQuotaError::from(ConfigError::new(format!(
                    "Failed to parse configuration: {}",
                    e
                )))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_config_to_policy_orders_windows() {
        let tier = TierConfig {
            description: "metered monthly".to_string(),
            minute: None,
            hour: Limit::finite(50),
            day: None,
            month: Limit::finite(5_000),
        };
        let policy = tier.to_policy("starter").unwrap();
        let kinds: Vec<_> = policy.limits().iter().map(|l| l.kind).collect();
        assert_eq!(kinds, vec![WindowKind::Hour, WindowKind::Month]);
    }

    #[test]
    fn test_tier_config_without_windows_is_rejected() {
        assert!(TierConfig::default().to_policy("hollow").is_err());
    }

    #[test]
    fn test_limiter_defaults() {
        let limiter = LimiterConfig::default();
        assert_eq!(limiter.key_prefix, "rate_limit");
        assert_eq!(limiter.store_timeout(), Duration::from_millis(250));
        assert_eq!(limiter.counting, CountingPolicy::Attempted);
    }
}
