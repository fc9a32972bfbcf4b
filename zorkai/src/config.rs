use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Key sent when no credential is configured (local OpenAI-compatible servers ignore it).
pub const PLACEHOLDER_API_KEY: &str = "not-needed";

const BASE_URL_VARS: [&str; 2] = ["ZORKAI_BASE_URL", "CLIENT_BASE_URL"];
const API_KEY_VARS: [&str; 2] = ["ZORKAI_API_KEY", "CLIENT_API_KEY"];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Retry, timeout and circuit-breaker settings. Durations are written as
/// seconds (floats allowed) in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    #[serde(with = "secs")]
    pub initial_delay: Duration,
    pub exponential_base: f64,
    #[serde(with = "secs")]
    pub max_delay: Duration,
    pub jitter_factor: f64,
    /// Per-attempt timeout.
    #[serde(rename = "timeout_seconds", with = "secs")]
    pub timeout: Duration,
    pub retry_on_server_error: bool,
    pub retry_on_timeout: bool,
    pub circuit_breaker_enabled: bool,
    #[serde(rename = "circuit_breaker_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(rename = "circuit_breaker_recovery_timeout", with = "secs")]
    pub recovery_timeout: Duration,
    #[serde(rename = "circuit_breaker_success_threshold")]
    pub success_threshold: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_secs(1),
            exponential_base: 2.0,
            max_delay: Duration::from_secs(60),
            jitter_factor: 0.1,
            timeout: Duration::from_secs(120),
            retry_on_server_error: true,
            retry_on_timeout: true,
            circuit_breaker_enabled: true,
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(300),
            success_threshold: 2,
        }
    }
}

impl RetryPolicy {
    /// Total attempts per call: the initial one plus `max_retries`.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.exponential_base.is_finite() || self.exponential_base < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "exponential_base must be a finite number >= 1, got {}",
                self.exponential_base
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::Invalid(format!(
                "jitter_factor must be within [0, 1], got {}",
                self.jitter_factor
            )));
        }
        if self.initial_delay > self.max_delay {
            return Err(ConfigError::Invalid(format!(
                "initial_delay ({:?}) exceeds max_delay ({:?})",
                self.initial_delay, self.max_delay
            )));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::Invalid("timeout_seconds must be positive".into()));
        }
        if self.circuit_breaker_enabled && (self.failure_threshold == 0 || self.success_threshold == 0)
        {
            return Err(ConfigError::Invalid(
                "circuit breaker thresholds must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Gateway config
// ---------------------------------------------------------------------------

fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_headers() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("X-Title".to_string(), "ZorkGPT".to_string()),
        ("HTTP-Referer".to_string(), "https://zorkgpt.com".to_string()),
    ])
}

/// Endpoint, credential and policy for one gateway instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Application-identifying headers sent with every request.
    #[serde(default = "default_headers")]
    pub default_headers: BTreeMap<String, String>,

    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            default_headers: default_headers(),
            retry: RetryPolicy::default(),
        }
    }
}

impl GatewayConfig {
    /// The default config location (~/.zorkai/config.json).
    pub fn default_path() -> PathBuf {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        home.join(".zorkai").join("config.json")
    }

    /// Load from a JSON file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load the default file, apply process environment overrides and validate.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self::load(&Self::default_path())?.with_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Override endpoint and key from environment-style lookups.
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let first = |names: &[&str]| {
            names
                .iter()
                .filter_map(|name| lookup(name))
                .map(|v| v.trim().to_string())
                .find(|v| !v.is_empty())
        };
        if let Some(url) = first(&BASE_URL_VARS) {
            self.base_url = url;
        }
        if let Some(key) = first(&API_KEY_VARS) {
            self.api_key = Some(key);
        }
        self
    }

    /// The bearer token to send.
    pub fn api_key(&self) -> &str {
        self.api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .unwrap_or(PLACEHOLDER_API_KEY)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let parsed = url::Url::parse(&self.base_url)
            .map_err(|e| ConfigError::Invalid(format!("base_url {:?}: {}", self.base_url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid(format!(
                "base_url must be http(s), got {}",
                parsed.scheme()
            )));
        }
        self.retry.validate()
    }
}

/// Serde adapter: `Duration` as a (possibly fractional) number of seconds.
mod secs {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs)
            .map_err(|e| D::Error::custom(format!("invalid duration {secs}: {e}")))
    }
}
