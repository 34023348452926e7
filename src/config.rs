//! Engine configuration: a TOML-deserialized raw struct with all-`Option`
//! fields, validated into a concrete [`EngineConfig`] with defaults applied.

use serde::Deserialize;
use std::time::Duration;

/// As loaded from TOML: every field optional, defaults supplied during
/// validation rather than via `serde(default)`, so a config error can name
/// exactly which field was invalid rather than silently falling back.
#[derive(Debug, Deserialize, Default)]
pub struct RawEngineConfig {
    pub cooldown_ms: Option<u64>,
    pub chunk_timeout_ms: Option<u64>,
    pub reply_timeout_ms: Option<u64>,
    pub per_device_in_flight_cap: Option<u32>,
    pub destination_cache_ttl_ms: Option<u64>,
    pub resubscribe_delay_ms: Option<u64>,
    pub max_resubscribe_attempts: Option<u32>,
    pub resource_list_max_retries: Option<u32>,
    pub payload_size_limit_bytes: Option<usize>,
}

/// Validated engine configuration, ready to hand to the Transaction
/// Manager, Destination Cache, Subscription Manager, and Validation
/// Registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub cooldown: Duration,
    pub chunk_timeout: Duration,
    pub reply_timeout: Duration,
    pub per_device_in_flight_cap: u32,
    pub destination_cache_ttl: Duration,
    pub resubscribe_delay: Duration,
    pub max_resubscribe_attempts: u32,
    pub resource_list_max_retries: u32,
    pub payload_size_limit_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            cooldown: Duration::from_secs(2),
            chunk_timeout: Duration::from_secs(1),
            reply_timeout: Duration::from_secs(3),
            per_device_in_flight_cap: 2,
            destination_cache_ttl: Duration::from_secs(60),
            resubscribe_delay: Duration::from_millis(500),
            max_resubscribe_attempts: 3,
            resource_list_max_retries: 5,
            payload_size_limit_bytes: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("reading config file: {0}")]
    Io(String),
    #[error("parsing config TOML: {0}")]
    Parse(String),
    #[error("per_device_in_flight_cap must be >= 1, got {0}")]
    ZeroInFlightCap(u32),
    #[error("max_resubscribe_attempts must be >= 1, got {0}")]
    ZeroResubscribeAttempts(u32),
    #[error("resource_list_max_retries must be >= 1, got {0}")]
    ZeroResourceListRetries(u32),
    #[error("payload_size_limit_bytes must be >= 1, got {0}")]
    ZeroPayloadSizeLimit(usize),
}

/// Load and validate engine config from a TOML string.
pub fn load_config_from_str(toml_text: &str) -> Result<EngineConfig, ConfigError> {
    let raw = RawEngineConfig::parse(toml_text).map_err(|e| ConfigError::Parse(e.to_string()))?;
    raw.validate()
}

/// Load and validate engine config from a TOML file on disk.
pub fn load_config_from_path(path: &std::path::Path) -> Result<EngineConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;
    load_config_from_str(&text)
}

/// Fluent construction of an [`EngineConfig`] without going through TOML,
/// for hosts that assemble configuration programmatically.
#[derive(Debug, Clone, Default)]
pub struct EngineConfigBuilder {
    raw: RawEngineConfig,
}

impl EngineConfigBuilder {
    pub fn new() -> Self {
        EngineConfigBuilder::default()
    }

    pub fn cooldown(mut self, d: Duration) -> Self {
        self.raw.cooldown_ms = Some(d.as_millis() as u64);
        self
    }

    pub fn chunk_timeout(mut self, d: Duration) -> Self {
        self.raw.chunk_timeout_ms = Some(d.as_millis() as u64);
        self
    }

    pub fn reply_timeout(mut self, d: Duration) -> Self {
        self.raw.reply_timeout_ms = Some(d.as_millis() as u64);
        self
    }

    pub fn per_device_in_flight_cap(mut self, cap: u32) -> Self {
        self.raw.per_device_in_flight_cap = Some(cap);
        self
    }

    pub fn destination_cache_ttl(mut self, d: Duration) -> Self {
        self.raw.destination_cache_ttl_ms = Some(d.as_millis() as u64);
        self
    }

    pub fn resubscribe_delay(mut self, d: Duration) -> Self {
        self.raw.resubscribe_delay_ms = Some(d.as_millis() as u64);
        self
    }

    pub fn max_resubscribe_attempts(mut self, n: u32) -> Self {
        self.raw.max_resubscribe_attempts = Some(n);
        self
    }

    pub fn resource_list_max_retries(mut self, n: u32) -> Self {
        self.raw.resource_list_max_retries = Some(n);
        self
    }

    pub fn payload_size_limit_bytes(mut self, n: usize) -> Self {
        self.raw.payload_size_limit_bytes = Some(n);
        self
    }

    pub fn build(self) -> Result<EngineConfig, ConfigError> {
        self.raw.validate()
    }
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::new()
    }
}

impl RawEngineConfig {
    pub fn parse(toml_text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(toml_text)
    }

    /// Apply defaults for absent fields and reject out-of-range values.
    pub fn validate(self) -> Result<EngineConfig, ConfigError> {
        let defaults = EngineConfig::default();

        let per_device_in_flight_cap = self.per_device_in_flight_cap.unwrap_or(defaults.per_device_in_flight_cap);
        if per_device_in_flight_cap == 0 {
            return Err(ConfigError::ZeroInFlightCap(per_device_in_flight_cap));
        }

        let max_resubscribe_attempts = self
            .max_resubscribe_attempts
            .unwrap_or(defaults.max_resubscribe_attempts);
        if max_resubscribe_attempts == 0 {
            return Err(ConfigError::ZeroResubscribeAttempts(max_resubscribe_attempts));
        }

        let resource_list_max_retries = self
            .resource_list_max_retries
            .unwrap_or(defaults.resource_list_max_retries);
        if resource_list_max_retries == 0 {
            return Err(ConfigError::ZeroResourceListRetries(resource_list_max_retries));
        }

        let payload_size_limit_bytes = self
            .payload_size_limit_bytes
            .unwrap_or(defaults.payload_size_limit_bytes);
        if payload_size_limit_bytes == 0 {
            return Err(ConfigError::ZeroPayloadSizeLimit(payload_size_limit_bytes));
        }

        Ok(EngineConfig {
            cooldown: self.cooldown_ms.map(Duration::from_millis).unwrap_or(defaults.cooldown),
            chunk_timeout: self
                .chunk_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.chunk_timeout),
            reply_timeout: self
                .reply_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.reply_timeout),
            per_device_in_flight_cap,
            destination_cache_ttl: self
                .destination_cache_ttl_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.destination_cache_ttl),
            resubscribe_delay: self
                .resubscribe_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.resubscribe_delay),
            max_resubscribe_attempts,
            resource_list_max_retries,
            payload_size_limit_bytes,
        })
    }
}
