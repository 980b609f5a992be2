//! Configuration types for tb-telemetry-migrate.
//!
//! Everything can be set on the command line. An optional YAML settings file
//! supplies connection defaults and the less common knobs (retry tuning,
//! import batch size); command-line values override it.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;

/// Settings file contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MigrationConfig {
    /// ThingsBoard connection.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Retry tuning for every API call.
    #[serde(default)]
    pub retry: RetrySettings,
    /// Export options.
    #[serde(default)]
    pub export: ExportOptions,
    /// Import options.
    #[serde(default)]
    pub import: ImportOptions,
}

/// ThingsBoard connection settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionConfig {
    /// Base URL, e.g. `https://thingsboard.example.com`.
    #[serde(default)]
    pub host: String,
    /// Tenant user name.
    #[serde(default)]
    pub username: String,
    /// Tenant password.
    #[serde(default)]
    pub password: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &"***")
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            username: String::new(),
            password: String::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ConnectionConfig {
    /// Request timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Retry tuning, in plain numbers for the settings file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RetrySettings {
    /// Total attempts per call, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    pub initial_delay_ms: u64,
    /// Cap on any single delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Exponential backoff multiplier.
    pub backoff_multiplier: f64,
    /// Add up to 25% random jitter.
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            initial_delay_ms: policy.initial_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            backoff_multiplier: policy.backoff_multiplier,
            jitter: policy.add_jitter,
        }
    }
}

impl RetrySettings {
    /// Builds the runtime policy with the default retryable-error predicate.
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            backoff_multiplier: self.backoff_multiplier,
            add_jitter: self.jitter,
            ..RetryPolicy::default()
        }
    }
}

/// Export options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ExportOptions {
    /// Maximum records per telemetry request.
    pub chunk_limit: usize,
    /// Window length in minutes.
    pub time_limit_minutes: u32,
    /// Ask the server for typed values instead of strings.
    pub strict_data_types: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            chunk_limit: default_chunk_limit(),
            time_limit_minutes: default_time_limit_minutes(),
            strict_data_types: true,
        }
    }
}

/// Import options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ImportOptions {
    /// Maximum entries per write request.
    pub batch_size: usize,
    /// Log progress every this many entries per device.
    pub log_interval: u64,
    /// Parse and group the file without writing.
    pub dry_run: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            log_interval: default_log_interval(),
            dry_run: false,
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_chunk_limit() -> usize {
    1024
}

fn default_time_limit_minutes() -> u32 {
    60
}

fn default_batch_size() -> usize {
    1024
}

fn default_log_interval() -> u64 {
    100
}

impl MigrationConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        validate_url(&self.connection.host)?;
        if self.connection.username.is_empty() {
            return Err(Error::Config("username cannot be empty".to_string()));
        }
        if self.connection.password.is_empty() {
            return Err(Error::Config("password cannot be empty".to_string()));
        }
        if self.connection.timeout_secs == 0 {
            return Err(Error::Config(
                "timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Config(
                "retry.max_attempts must be greater than 0".to_string(),
            ));
        }
        if self.retry.backoff_multiplier.is_nan() || self.retry.backoff_multiplier < 1.0 {
            return Err(Error::Config(
                "retry.backoff_multiplier must be at least 1.0".to_string(),
            ));
        }
        if self.export.chunk_limit == 0 {
            return Err(Error::Config(
                "chunk_limit must be greater than 0".to_string(),
            ));
        }
        if self.export.time_limit_minutes == 0 {
            return Err(Error::Config(
                "time_limit must be greater than 0".to_string(),
            ));
        }
        if self.import.batch_size == 0 {
            return Err(Error::Config(
                "batch_size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Checks that `url` is an http(s) URL.
pub fn validate_url(url: &str) -> Result<()> {
    if url.is_empty() {
        return Err(Error::Config("host cannot be empty".to_string()));
    }
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(Error::Config(format!(
            "Invalid URL scheme in '{}'. Allowed: http, https",
            url
        )));
    }
    if url.len() < 10 {
        return Err(Error::Config(format!("Invalid URL format: {}", url)));
    }
    Ok(())
}
