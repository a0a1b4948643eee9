//! Configuration types for pve-guest-exec

use crate::error::{Error, Result};
use crate::types::RemoteTarget;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Largest accepted transfer buffer
///
/// Bounds the download window, whose base64 text travels in one exec-status
/// response. Upload chunks are further capped at [`MAX_UPLOAD_CHUNK`].
pub const MAX_BUFFER_SIZE: usize = 4 * 1024 * 1024;

/// Longest `input-data` string the exec endpoint accepts
pub const MAX_INPUT_DATA_LEN: usize = 64 * 1024;

/// Largest upload chunk whose base64 line, with its `\r\n`, fits in `input-data`
pub const MAX_UPLOAD_CHUNK: usize = (MAX_INPUT_DATA_LEN - 2) / 4 * 3;

/// Proxmox API endpoint and credentials
#[derive(Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Hostname of the Proxmox API
    pub host: String,

    /// API port (default: 8006)
    #[serde(default = "default_port")]
    pub port: u16,

    /// User the token belongs to, including realm (e.g., "automation@pve")
    pub user: String,

    /// Token name
    pub token: String,

    /// Token value
    pub secret: String,

    /// Verify the server certificate (default: true)
    #[serde(default = "default_true")]
    pub verify_ssl: bool,

    /// Timeout for each individual HTTP request (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,
}

impl ApiConfig {
    /// Build from the `PROXMOX_*` environment variables
    ///
    /// Reads `PROXMOX_HOST`, `PROXMOX_USER`, `PROXMOX_TOKEN` and
    /// `PROXMOX_SECRET` (all required) plus the optional `PROXMOX_PORT` and
    /// `PROXMOX_VERIFY_SSL`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| Error::config(key, format!("{key} is not set")))
        };

        let port = match lookup("PROXMOX_PORT") {
            Some(raw) => raw
                .parse()
                .map_err(|_| Error::config("PROXMOX_PORT", format!("invalid port: {raw}")))?,
            None => default_port(),
        };

        let verify_ssl = match lookup("PROXMOX_VERIFY_SSL") {
            Some(raw) => parse_bool(&raw).ok_or_else(|| {
                Error::config("PROXMOX_VERIFY_SSL", format!("invalid boolean: {raw}"))
            })?,
            None => true,
        };

        Ok(Self {
            host: required("PROXMOX_HOST")?,
            port,
            user: required("PROXMOX_USER")?,
            token: required("PROXMOX_TOKEN")?,
            secret: required("PROXMOX_SECRET")?,
            verify_ssl,
            request_timeout: default_request_timeout(),
        })
    }

    /// Base URL every API path is resolved against
    pub fn base_url(&self) -> String {
        format!("https://{}:{}/api2/json/", self.host, self.port)
    }

    /// Value of the `Authorization` header
    pub fn auth_header(&self) -> String {
        format!("PVEAPIToken={}!{}={}", self.user, self.token, self.secret)
    }
}

// Keep the token secret out of logs.
impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("token", &self.token)
            .field("secret", &"<redacted>")
            .field("verify_ssl", &self.verify_ssl)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Remote shell dialect spoken by the guest
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShellDialect {
    /// Windows PowerShell (default)
    #[default]
    PowerShell,
    /// POSIX `sh` with coreutils
    Posix,
}

/// File transfer settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Bytes per download window, and per upload chunk up to
    /// [`MAX_UPLOAD_CHUNK`] (default: 32 KiB)
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

impl TransferConfig {
    /// Bytes per upload chunk
    pub fn upload_chunk_size(&self) -> usize {
        self.buffer_size.min(MAX_UPLOAD_CHUNK)
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
        }
    }
}

/// Exec-status polling settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PollConfig {
    /// Delay between exec-status requests (default: 100 milliseconds)
    #[serde(default = "default_poll_interval", with = "duration_ms_serde")]
    pub interval: Duration,

    /// Give up on a command after this long (default: 5 minutes)
    #[serde(default = "default_poll_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: default_poll_interval(),
            timeout: default_poll_timeout(),
        }
    }
}

/// Retry configuration for transient failures on idempotent API requests
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 250 milliseconds)
    #[serde(default = "default_initial_delay", with = "duration_ms_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 5 seconds)
    #[serde(default = "default_max_delay", with = "duration_ms_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Main configuration for a [`Connection`](crate::Connection)
///
/// Only `api` and `target` have no defaults.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// API endpoint and credentials
    pub api: ApiConfig,

    /// Guest to connect to
    pub target: RemoteTarget,

    /// Remote shell dialect
    #[serde(default)]
    pub shell: ShellDialect,

    /// File transfer settings
    #[serde(default)]
    pub transfer: TransferConfig,

    /// Exec-status polling settings
    #[serde(default)]
    pub poll: PollConfig,

    /// Retry policy for idempotent API requests
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Config {
    /// Configuration with defaults for everything but endpoint and target
    pub fn new(api: ApiConfig, target: RemoteTarget) -> Self {
        Self {
            api,
            target,
            shell: ShellDialect::default(),
            transfer: TransferConfig::default(),
            poll: PollConfig::default(),
            retry: RetryConfig::default(),
        }
    }

    /// Check settings that would otherwise fail deep inside a transfer
    pub fn validate(&self) -> Result<()> {
        if self.api.host.trim().is_empty() {
            return Err(Error::config("api.host", "host must not be empty"));
        }
        if self.target.node.trim().is_empty() {
            return Err(Error::config("target.node", "node must not be empty"));
        }
        if self.transfer.buffer_size == 0 {
            return Err(Error::config(
                "transfer.buffer_size",
                "buffer size must be positive",
            ));
        }
        if self.transfer.buffer_size > MAX_BUFFER_SIZE {
            return Err(Error::config(
                "transfer.buffer_size",
                format!(
                    "buffer size {} exceeds maximum of {MAX_BUFFER_SIZE}",
                    self.transfer.buffer_size
                ),
            ));
        }
        if self.poll.interval.is_zero() {
            return Err(Error::config(
                "poll.interval",
                "poll interval must be positive",
            ));
        }
        if self.poll.timeout < self.poll.interval {
            return Err(Error::config(
                "poll.timeout",
                "poll timeout must be at least one poll interval",
            ));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(Error::config(
                "retry.backoff_multiplier",
                "backoff multiplier must be at least 1.0",
            ));
        }
        Ok(())
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

// Default value functions
fn default_port() -> u16 {
    8006
}

fn default_true() -> bool {
    true
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_buffer_size() -> usize {
    32 * 1024
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_poll_timeout() -> Duration {
    Duration::from_secs(300) // 5 minutes
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_millis(250)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Millisecond Duration serialization helper
mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
