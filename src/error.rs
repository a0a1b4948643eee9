//! Error types for pve-guest-exec
//!
//! Errors fall into a small number of kinds that callers are expected to
//! react to differently:
//! - configuration and local preconditions (nothing was sent to the guest)
//! - transport and authentication failures from the Proxmox API
//! - remote command failures (non-zero exit inside the guest)
//! - protocol exhaustion and cancellation of the exec-status poll loop

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for pve-guest-exec operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for pve-guest-exec
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "transfer.buffer_size")
        key: Option<String>,
    },

    /// Local upload source is missing or not a regular file
    ///
    /// Raised before any request is sent to the guest.
    #[error("local source {path} does not exist or is not a file")]
    SourceNotFound {
        /// The local path that was checked
        path: PathBuf,
    },

    /// Caller-supplied data the guest agent cannot carry
    ///
    /// Raised before any request is sent to the guest.
    #[error("invalid input: {message}")]
    InvalidInput {
        /// What is wrong with the input
        message: String,
    },

    /// The API rejected our credentials
    #[error("authentication failed (HTTP {status}): {message}")]
    Authentication {
        /// HTTP status code returned by the API
        status: u16,
        /// Reason reported by the API
        message: String,
    },

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The API answered with a non-success status other than an auth failure
    #[error("API error (HTTP {status}): {message}")]
    Api {
        /// HTTP status code returned by the API
        status: u16,
        /// Reason reported by the API
        message: String,
    },

    /// The API answered with a body we could not interpret
    #[error("invalid API response: {0}")]
    InvalidResponse(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A command ran inside the guest and exited non-zero
    #[error("remote command failed with exit code {exit_code} while {operation}: {stderr}")]
    RemoteCommand {
        /// What the command was doing (includes path and offset for transfers)
        operation: String,
        /// Exit code reported by the guest agent
        exit_code: i64,
        /// Remote standard error, decoded to text
        stderr: String,
    },

    /// The guest never reported the process as exited within the poll deadline
    #[error("remote command {pid} did not complete after {polls} polls ({elapsed:?})")]
    PollExhausted {
        /// Process identifier returned by the guest agent
        pid: i64,
        /// Number of exec-status requests issued
        polls: u32,
        /// Time spent polling
        elapsed: Duration,
    },

    /// The connection was closed or the operation was cancelled
    #[error("operation cancelled{}", pid.map(|p| format!(" while polling pid {p}")).unwrap_or_default())]
    Cancelled {
        /// Process that was being polled, if any
        pid: Option<i64>,
    },

    /// A download was requested for a remote directory
    #[error("remote path {path} is a directory")]
    IsDirectory {
        /// Remote path, as given by the caller
        path: String,
    },

    /// A downloaded chunk was not valid base64
    #[error("invalid base64 payload at offset {offset}: {source}")]
    Decode {
        /// Byte offset of the window that failed to decode
        offset: u64,
        /// Underlying decode error
        #[source]
        source: base64::DecodeError,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for a configuration error on a specific key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Whether the error is an authentication failure
    ///
    /// Callers typically prompt for new credentials here rather than retrying.
    pub fn is_auth(&self) -> bool {
        matches!(self, Error::Authentication { .. })
    }

    /// Machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config_error",
            Error::SourceNotFound { .. } => "source_not_found",
            Error::InvalidInput { .. } => "invalid_input",
            Error::Authentication { .. } => "authentication_failed",
            Error::Network(_) => "network_error",
            Error::Api { .. } => "api_error",
            Error::InvalidResponse(_) => "invalid_response",
            Error::Serialization(_) => "serialization_error",
            Error::RemoteCommand { .. } => "remote_command_failed",
            Error::PollExhausted { .. } => "poll_exhausted",
            Error::Cancelled { .. } => "cancelled",
            Error::IsDirectory { .. } => "is_directory",
            Error::Decode { .. } => "decode_error",
            Error::Io(_) => "io_error",
        }
    }
}
