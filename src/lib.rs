//! # pve-guest-exec
//!
//! Run commands and move files inside Proxmox VE virtual machines through the
//! QEMU guest agent.
//!
//! The guest agent API has no streams and no push notifications: a command is
//! submitted, then its status is polled until it exits. This crate builds the
//! three operations a remote connection needs on top of that:
//!
//! - **Execute** - submit a script, poll until it exits, return exit code and output
//! - **Upload** - append a local file to a remote one in bounded base64 chunks
//! - **Download** - rebuild a remote file from bounded reads at increasing offsets
//!
//! Everything that depends on the guest's shell (quoting, encoded command
//! lines, the transfer scripts) sits behind [`CommandEncoder`], with
//! implementations for PowerShell and POSIX `sh`.
//!
//! ## Quick Start
//!
//! ```no_run
//! use pve_guest_exec::{ApiConfig, Config, Connection, RemoteTarget, ShellDialect};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let api = ApiConfig::from_env()?;
//!     let mut config = Config::new(api, RemoteTarget::new("pve1", 104));
//!     config.shell = ShellDialect::Posix;
//!
//!     let conn = Connection::new(config)?;
//!     conn.ping().await?;
//!
//!     let out = conn.exec_command("uname -a", None).await?;
//!     println!("exit {}: {}", out.exit_code, out.stdout_text());
//!
//!     conn.put_file("build.tar.gz", "/tmp/build.tar.gz").await?;
//!     conn.fetch_file("/var/log/syslog", "syslog").await?;
//!     Ok(())
//! }
//! ```
//!
//! The library installs no `tracing` subscriber; that is left to the host
//! application.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Proxmox API client
pub mod client;
/// Configuration types
pub mod config;
/// Command execution and file transfer (decomposed into focused submodules)
pub mod connection;
/// Shell dialects for remote scripts
pub mod encoder;
/// Error types
pub mod error;
/// Retry logic with exponential backoff
pub mod retry;
/// Core types
pub mod types;

// Re-export commonly used types
pub use client::{ApiClient, ProxmoxClient};
pub use config::{ApiConfig, Config, PollConfig, RetryConfig, ShellDialect, TransferConfig};
pub use connection::Connection;
pub use encoder::{CommandEncoder, PosixShellEncoder, PowerShellEncoder};
pub use error::{Error, Result};
pub use types::{
    ChunkWindow, ExecHandle, ExecOutput, ExecState, ExecStatus, RemoteTarget, TransferSummary,
};

/// Close a connection when the process receives a termination signal.
///
/// Waits for a signal and then calls [`Connection::close`], which stops any
/// command being polled with [`Error::Cancelled`].
///
/// - **Unix:** listens for SIGTERM and SIGINT.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// Fails with [`Error::Io`] if the signal handlers cannot be registered; the
/// connection is left open in that case.
///
/// # Example
///
/// ```no_run
/// use pve_guest_exec::{ApiConfig, Config, Connection, RemoteTarget, close_on_signal};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::new(ApiConfig::from_env()?, RemoteTarget::new("pve1", 104));
///     let conn = Connection::new(config)?;
///
///     let out = tokio::select! {
///         out = conn.exec_command("Start-Sleep 600", None) => out?,
///         res = close_on_signal(&conn) => {
///             res?;
///             return Ok(());
///         }
///     };
///     println!("{}", out.stdout_text());
///     Ok(())
/// }
/// ```
pub async fn close_on_signal(conn: &Connection) -> Result<()> {
    wait_for_signal().await?;
    conn.close();
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::select! {
        _ = sigterm.recv() => tracing::info!("received SIGTERM, closing connection"),
        _ = sigint.recv() => tracing::info!("received SIGINT, closing connection"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    tracing::info!("received Ctrl+C, closing connection");
    Ok(())
}
