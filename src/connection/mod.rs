//! Command execution and file transfer over the guest agent
//!
//! A [`Connection`] owns one API client, one shell encoder and the target
//! guest. Its operations are split by concern:
//! - [`exec`] - submit a command and poll exec-status until it exits
//! - [`upload`] - append a local file to a remote one chunk by chunk
//! - [`download`] - rebuild a remote file from bounded offset reads
//!
//! Every operation runs its requests strictly one after another. A transfer
//! owns the connection for its duration; nothing is pipelined.

mod download;
mod exec;
mod upload;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use crate::client::{ApiClient, ProxmoxClient};
use crate::config::{Config, PollConfig, TransferConfig};
use crate::encoder::{self, CommandEncoder};
use crate::error::Result;
use crate::types::RemoteTarget;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;

/// Connection to one guest through the Proxmox guest agent
///
/// # Example
///
/// ```no_run
/// use pve_guest_exec::{ApiConfig, Config, Connection, RemoteTarget};
///
/// # async fn example() -> pve_guest_exec::Result<()> {
/// let config = Config::new(ApiConfig::from_env()?, RemoteTarget::new("pve1", 104));
/// let conn = Connection::new(config)?;
/// conn.ping().await?;
///
/// let out = conn.exec_command("Get-Date", None).await?;
/// println!("{}", out.stdout_text());
///
/// conn.put_file("setup.ps1", r"C:\Windows\Temp\setup.ps1").await?;
/// conn.fetch_file(r"C:\Windows\Temp\setup.log", "setup.log").await?;
/// conn.close();
/// # Ok(())
/// # }
/// ```
pub struct Connection {
    client: Arc<dyn ApiClient>,
    encoder: Arc<dyn CommandEncoder>,
    target: RemoteTarget,
    transfer: TransferConfig,
    poll: PollConfig,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("target", &self.target)
            .field("encoder", &self.encoder.name())
            .field("transfer", &self.transfer)
            .field("poll", &self.poll)
            .field("closed", &self.cancel.is_cancelled())
            .finish()
    }
}

impl Connection {
    /// Connect with a [`ProxmoxClient`] and the encoder for `config.shell`
    ///
    /// No request is made; use [`ping`](Self::ping) to check the agent.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let client = ProxmoxClient::new(&config.api, config.retry.clone())?;
        let encoder = encoder::for_dialect(config.shell);
        Self::with_parts(config, Arc::new(client), encoder)
    }

    /// Connect with a caller-supplied API client and encoder
    ///
    /// `config.api`, `config.retry` and `config.shell` are not used here;
    /// they only matter to [`Connection::new`].
    pub fn with_parts(
        config: Config,
        client: Arc<dyn ApiClient>,
        encoder: Arc<dyn CommandEncoder>,
    ) -> Result<Self> {
        config.validate()?;
        tracing::debug!(
            target_vm = %config.target,
            encoder = encoder.name(),
            buffer_size = config.transfer.buffer_size,
            "connection configured"
        );
        Ok(Self {
            client,
            encoder,
            target: config.target,
            transfer: config.transfer,
            poll: config.poll,
            cancel: CancellationToken::new(),
        })
    }

    /// The guest this connection talks to
    pub fn target(&self) -> &RemoteTarget {
        &self.target
    }

    /// The shell encoder in use
    pub fn encoder(&self) -> &dyn CommandEncoder {
        self.encoder.as_ref()
    }

    /// Bytes per download window; upload chunks are capped lower, see
    /// [`TransferConfig::upload_chunk_size`]
    pub fn buffer_size(&self) -> usize {
        self.transfer.buffer_size
    }

    /// Check that the guest agent responds
    pub async fn ping(&self) -> Result<()> {
        self.ensure_open(None)?;
        self.client.post(&self.target.ping_path(), &[]).await?;
        tracing::debug!(target_vm = %self.target, "guest agent answered ping");
        Ok(())
    }

    /// Stop all current and future operations on this connection
    ///
    /// A command that is being polled stops with `Error::Cancelled`; the
    /// process it started keeps running inside the guest.
    pub fn close(&self) {
        if !self.cancel.is_cancelled() {
            tracing::debug!(target_vm = %self.target, "closing connection");
        }
        self.cancel.cancel();
    }

    /// Whether [`close`](Self::close) has been called or the token cancelled
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The token [`close`](Self::close) cancels
    ///
    /// Cancelling it from another task has the same effect as `close`.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn ensure_open(&self, pid: Option<i64>) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(crate::Error::Cancelled { pid });
        }
        Ok(())
    }
}

/// Fill `buf` from `reader`, stopping early only at end of input
async fn read_chunk<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
