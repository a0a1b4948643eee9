//! Chunked upload through base64 appends

use super::{Connection, read_chunk};
use crate::error::{Error, Result};
use crate::types::TransferSummary;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use std::path::Path;

impl Connection {
    /// Copy a local file to `remote_path` inside the guest
    ///
    /// The file is read in blocks of
    /// [`upload_chunk_size`](crate::config::TransferConfig::upload_chunk_size)
    /// bytes. Each block is sent, base64 encoded and `\r\n` terminated, as
    /// standard input to one remote append command. Blocks go strictly in
    /// file order, one command at a time. An empty source still creates the
    /// destination.
    ///
    /// # Partial transfers
    ///
    /// There is no atomicity across chunks. If a chunk fails, the chunks
    /// before it stay appended to the remote file and nothing is rolled back.
    ///
    /// The upload appends: it never truncates the destination. Uploading to
    /// a non-empty file, or re-running a failed upload, therefore duplicates
    /// content. Remove or truncate the destination first if that matters.
    ///
    /// # Errors
    ///
    /// - [`Error::SourceNotFound`] if `local_path` is not a regular file; no
    ///   request is sent in that case
    /// - [`Error::RemoteCommand`] if an append exits non-zero, naming the
    ///   chunk and its offset
    /// - transport, authentication, poll and cancellation errors unchanged
    pub async fn put_file(
        &self,
        local_path: impl AsRef<Path>,
        remote_path: &str,
    ) -> Result<TransferSummary> {
        let local_path = local_path.as_ref();
        let is_file = tokio::fs::metadata(local_path)
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false);
        if !is_file {
            return Err(Error::SourceNotFound {
                path: local_path.to_path_buf(),
            });
        }
        self.ensure_open(None)?;

        let escaped = self.encoder.prepare_path(remote_path);
        tracing::info!(
            target_vm = %self.target,
            local = %local_path.display(),
            remote = %escaped,
            "PUT"
        );

        let append = self.encoder.append_script(&escaped);
        let mut file = tokio::fs::File::open(local_path).await?;
        let mut buf = vec![0u8; self.transfer.upload_chunk_size()];
        let mut summary = TransferSummary::default();

        loop {
            let n = read_chunk(&mut file, &mut buf).await?;
            if n == 0 {
                break;
            }

            let mut payload = STANDARD.encode(&buf[..n]).into_bytes();
            payload.extend_from_slice(b"\r\n");

            let output = self.run_script(&append, Some(&payload), true).await?;
            if !output.success() {
                return Err(Error::RemoteCommand {
                    operation: format!(
                        "appending chunk {} (offset {}) to {remote_path}",
                        summary.chunks, summary.bytes
                    ),
                    exit_code: output.exit_code,
                    stderr: output.stderr_text(),
                });
            }

            tracing::debug!(chunk = summary.chunks, offset = summary.bytes, bytes = n, "PUT chunk");
            summary.bytes += n as u64;
            summary.chunks += 1;

            if n < buf.len() {
                break;
            }
        }

        if summary.chunks == 0 {
            let output = self
                .run_script(&self.encoder.create_script(&escaped), None, true)
                .await?;
            if !output.success() {
                return Err(Error::RemoteCommand {
                    operation: format!("creating empty file {remote_path}"),
                    exit_code: output.exit_code,
                    stderr: output.stderr_text(),
                });
            }
        }

        tracing::info!(
            target_vm = %self.target,
            remote = %escaped,
            bytes = summary.bytes,
            chunks = summary.chunks,
            "PUT complete"
        );
        Ok(summary)
    }
}
