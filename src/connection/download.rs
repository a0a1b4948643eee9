//! Download through bounded offset reads

use super::Connection;
use crate::encoder::DIR_SENTINEL;
use crate::error::{Error, Result};
use crate::types::{ChunkWindow, TransferSummary};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

impl Connection {
    /// Copy `remote_path` from the guest to a local file
    ///
    /// Reads windows of `transfer.buffer_size` bytes at increasing offsets
    /// until a short or empty read. Bytes land in `<local_path>.part`, which
    /// is renamed over `local_path` once the whole file has arrived. On any
    /// error the `.part` file is removed and `local_path` is left untouched.
    ///
    /// # Errors
    ///
    /// - [`Error::IsDirectory`] if the remote path is a directory; no local
    ///   file is produced
    /// - [`Error::RemoteCommand`] if a read exits non-zero (for example the
    ///   path does not exist), naming the offset
    /// - [`Error::Decode`] or [`Error::InvalidResponse`] for a corrupt or
    ///   truncated window
    /// - transport, authentication, poll and cancellation errors unchanged
    pub async fn fetch_file(
        &self,
        remote_path: &str,
        local_path: impl AsRef<Path>,
    ) -> Result<TransferSummary> {
        let local_path = local_path.as_ref();
        self.ensure_open(None)?;

        let escaped = self.encoder.prepare_path(remote_path);
        tracing::info!(
            target_vm = %self.target,
            remote = %escaped,
            local = %local_path.display(),
            "FETCH"
        );

        let part = part_path(local_path);
        let fetched = async {
            let summary = self.fetch_into(remote_path, &escaped, &part).await?;
            tokio::fs::rename(&part, local_path).await?;
            Ok::<_, Error>(summary)
        }
        .await;

        match fetched {
            Ok(summary) => {
                tracing::info!(
                    target_vm = %self.target,
                    remote = %escaped,
                    bytes = summary.bytes,
                    chunks = summary.chunks,
                    "FETCH complete"
                );
                Ok(summary)
            }
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_file(&part).await
                    && cleanup.kind() != std::io::ErrorKind::NotFound
                {
                    tracing::warn!(path = %part.display(), error = %cleanup, "failed to remove partial download");
                }
                Err(e)
            }
        }
    }

    /// Read one window of a remote file
    ///
    /// Returns the bytes read, which is empty at end of file. Useful to
    /// resume an interrupted download from a known offset.
    ///
    /// `window.size` must be between 1 and `transfer.buffer_size`, otherwise
    /// [`Error::Config`] is returned without contacting the guest.
    pub async fn read_window(&self, remote_path: &str, window: ChunkWindow) -> Result<Vec<u8>> {
        if window.size == 0 || window.size > self.transfer.buffer_size {
            return Err(Error::config(
                "window.size",
                format!(
                    "must be between 1 and the buffer size {}, got {}",
                    self.transfer.buffer_size, window.size
                ),
            ));
        }
        let escaped = self.encoder.prepare_path(remote_path);
        self.read_escaped(remote_path, &escaped, window).await
    }

    async fn fetch_into(
        &self,
        remote_path: &str,
        escaped: &str,
        part: &Path,
    ) -> Result<TransferSummary> {
        let mut file = tokio::fs::File::create(part).await?;
        let mut window = ChunkWindow::start(self.transfer.buffer_size);
        let mut summary = TransferSummary::default();

        loop {
            let data = self.read_escaped(remote_path, escaped, window).await?;
            if data.is_empty() {
                break;
            }

            file.write_all(&data).await?;
            summary.bytes += data.len() as u64;
            summary.chunks += 1;
            tracing::debug!(offset = window.offset, bytes = data.len(), "FETCH window");

            let full = window.is_full(data.len());
            window.advance(data.len());
            if !full {
                break;
            }
        }

        file.flush().await?;
        Ok(summary)
    }

    async fn read_escaped(
        &self,
        remote_path: &str,
        escaped: &str,
        window: ChunkWindow,
    ) -> Result<Vec<u8>> {
        let script = self.encoder.read_window_script(escaped, window);
        let output = self.run_script(&script, None, false).await?;

        if !output.success() {
            return Err(Error::RemoteCommand {
                operation: format!("reading {remote_path} at offset {}", window.offset),
                exit_code: output.exit_code,
                stderr: output.stderr_text(),
            });
        }

        let stdout = output.stdout_text();
        let payload = stdout.trim();
        if payload == DIR_SENTINEL {
            return Err(Error::IsDirectory {
                path: remote_path.to_string(),
            });
        }
        if output.stdout_truncated {
            return Err(Error::InvalidResponse(format!(
                "output for {remote_path} at offset {} was truncated by the guest agent; \
                 use a smaller buffer size",
                window.offset
            )));
        }

        let data = STANDARD.decode(payload).map_err(|source| Error::Decode {
            offset: window.offset,
            source,
        })?;
        if data.len() > window.size {
            return Err(Error::InvalidResponse(format!(
                "read of {remote_path} at offset {} returned {} bytes for a {}-byte window",
                window.offset,
                data.len(),
                window.size
            )));
        }
        Ok(data)
    }
}

fn part_path(local_path: &Path) -> PathBuf {
    let mut name = local_path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}
