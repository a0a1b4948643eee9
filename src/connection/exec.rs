//! Command submission and exec-status polling

use super::Connection;
use crate::config::MAX_INPUT_DATA_LEN;
use crate::error::{Error, Result};
use crate::types::{ExecHandle, ExecOutput, ExecState, ExecStatus};
use serde_json::Value;
use tokio::time::Instant;

impl Connection {
    /// Run a script inside the guest and wait for it to exit
    ///
    /// The script is encoded for the connection's shell dialect. `input`, if
    /// given, is delivered to the process as standard input.
    ///
    /// A non-zero exit code is not an error here: it is returned in
    /// [`ExecOutput::exit_code`] for the caller to judge. Errors are transport
    /// and authentication failures, [`Error::PollExhausted`] when the process
    /// has not exited within `poll.timeout`, and [`Error::Cancelled`].
    ///
    /// The agent carries `input` as a string, so it must be valid UTF-8 and
    /// at most [`MAX_INPUT_DATA_LEN`] bytes; otherwise
    /// [`Error::InvalidInput`] is returned and nothing is submitted.
    pub async fn exec_command(&self, script: &str, input: Option<&[u8]>) -> Result<ExecOutput> {
        self.run_script(script, input, false).await
    }

    /// Submit an already encoded command line as-is
    pub async fn exec_raw(&self, command: &str, input: Option<&[u8]>) -> Result<ExecOutput> {
        self.ensure_open(None)?;
        let handle = self.submit(command, input).await?;
        let status = self.wait(handle).await?;
        Ok(self.normalize(status))
    }

    pub(super) async fn run_script(
        &self,
        script: &str,
        input: Option<&[u8]>,
        preserve_rc: bool,
    ) -> Result<ExecOutput> {
        let command = self.encoder.encode_script(script, preserve_rc);
        tracing::trace!(target_vm = %self.target, %script, "EXEC script");
        self.exec_raw(&command, input).await
    }

    async fn submit(&self, command: &str, input: Option<&[u8]>) -> Result<ExecHandle> {
        let mut params = vec![("command", command.to_string())];
        if let Some(input) = input {
            params.push(("input-data", input_data(input)?.to_string()));
        }

        let data = self.client.post(&self.target.exec_path(), &params).await?;
        let pid = data
            .get("pid")
            .and_then(Value::as_i64)
            .ok_or_else(|| Error::InvalidResponse(format!("exec response without pid: {data}")))?;

        tracing::debug!(
            target_vm = %self.target,
            pid,
            command_len = command.len(),
            input_len = input.map_or(0, <[u8]>::len),
            state = %ExecState::Submitted,
            "EXEC"
        );
        Ok(ExecHandle::new(pid))
    }

    /// Poll until the process exits, the deadline passes, or the connection closes
    async fn wait(&self, handle: ExecHandle) -> Result<ExecStatus> {
        let pid = handle.pid();
        let started = Instant::now();
        let deadline = started + self.poll.timeout;
        let mut polls: u32 = 0;

        loop {
            polls += 1;
            let polled = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                result = self.poll_once(pid) => Some(result),
            };

            let status = match polled {
                None => {
                    self.log_abandoned(pid, polls, ExecState::Cancelled);
                    return Err(Error::Cancelled { pid: Some(pid) });
                }
                Some(Err(e)) => {
                    tracing::debug!(pid, polls, state = %ExecState::Failed, error = %e, "EXEC polling failed");
                    return Err(e);
                }
                Some(Ok(status)) => status,
            };

            if status.exited {
                tracing::debug!(
                    pid,
                    polls,
                    elapsed_ms = started.elapsed().as_millis(),
                    state = %ExecState::Exited,
                    "EXEC finished"
                );
                return Ok(status);
            }
            tracing::trace!(pid, polls, state = %ExecState::Polling, "EXEC polling");

            let now = Instant::now();
            if now >= deadline {
                self.log_abandoned(pid, polls, ExecState::TimedOut);
                return Err(Error::PollExhausted {
                    pid,
                    polls,
                    elapsed: now - started,
                });
            }

            let pause = self.poll.interval.min(deadline - now);
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    self.log_abandoned(pid, polls, ExecState::Cancelled);
                    return Err(Error::Cancelled { pid: Some(pid) });
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }

    async fn poll_once(&self, pid: i64) -> Result<ExecStatus> {
        let data = self
            .client
            .get(&self.target.exec_status_path(), &[("pid", pid.to_string())])
            .await?;
        Ok(serde_json::from_value(data)?)
    }

    // The agent offers no way to kill an exec'd process, so stopping early
    // leaves it running; say so loudly.
    fn log_abandoned(&self, pid: i64, polls: u32, state: ExecState) {
        tracing::warn!(
            target_vm = %self.target,
            pid,
            polls,
            state = %state,
            "stopped polling before the remote process exited; it may still be running"
        );
    }

    fn normalize(&self, status: ExecStatus) -> ExecOutput {
        if status.out_truncated == Some(true) || status.err_truncated == Some(true) {
            tracing::warn!(
                target_vm = %self.target,
                out_truncated = status.out_truncated.unwrap_or(false),
                err_truncated = status.err_truncated.unwrap_or(false),
                "guest agent truncated command output"
            );
        }

        let stdout = status.out_data.unwrap_or_default().into_bytes();
        let mut stderr = status.err_data.unwrap_or_default().into_bytes();
        if let Some(marker) = self.encoder.diagnostic_marker()
            && stderr.starts_with(marker)
        {
            stderr = self.encoder.decode_diagnostics(&stderr);
        }

        ExecOutput {
            exit_code: status.exitcode.unwrap_or(1),
            stdout,
            stderr,
            stdout_truncated: status.out_truncated.unwrap_or(false),
        }
    }
}

fn input_data(input: &[u8]) -> Result<&str> {
    let text = std::str::from_utf8(input).map_err(|e| Error::InvalidInput {
        message: format!("command input is not valid UTF-8: {e}"),
    })?;
    if text.len() > MAX_INPUT_DATA_LEN {
        return Err(Error::InvalidInput {
            message: format!(
                "command input is {} bytes, the guest agent accepts at most {MAX_INPUT_DATA_LEN}",
                text.len()
            ),
        });
    }
    Ok(text)
}
