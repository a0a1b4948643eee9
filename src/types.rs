//! Core types for pve-guest-exec

use serde::{Deserialize, Deserializer, Serialize};

/// The guest a connection talks to: a VM on a specific Proxmox node
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteTarget {
    /// Proxmox node that hosts the VM (e.g., "pve1")
    pub node: String,
    /// VM identifier
    pub vmid: u32,
}

impl RemoteTarget {
    /// Create a new RemoteTarget
    pub fn new(node: impl Into<String>, vmid: u32) -> Self {
        Self {
            node: node.into(),
            vmid,
        }
    }

    fn agent_path(&self, endpoint: &str) -> String {
        format!("nodes/{}/qemu/{}/agent/{}", self.node, self.vmid, endpoint)
    }

    /// API path used to submit a command
    pub fn exec_path(&self) -> String {
        self.agent_path("exec")
    }

    /// API path used to poll a submitted command
    pub fn exec_status_path(&self) -> String {
        self.agent_path("exec-status")
    }

    /// API path used to check that the agent is responding
    pub fn ping_path(&self) -> String {
        self.agent_path("ping")
    }
}

impl std::fmt::Display for RemoteTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.node, self.vmid)
    }
}

/// Process handle returned by the guest agent when a command is submitted
///
/// Deliberately neither `Clone` nor `Copy`: the poll loop takes it by value,
/// so a handle cannot be polled again once its process has been seen exiting.
#[derive(Debug, PartialEq, Eq)]
pub struct ExecHandle {
    pid: i64,
}

impl ExecHandle {
    /// Wrap a pid returned by the exec endpoint
    pub fn new(pid: i64) -> Self {
        Self { pid }
    }

    /// The remote process identifier
    pub fn pid(&self) -> i64 {
        self.pid
    }
}

/// Normalized result of one remote command
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecOutput {
    /// Exit code (1 when the agent did not report one)
    pub exit_code: i64,
    /// Standard output
    pub stdout: Vec<u8>,
    /// Standard error, with shell diagnostics already decoded
    pub stderr: Vec<u8>,
    /// The agent cut standard output short
    pub stdout_truncated: bool,
}

impl ExecOutput {
    /// Whether the command exited with code 0
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Standard output as text, lossily decoded
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Standard error as text, lossily decoded
    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Body of an exec-status response
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ExecStatus {
    /// Whether the process has finished
    #[serde(deserialize_with = "bool_or_int")]
    pub exited: bool,
    /// Exit code, present once exited
    #[serde(default)]
    pub exitcode: Option<i64>,
    /// Captured standard output
    #[serde(default)]
    pub out_data: Option<String>,
    /// Captured standard error
    #[serde(default)]
    pub err_data: Option<String>,
    /// The agent cut standard output short
    #[serde(default, deserialize_with = "opt_bool_or_int")]
    pub out_truncated: Option<bool>,
    /// The agent cut standard error short
    #[serde(default, deserialize_with = "opt_bool_or_int")]
    pub err_truncated: Option<bool>,
}

// The agent reports flags as JSON booleans, Proxmox sometimes as 0/1.
#[derive(Deserialize)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Int(i64),
}

impl From<Flag> for bool {
    fn from(flag: Flag) -> Self {
        match flag {
            Flag::Bool(b) => b,
            Flag::Int(i) => i != 0,
        }
    }
}

fn bool_or_int<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Flag::deserialize(deserializer)?.into())
}

fn opt_bool_or_int<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Flag>::deserialize(deserializer)?.map(Into::into))
}

/// States of the exec-status poll loop
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecState {
    /// Command accepted, pid assigned
    Submitted,
    /// Waiting for the process to exit
    Polling,
    /// Process exited and its output was collected
    Exited,
    /// Poll deadline reached before the process exited
    TimedOut,
    /// Connection closed or caller cancelled
    Cancelled,
    /// Transport or protocol failure while polling
    Failed,
}

impl ExecState {
    /// Whether the poll loop stops in this state
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecState::Submitted | ExecState::Polling)
    }
}

impl std::fmt::Display for ExecState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecState::Submitted => "submitted",
            ExecState::Polling => "polling",
            ExecState::Exited => "exited",
            ExecState::TimedOut => "timed_out",
            ExecState::Cancelled => "cancelled",
            ExecState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One bounded read of a remote file
///
/// The offset only moves forward, by the number of bytes the guest actually
/// returned for the previous window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkWindow {
    /// Byte offset into the remote file
    pub offset: u64,
    /// Maximum number of bytes to read
    pub size: usize,
}

impl ChunkWindow {
    /// First window of a transfer
    pub fn start(size: usize) -> Self {
        Self { offset: 0, size }
    }

    /// Window to resume a transfer from `offset`
    pub fn at(offset: u64, size: usize) -> Self {
        Self { offset, size }
    }

    /// Whether `bytes_read` filled the window completely
    pub fn is_full(&self, bytes_read: usize) -> bool {
        bytes_read >= self.size
    }

    /// Move past `bytes_read` bytes
    pub fn advance(&mut self, bytes_read: usize) {
        self.offset += bytes_read as u64;
    }
}

/// What a completed upload or download moved
#[must_use]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransferSummary {
    /// Payload bytes transferred (before base64)
    pub bytes: u64,
    /// Number of remote commands that carried data
    pub chunks: u32,
}
