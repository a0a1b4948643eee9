//! Test doubles for the guest agent

use super::Connection;
use crate::client::{ApiClient, Params};
use crate::config::{ApiConfig, Config};
use crate::encoder::{CommandEncoder, DIR_SENTINEL};
use crate::error::{Error, Result};
use crate::types::{ChunkWindow, RemoteTarget};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use reqwest::Method;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub(crate) const NODE: &str = "pve1";
pub(crate) const VMID: u32 = 100;

/// Config with a fast poll interval and the given transfer buffer
pub(crate) fn test_config(buffer_size: usize) -> Config {
    let api = ApiConfig {
        host: "pve.test".into(),
        port: 8006,
        user: "root@pam".into(),
        token: "test".into(),
        secret: "secret".into(),
        verify_ssl: false,
        request_timeout: Duration::from_secs(5),
    };
    let mut config = Config::new(api, RemoteTarget::new(NODE, VMID));
    config.transfer.buffer_size = buffer_size;
    config.poll.interval = Duration::from_millis(100);
    config.poll.timeout = Duration::from_secs(60);
    config
}

/// One request seen by a test double
#[derive(Clone, Debug)]
pub(crate) struct Call {
    pub method: Method,
    pub path: String,
    pub params: Vec<(String, String)>,
}

impl Call {
    fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

fn record(params: &Params<'_>) -> Vec<(String, String)> {
    params
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// Encoder whose scripts are tab-separated instructions for [`FakeGuest`]
///
/// `encode_script` passes scripts through untouched, so the command the
/// guest receives is the script itself.
pub(crate) struct ScriptEncoder;

impl CommandEncoder for ScriptEncoder {
    fn encode_script(&self, script: &str, _preserve_rc: bool) -> String {
        script.to_string()
    }

    fn escape_path(&self, path: &str) -> String {
        path.to_string()
    }

    fn append_script(&self, path: &str) -> String {
        format!("append\t{path}")
    }

    fn create_script(&self, path: &str) -> String {
        format!("create\t{path}")
    }

    fn read_window_script(&self, path: &str, window: ChunkWindow) -> String {
        format!("read\t{path}\t{}\t{}", window.offset, window.size)
    }

    fn name(&self) -> &'static str {
        "script"
    }
}

/// Final status of a fake process
struct Outcome {
    exitcode: i64,
    out: String,
    err: String,
}

impl Outcome {
    fn ok(out: impl Into<String>) -> Self {
        Self {
            exitcode: 0,
            out: out.into(),
            err: String::new(),
        }
    }

    fn fail(err: impl Into<String>) -> Self {
        Self {
            exitcode: 1,
            out: String::new(),
            err: err.into(),
        }
    }
}

struct Process {
    remaining_polls: u32,
    outcome: Outcome,
}

#[derive(Default)]
struct GuestState {
    files: HashMap<String, Vec<u8>>,
    dirs: HashSet<String>,
    processes: HashMap<i64, Process>,
    next_pid: i64,
    calls: Vec<Call>,
    read_offsets: Vec<u64>,
    appends: u32,
    fail_append_at: Option<u32>,
    running_polls: u32,
}

/// In-memory guest with a file system, driven by [`ScriptEncoder`] commands
///
/// Each process reports `exited: false` for `running_polls` polls before
/// exiting. Once a process has been reported exited its pid is forgotten,
/// so polling it again fails like an unknown pid on a real agent.
#[derive(Default)]
pub(crate) struct FakeGuest {
    state: Mutex<GuestState>,
}

impl FakeGuest {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn with_file(self: Arc<Self>, path: &str, content: &[u8]) -> Arc<Self> {
        self.state
            .lock()
            .unwrap()
            .files
            .insert(path.to_string(), content.to_vec());
        self
    }

    pub(crate) fn with_dir(self: Arc<Self>, path: &str) -> Arc<Self> {
        self.state.lock().unwrap().dirs.insert(path.to_string());
        self
    }

    pub(crate) fn with_running_polls(self: Arc<Self>, polls: u32) -> Arc<Self> {
        self.state.lock().unwrap().running_polls = polls;
        self
    }

    /// Make the `n`th append (0-based) exit non-zero
    pub(crate) fn failing_append_at(self: Arc<Self>, n: u32) -> Arc<Self> {
        self.state.lock().unwrap().fail_append_at = Some(n);
        self
    }

    pub(crate) fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().files.get(path).cloned()
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub(crate) fn submitted_commands(&self) -> Vec<String> {
        self.calls()
            .iter()
            .filter(|c| c.method == Method::POST && c.path.ends_with("/agent/exec"))
            .filter_map(|c| c.param("command").map(str::to_string))
            .collect()
    }

    pub(crate) fn read_offsets(&self) -> Vec<u64> {
        self.state.lock().unwrap().read_offsets.clone()
    }

    pub(crate) fn connect(self: &Arc<Self>, buffer_size: usize) -> Connection {
        Connection::with_parts(
            test_config(buffer_size),
            self.clone(),
            Arc::new(ScriptEncoder),
        )
        .unwrap()
    }

    fn run(state: &mut GuestState, command: &str, input: Option<&str>) -> Outcome {
        let parts: Vec<&str> = command.split('\t').collect();
        match parts.as_slice() {
            ["append", path] => {
                let index = state.appends;
                state.appends += 1;
                if state.fail_append_at == Some(index) {
                    return Outcome::fail("disk full");
                }
                if state.dirs.contains(*path) {
                    return Outcome::fail(format!("{path} is a directory"));
                }
                let payload = input.unwrap_or_default().trim_end_matches("\r\n");
                match STANDARD.decode(payload) {
                    Ok(bytes) => {
                        state
                            .files
                            .entry(path.to_string())
                            .or_default()
                            .extend_from_slice(&bytes);
                        Outcome::ok("")
                    }
                    Err(e) => Outcome::fail(format!("bad base64: {e}")),
                }
            }
            ["create", path] => {
                state.files.entry(path.to_string()).or_default();
                Outcome::ok("")
            }
            ["read", path, offset, size] => {
                let offset: u64 = offset.parse().unwrap();
                let size: usize = size.parse().unwrap();
                state.read_offsets.push(offset);
                if state.dirs.contains(*path) {
                    return Outcome::ok(format!("{DIR_SENTINEL}\r\n"));
                }
                match state.files.get(*path) {
                    Some(content) => {
                        let start = (offset as usize).min(content.len());
                        let end = (start + size).min(content.len());
                        let chunk = &content[start..end];
                        if chunk.is_empty() {
                            Outcome::ok("")
                        } else {
                            Outcome::ok(format!("{}\r\n", STANDARD.encode(chunk)))
                        }
                    }
                    None => Outcome::fail(format!("{path} does not exist")),
                }
            }
            ["echo", text] => Outcome::ok(text.to_string()),
            _ => Outcome::fail(format!("unknown command: {command}")),
        }
    }
}

#[async_trait]
impl ApiClient for FakeGuest {
    async fn request(&self, method: Method, path: &str, params: &Params<'_>) -> Result<Value> {
        let mut state = self.state.lock().unwrap();
        let call = Call {
            method: method.clone(),
            path: path.to_string(),
            params: record(params),
        };
        state.calls.push(call.clone());

        let exec_path = format!("nodes/{NODE}/qemu/{VMID}/agent/exec");
        let status_path = format!("nodes/{NODE}/qemu/{VMID}/agent/exec-status");
        let ping_path = format!("nodes/{NODE}/qemu/{VMID}/agent/ping");

        if method == Method::POST && path == exec_path {
            let command = call.param("command").unwrap_or_default().to_string();
            let outcome = Self::run(&mut state, &command, call.param("input-data"));
            state.next_pid += 1;
            let pid = state.next_pid;
            let remaining_polls = state.running_polls;
            state.processes.insert(
                pid,
                Process {
                    remaining_polls,
                    outcome,
                },
            );
            return Ok(json!({ "pid": pid }));
        }

        if method == Method::GET && path == status_path {
            let pid: i64 = call.param("pid").unwrap().parse().unwrap();
            let Some(process) = state.processes.get_mut(&pid) else {
                return Err(Error::Api {
                    status: 500,
                    message: format!("no such pid {pid}"),
                });
            };
            if process.remaining_polls > 0 {
                process.remaining_polls -= 1;
                return Ok(json!({ "exited": 0 }));
            }
            let Some(process) = state.processes.remove(&pid) else {
                unreachable!("pid checked above");
            };
            let Outcome { exitcode, out, err } = process.outcome;
            let mut status = json!({ "exited": 1, "exitcode": exitcode });
            if !out.is_empty() {
                status["out-data"] = json!(out);
            }
            if !err.is_empty() {
                status["err-data"] = json!(err);
            }
            return Ok(status);
        }

        if method == Method::POST && path == ping_path {
            return Ok(Value::Null);
        }

        Err(Error::Api {
            status: 501,
            message: format!("unexpected {method} {path}"),
        })
    }
}

/// Agent that answers every submission with pid 1 and replays canned statuses
///
/// Statuses are served in order; when they run out the last one repeats.
pub(crate) struct ScriptedAgent {
    statuses: Mutex<VecDeque<Value>>,
    last: Mutex<Value>,
    submit_response: Value,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedAgent {
    pub(crate) fn new(statuses: Vec<Value>) -> Arc<Self> {
        Arc::new(Self {
            statuses: Mutex::new(statuses.into()),
            last: Mutex::new(json!({ "exited": 0 })),
            submit_response: json!({ "pid": 1 }),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Agent whose exec endpoint answers with `response` instead of a pid
    pub(crate) fn with_submit_response(response: Value) -> Arc<Self> {
        Arc::new(Self {
            statuses: Mutex::new(VecDeque::new()),
            last: Mutex::new(json!({ "exited": 0 })),
            submit_response: response,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, method: Method) -> usize {
        self.calls().iter().filter(|c| c.method == method).count()
    }

    pub(crate) fn connect(
        self: &Arc<Self>,
        encoder: Arc<dyn CommandEncoder>,
    ) -> Connection {
        Connection::with_parts(test_config(32 * 1024), self.clone(), encoder).unwrap()
    }
}

#[async_trait]
impl ApiClient for ScriptedAgent {
    async fn request(&self, method: Method, path: &str, params: &Params<'_>) -> Result<Value> {
        self.calls.lock().unwrap().push(Call {
            method: method.clone(),
            path: path.to_string(),
            params: record(params),
        });

        if method == Method::POST {
            return Ok(self.submit_response.clone());
        }

        let next = self.statuses.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        if let Some(status) = next {
            *last = status;
        }
        Ok(last.clone())
    }
}
