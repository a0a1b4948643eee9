//! POSIX shell dialect

use super::traits::{CommandEncoder, DIR_SENTINEL};
use crate::types::ChunkWindow;

/// Encoder for guests with a POSIX `sh` and coreutils
///
/// Commands are submitted as `sh -c '<script>'`. The guest agent splits the
/// command string with shell-like word rules, so single quotes survive.
///
/// `sh` reports only the last stage of a pipeline, so the transfer scripts
/// have every stage write its name to fd 3 on failure and exit 1 if anything
/// was written there.
#[derive(Debug, Clone, Copy, Default)]
pub struct PosixShellEncoder;

impl CommandEncoder for PosixShellEncoder {
    fn encode_script(&self, script: &str, preserve_rc: bool) -> String {
        let script = if preserve_rc {
            format!("set -e\n{}", script.trim())
        } else {
            script.trim().to_string()
        };
        format!("sh -c '{}'", self.escape_path(&script))
    }

    fn escape_path(&self, path: &str) -> String {
        path.replace('\'', r"'\''")
    }

    fn append_script(&self, path: &str) -> String {
        format!(
            r#"p='{path}'
failed=$( {{ {{ tr -d '\r\n' || echo tr >&3; }} | {{ base64 -d >> "$p" || echo base64 >&3; }}; }} 3>&1 )
[ -z "$failed" ] || {{ echo "appending to $p failed in:" $failed >&2; exit 1; }}"#
        )
    }

    fn create_script(&self, path: &str) -> String {
        format!(": >> '{path}'")
    }

    fn read_window_script(&self, path: &str, window: ChunkWindow) -> String {
        let bs = block_size(window.offset, window.size);
        let skip = window.offset / bs;
        let count = window.size as u64 / bs;
        format!(
            r#"p='{path}'
if [ -f "$p" ]; then
  exec 4>&1
  failed=$( {{ {{ dd if="$p" bs={bs} skip={skip} count={count} || echo dd >&3; }} | {{ base64 || echo base64 >&3; }} | {{ tr -d '\n' || echo tr >&3; }} >&4; }} 3>&1 )
  [ -z "$failed" ] || {{ echo "reading $p failed in:" $failed >&2; exit 1; }}
elif [ -d "$p" ]; then
  echo '{DIR_SENTINEL}'
else
  echo "$p does not exist" >&2
  exit 1
fi"#
        )
    }

    fn name(&self) -> &'static str {
        "posix"
    }
}

/// Largest `dd` block size that divides both the offset and the window size
fn block_size(offset: u64, size: usize) -> u64 {
    let (mut a, mut b) = (offset, size as u64);
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a.max(1)
}
