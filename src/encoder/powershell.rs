//! Windows PowerShell dialect

use super::clixml::parse_clixml;
use super::traits::{CommandEncoder, DIR_SENTINEL};
use crate::types::ChunkWindow;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

const COMMON_ARGS: &[&str] = &[
    "PowerShell",
    "-NoProfile",
    "-NonInteractive",
    "-ExecutionPolicy",
    "Unrestricted",
];

const PRESERVE_RC: &str = "\r\nIf (-not $?) { If (Get-Variable LASTEXITCODE -ErrorAction SilentlyContinue) { exit $LASTEXITCODE } Else { exit 1 } }\r\n";

/// Stderr prefix PowerShell writes before a serialized error stream
pub const CLIXML_MARKER: &[u8] = b"#< CLIXML";

/// Encoder for Windows guests running PowerShell
///
/// Scripts are compacted (one trimmed statement per line), encoded as UTF-16LE
/// base64 and passed with `-EncodedCommand`, so no quoting survives to the
/// command line the guest agent splits.
#[derive(Debug, Clone, Default)]
pub struct PowerShellEncoder {
    strict_mode: bool,
}

impl PowerShellEncoder {
    /// Encoder without strict mode
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefix every script with `Set-StrictMode -Version Latest`
    pub fn with_strict_mode(mut self, strict_mode: bool) -> Self {
        self.strict_mode = strict_mode;
        self
    }
}

impl CommandEncoder for PowerShellEncoder {
    fn encode_script(&self, script: &str, preserve_rc: bool) -> String {
        let mut full = String::with_capacity(script.len() + PRESERVE_RC.len());
        if self.strict_mode {
            full.push_str("Set-StrictMode -Version Latest\r\n");
        }
        full.push_str(script);
        if preserve_rc {
            full.push_str(PRESERVE_RC);
        }

        let compact = full
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        let utf16: Vec<u8> = compact.encode_utf16().flat_map(u16::to_le_bytes).collect();

        format!(
            "{} -EncodedCommand {}",
            COMMON_ARGS.join(" "),
            STANDARD.encode(utf16)
        )
    }

    // Single-quoted PowerShell strings treat the ASCII quote and the four
    // typographic single quotes as delimiters; each is escaped by doubling.
    fn escape_path(&self, path: &str) -> String {
        let mut escaped = String::with_capacity(path.len());
        for c in path.chars() {
            if matches!(c, '\'' | '\u{2018}' | '\u{2019}' | '\u{201a}' | '\u{201b}') {
                escaped.push(c);
            }
            escaped.push(c);
        }
        escaped
    }

    fn append_script(&self, path: &str) -> String {
        format!(
            r#"
            $path = '{path}'
            [string]$b64 = @($input) -join ''
            $bytes = [System.Convert]::FromBase64String($b64.Trim())
            $fd = [System.IO.File]::OpenWrite($path)
            $fd.Seek(0, [System.IO.SeekOrigin]::End) > $null
            $fd.Write($bytes, 0, $bytes.Length)
            $fd.Close()
            "#
        )
    }

    fn create_script(&self, path: &str) -> String {
        format!(
            r#"
            $path = '{path}'
            $fd = [System.IO.File]::Open($path, [System.IO.FileMode]::OpenOrCreate, [System.IO.FileAccess]::Write)
            $fd.Close()
            "#
        )
    }

    fn read_window_script(&self, path: &str, window: ChunkWindow) -> String {
        let ChunkWindow { offset, size } = window;
        format!(
            r#"
            $path = '{path}'
            If (Test-Path -LiteralPath $path -PathType Leaf)
            {{
                $buffer_size = {size}
                $offset = {offset}
                $stream = New-Object -TypeName IO.FileStream($path, [IO.FileMode]::Open, [IO.FileAccess]::Read, [IO.FileShare]::ReadWrite)
                $stream.Seek($offset, [System.IO.SeekOrigin]::Begin) > $null
                $buffer = New-Object -TypeName byte[] $buffer_size
                $bytes_read = $stream.Read($buffer, 0, $buffer_size)
                if ($bytes_read -gt 0) {{
                    [System.Convert]::ToBase64String($buffer, 0, $bytes_read)
                }}
                $stream.Close() > $null
            }}
            ElseIf (Test-Path -LiteralPath $path -PathType Container)
            {{
                Write-Output "{DIR_SENTINEL}"
            }}
            Else
            {{
                Write-Error "$path does not exist"
                Exit 1
            }}
            "#
        )
    }

    fn diagnostic_marker(&self) -> Option<&'static [u8]> {
        Some(CLIXML_MARKER)
    }

    fn decode_diagnostics(&self, stderr: &[u8]) -> Vec<u8> {
        parse_clixml(stderr, "Error")
    }

    fn name(&self) -> &'static str {
        "powershell"
    }
}
