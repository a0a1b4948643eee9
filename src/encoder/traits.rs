//! Trait for remote shell dialects

use crate::types::ChunkWindow;

/// Token a read-window script prints instead of data when the path is a directory
pub const DIR_SENTINEL: &str = "[DIR]";

/// Turns logical scripts into commands for one remote shell dialect
///
/// The exec session, uploader and downloader only deal in script text and
/// byte payloads. Everything that depends on the guest's shell lives behind
/// this trait: quoting, the encoded command line, the three transfer scripts,
/// and decoding of any structured diagnostics the shell writes to stderr.
///
/// # Script contracts
///
/// - [`append_script`](Self::append_script): reads one base64 line from
///   standard input, decodes it and appends the bytes to the file, creating
///   it if needed. Must exit non-zero on failure.
/// - [`create_script`](Self::create_script): creates the file if it does not
///   exist. Never truncates.
/// - [`read_window_script`](Self::read_window_script): for a regular file,
///   prints the base64 encoding of up to `window.size` bytes starting at
///   `window.offset`, or nothing at end of file. For a directory, prints
///   [`DIR_SENTINEL`]. Otherwise writes an error and exits non-zero.
///
/// Paths handed to the script builders have already been through
/// [`prepare_path`](Self::prepare_path).
pub trait CommandEncoder: Send + Sync {
    /// Wrap a script into the literal command submitted to the guest agent
    ///
    /// With `preserve_rc`, a failing last statement makes the command exit non-zero.
    fn encode_script(&self, script: &str, preserve_rc: bool) -> String;

    /// Escape a value for use inside the dialect's single-quoted string literal
    fn escape_path(&self, path: &str) -> String;

    /// Remove one pair of matching quotes wrapping the value
    fn unquote(&self, value: &str) -> String {
        let trimmed = value.trim();
        for quote in ['\'', '"'] {
            if trimmed.len() >= 2 && trimmed.starts_with(quote) && trimmed.ends_with(quote) {
                return trimmed[1..trimmed.len() - 1].to_string();
            }
        }
        value.to_string()
    }

    /// Unquote then escape a caller-supplied remote path
    fn prepare_path(&self, path: &str) -> String {
        self.escape_path(&self.unquote(path))
    }

    /// Script that appends base64-decoded standard input to `path`
    fn append_script(&self, path: &str) -> String;

    /// Script that creates `path` without truncating it
    fn create_script(&self, path: &str) -> String;

    /// Script that prints one base64 window of `path`
    fn read_window_script(&self, path: &str, window: ChunkWindow) -> String;

    /// Prefix marking stderr as structured diagnostics, if the dialect has any
    fn diagnostic_marker(&self) -> Option<&'static [u8]> {
        None
    }

    /// Turn structured diagnostics into readable text
    fn decode_diagnostics(&self, stderr: &[u8]) -> Vec<u8> {
        stderr.to_vec()
    }

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}
