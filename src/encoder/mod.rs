//! Remote shell dialects
//!
//! The core protocol is dialect-agnostic. It asks a [`CommandEncoder`] for
//! the literal command to submit, for quoted paths, and for the scripts that
//! append and read file chunks. Two dialects are provided:
//!
//! - [`PowerShellEncoder`]: Windows guests. Scripts are sent as
//!   `-EncodedCommand` and CLIXML error streams are decoded.
//! - [`PosixShellEncoder`]: guests with `sh`, `base64`, `dd` and `tr`.
//!
//! ```
//! use pve_guest_exec::config::ShellDialect;
//! use pve_guest_exec::encoder::for_dialect;
//!
//! let encoder = for_dialect(ShellDialect::Posix);
//! assert_eq!(encoder.prepare_path("\"/tmp/my file\""), "/tmp/my file");
//! assert_eq!(encoder.prepare_path("/tmp/it's"), r"/tmp/it'\''s");
//! ```

mod clixml;
mod posix;
mod powershell;
mod traits;

use crate::config::ShellDialect;
use std::sync::Arc;

pub use clixml::parse_clixml;
pub use posix::PosixShellEncoder;
pub use powershell::PowerShellEncoder;
pub use traits::{CommandEncoder, DIR_SENTINEL};

/// Encoder for a configured dialect
pub fn for_dialect(dialect: ShellDialect) -> Arc<dyn CommandEncoder> {
    match dialect {
        ShellDialect::PowerShell => Arc::new(PowerShellEncoder::new()),
        ShellDialect::Posix => Arc::new(PosixShellEncoder),
    }
}
