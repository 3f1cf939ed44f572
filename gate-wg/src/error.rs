//! Error types for WireGuard plumbing

use thiserror::Error;

/// Result type alias for WireGuard operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving the WireGuard toolchain
#[derive(Debug, Error)]
pub enum Error {
    /// A toolchain command exited non-zero
    #[error("`{program}` exited with code {code}: {stderr}")]
    Command {
        program: String,
        code: i32,
        stderr: String,
    },

    /// A toolchain command could not be spawned at all
    #[error("failed to run `{program}`: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed configuration file or command output
    #[error("parse error: {0}")]
    Parse(String),
}
