//! Error types for the provider role

use thiserror::Error;

/// Result type alias for provider operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur on the provider
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or malformed configuration; fatal at startup
    #[error("configuration error: {0}")]
    Config(String),

    /// The auth backend rejected the peer or returned an incomplete record
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Overlay addressing failure (pool exhaustion, foreign addresses)
    #[error("address pool error: {0}")]
    Pool(#[from] gate_net::Error),

    /// Tunnel toolchain or config file failure
    #[error("tunnel error: {0}")]
    Wg(#[from] gate_wg::Error),

    /// The auth backend could not be reached
    #[error("auth backend error: {0}")]
    AuthBackend(#[from] reqwest::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
