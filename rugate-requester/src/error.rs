//! Error types for the requester role

use thiserror::Error;

/// Result type alias for requester operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur on the requester
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or malformed configuration; fatal at startup
    #[error("configuration error: {0}")]
    Config(String),

    /// Unparseable provider connection string; fatal for that provider
    #[error("provider string error: {0}")]
    Provider(#[from] gate_api::Error),

    /// Tunnel toolchain or config file failure
    #[error("tunnel error: {0}")]
    Wg(#[from] gate_wg::Error),

    /// HTTP transport failure talking to a provider or backend
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A derived URL could not be built
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// The routing backend answered the routes call with an error status
    #[error("routing backend returned status {status}: {body}")]
    RouteBackend { status: u16, body: String },

    /// The routing backend answered with a non-JSON body: the endpoint
    /// exists but does not speak this API
    #[error("routing backend does not speak the routes API")]
    RouteNotJson,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
