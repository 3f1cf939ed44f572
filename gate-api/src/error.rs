//! Error types for API contracts

use thiserror::Error;

/// Result type alias for contract parsing
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while parsing connection strings
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// The connection string is not `<backendUrl>,<userId>,<signature>`
    #[error("invalid provider connection string: {0}")]
    InvalidProvider(String),

    /// The backend URL scheme is not http or https
    #[error("provider backend URL must use http or https: {0}")]
    UnsupportedScheme(String),
}
