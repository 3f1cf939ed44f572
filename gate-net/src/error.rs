//! Error types for overlay addressing

use std::net::Ipv4Addr;

use thiserror::Error;

/// Result type alias for overlay addressing operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while managing the overlay subnet
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// The configured subnet is not valid CIDR notation
    #[error("invalid CIDR notation: {0}")]
    InvalidCidr(String),

    /// The address does not belong to the overlay subnet
    #[error("address {0} is outside the overlay subnet")]
    OutOfRange(Ipv4Addr),

    /// The address is already leased to another peer
    #[error("address {0} is already leased")]
    AlreadyLeased(Ipv4Addr),

    /// Every allocatable host address is taken
    #[error("overlay address pool exhausted")]
    ExhaustedPool,
}
