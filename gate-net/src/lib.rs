//! Overlay network addressing for the rugate tunnel mesh
//!
//! The provider hands every admitted peer a single host address out of a
//! private overlay subnet. This crate models that subnet (with its two
//! reserved addresses) and the pool that leases, allocates and releases
//! host addresses within it.

pub mod error;
pub mod pool;
pub mod subnet;

pub use error::{Error, Result};
pub use pool::IpPool;
pub use subnet::OverlaySubnet;
