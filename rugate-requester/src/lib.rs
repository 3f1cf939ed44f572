//! rugate requester
//!
//! The requester originates tunnels: for every configured provider it
//! probes availability, verifies protocol compatibility, registers a
//! long-term key pair, installs the returned tunnel configuration,
//! announces routes to the routing backend, and watches handshake
//! timestamps so a silent tunnel is torn down and rebuilt.

pub mod announce;
pub mod config;
pub mod error;
pub mod keys;
pub mod supervisor;
pub mod watcher;

pub use announce::RouteAnnouncer;
pub use config::{ProviderEntry, RequesterConfig};
pub use error::{Error, Result};
pub use keys::{KeyPair, KeyStore};
pub use supervisor::Supervisor;
pub use watcher::HandshakeWatcher;
