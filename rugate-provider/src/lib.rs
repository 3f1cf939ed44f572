//! rugate provider
//!
//! The provider terminates public traffic for its announcement domain and
//! forwards per-subdomain requests through point-to-point tunnels to the
//! requesters that registered them. This crate is the provider's control
//! plane: authenticated peer admission, overlay address management, the
//! durable peer table inside the tunnel configuration file, and the
//! name-to-overlay-IP resolution the edge proxy queries on every request.

pub mod config;
pub mod error;
pub mod manager;
pub mod service;
pub mod table;

pub use config::ProviderConfig;
pub use error::{Error, Result};
pub use manager::VpnManager;
pub use service::{router, serve, AppState};
pub use table::{Peer, PeerTable};
