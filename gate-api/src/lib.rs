//! Wire contracts shared by the rugate provider and requester
//!
//! The admission API (provider-hosted), the routing-backend API
//! (requester-consumed) and the auth-backend API (provider-consumed) all
//! exchange camelCase JSON; the types here are the single source of truth
//! for those shapes on both sides of the tunnel.

pub mod error;
pub mod host;
pub mod provider;
pub mod types;

pub use error::{Error, Result};
pub use host::{escape_domain, peer_name_for_host};
pub use provider::ProviderCredentials;
pub use types::{
    AuthRecord, HealthCheck, RegisterRequest, RegisterResponse, Route, RouteScheme,
    RoutesRequest, RoutesResponse, TunnelConfig, VersionResponse, WgInterfaceConfig,
    WgPeerConfig, PROTOCOL_VERSION, ROOT_PEER,
};
