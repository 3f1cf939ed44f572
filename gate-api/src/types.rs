//! Request and response bodies for the admission, routing and auth APIs

use serde::{Deserialize, Serialize};

/// Sentinel peer name for the apex (announcement) domain itself
pub const ROOT_PEER: &str = "$root$";

/// Admission protocol revision carrying the dual-scheme route model
pub const PROTOCOL_VERSION: u32 = 2;

/// Body of `POST /api/register`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub user_id: String,
    pub vpn_public_key: String,
    pub auth_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_version: Option<u32>,
}

/// Interface half of the tunnel configuration envelope
///
/// The provider leaves `privateKey` empty; the requester injects its own
/// private key before persisting the file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WgInterfaceConfig {
    pub address: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
}

/// Peer half of the tunnel configuration envelope
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WgPeerConfig {
    pub public_key: String,
    pub allowed_ips: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_keepalive: Option<u16>,
}

/// Tunnel configuration returned by the provider on registration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TunnelConfig {
    pub wg_interface: WgInterfaceConfig,
    pub peers: Vec<WgPeerConfig>,
}

/// Body of a successful `POST /api/register` response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub wg_config: TunnelConfig,
    /// Provider's overlay address, target of the post-up connectivity probe
    pub server_ip: String,
    pub server_domain: String,
    pub domain_name: String,
    /// Fully qualified public name: `serverDomain` for the root peer,
    /// `<domainName>.<serverDomain>` otherwise
    pub domain: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_port: Option<u16>,
}

/// Body of `GET /router/api/version`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct VersionResponse {
    pub version: u32,
}

/// URL scheme a route record terminates
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RouteScheme {
    Http,
    Https,
}

/// Optional health probe attached to a route record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheck {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

/// One route record published to the routing backend
///
/// `source` groups records so the backend can atomically replace every
/// route a publisher previously announced; tunnel routes always carry
/// `source = "tunnel"`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub ip: String,
    pub port: u16,
    pub priority: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<RouteScheme>,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheck>,
}

/// Body of `POST /router/api/routes/{userId}/{signature}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoutesRequest {
    pub routes: Vec<Route>,
}

/// Loosely-shaped routing backend response
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutesResponse {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub routes: Option<serde_json::Value>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Record returned by the external auth backend
///
/// Both fields are required for admission; a record missing either is
/// treated as unauthorized.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRecord {
    #[serde(default)]
    pub server_domain: Option<String>,
    #[serde(default)]
    pub domain_name: Option<String>,
}
