//! Provider configuration
//!
//! The provider is configured entirely through the environment; a missing
//! or malformed required variable is fatal before anything touches the
//! tunnel interface.

use std::path::PathBuf;

use gate_net::OverlaySubnet;
use url::Url;

use crate::error::{Error, Result};

const DEFAULT_CONFIG_PATH: &str = "/etc/wireguard/wggate.conf";
const DEFAULT_ROUTE_PORT: u16 = 80;
const DEFAULT_API_PORT: u16 = 5000;

/// Validated provider configuration
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Overlay subnet peers are allocated from (`VPN_IP_RANGE`)
    pub subnet: OverlaySubnet,
    /// UDP port the tunnel listens on (`VPN_PORT`)
    pub vpn_port: u16,
    /// Public endpoint announced to peers (`VPN_ENDPOINT_ANNOUNCE`)
    pub endpoint_announce: String,
    /// Public DNS suffix peers receive subdomains under (`PROVIDER_ANNONCE_DOMAIN`)
    pub announce_domain: String,
    /// Gateway address requesters publish routes for (`PROVIDER_ROUTE_IP`)
    pub route_ip: String,
    /// Gateway port requesters publish routes for (`PROVIDER_ROUTE_PORT`)
    pub route_port: u16,
    /// External auth backend; absent means open admission (`AUTH_API_URL`)
    pub auth_api_url: Option<Url>,
    /// Admission HTTP listener port (`PROVIDER_API_PORT`)
    pub api_port: u16,
    /// Tunnel configuration file, the authoritative peer store (`VPN_CONFIG_PATH`)
    pub config_path: PathBuf,
}

impl ProviderConfig {
    /// Read the configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let subnet = required(&get, "VPN_IP_RANGE")?
            .parse::<OverlaySubnet>()
            .map_err(|e| Error::Config(format!("VPN_IP_RANGE: {}", e)))?;

        let vpn_port = parse_port(&get, "VPN_PORT", None)?;
        let endpoint_announce = required(&get, "VPN_ENDPOINT_ANNOUNCE")?;
        let announce_domain = required(&get, "PROVIDER_ANNONCE_DOMAIN")?;
        let route_ip = required(&get, "PROVIDER_ROUTE_IP")?;
        let route_port = parse_port(&get, "PROVIDER_ROUTE_PORT", Some(DEFAULT_ROUTE_PORT))?;
        let api_port = parse_port(&get, "PROVIDER_API_PORT", Some(DEFAULT_API_PORT))?;

        let auth_api_url = match get("AUTH_API_URL") {
            Some(raw) if !raw.is_empty() => Some(
                Url::parse(&raw).map_err(|e| Error::Config(format!("AUTH_API_URL: {}", e)))?,
            ),
            _ => None,
        };

        let config_path = get("VPN_CONFIG_PATH")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

        Ok(Self {
            subnet,
            vpn_port,
            endpoint_announce,
            announce_domain,
            route_ip,
            route_port,
            auth_api_url,
            api_port,
            config_path,
        })
    }

    /// The `host:port` endpoint peers connect to
    ///
    /// `VPN_ENDPOINT_ANNOUNCE` may already carry a port; otherwise the
    /// tunnel listen port is appended.
    pub fn endpoint(&self) -> String {
        if self.endpoint_announce.contains(':') {
            self.endpoint_announce.clone()
        } else {
            format!("{}:{}", self.endpoint_announce, self.vpn_port)
        }
    }

    /// Interface name, derived from the config file stem the way wg-quick
    /// derives it
    pub fn interface(&self) -> String {
        self.config_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "wggate".to_string())
    }
}

fn required<F>(get: &F, key: &str) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    get(key)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::Config(format!("{} is required", key)))
}

fn parse_port<F>(get: &F, key: &str, default: Option<u16>) -> Result<u16>
where
    F: Fn(&str) -> Option<String>,
{
    match get(key).filter(|v| !v.is_empty()) {
        Some(raw) => raw
            .parse()
            .map_err(|_| Error::Config(format!("{}: not a port: {}", key, raw))),
        None => default.ok_or_else(|| Error::Config(format!("{} is required", key))),
    }
}
