//! Requester configuration
//!
//! Providers come from a declarative JSON file; scalar knobs come from the
//! environment. The file is re-read on reload so the supervisor can
//! reconcile against a changed provider set without restarting.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const DEFAULT_STATE_DIR: &str = "/etc/rugate";
const DEFAULT_PORT_HTTP: u16 = 80;
const DEFAULT_PORT_HTTPS: u16 = 443;
const DEFAULT_ROUTE_PRIORITY: u32 = 2;
const DEFAULT_ROUTE_REFRESH_SECS: u64 = 300;
const DEFAULT_PROVIDER_RETRY_SECS: u64 = 600;
const DEFAULT_PROBE_RETRY_SECS: u64 = 5;
const DEFAULT_HANDSHAKE_THRESHOLD_SECS: u64 = 180;
const DEFAULT_HANDSHAKE_POLL_SECS: u64 = 30;

/// One entry of the declarative provider file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderEntry {
    /// Connection string `<backendUrl>,<userId>,<signature>`
    pub provider: String,
}

/// Validated requester configuration
#[derive(Debug, Clone)]
pub struct RequesterConfig {
    /// Provider connection strings, in file order
    pub providers: Vec<String>,
    /// Where the file came from, for reloads
    pub source_path: Option<PathBuf>,
    /// Key pairs and tunnel configs live here (`REQUESTER_STATE_DIR`)
    pub state_dir: PathBuf,
    /// Fallback route target when a provider omits one (`ROUTING_TARGET_HOST`)
    pub target_host: Option<String>,
    /// HTTP route port (`ROUTING_TARGET_PORT_HTTP`)
    pub target_port_http: u16,
    /// HTTPS route port fallback (`ROUTING_TARGET_PORT_HTTPS`)
    pub target_port_https: u16,
    /// Priority on every published route (`ROUTE_PRIORITY`)
    pub route_priority: u32,
    /// Cadence of route re-registration (`ROUTE_REFRESH_INTERVAL`)
    pub route_refresh_interval: Duration,
    /// Backoff when a provider is incompatible (`PROVIDER_RETRY_INTERVAL`)
    pub provider_retry_interval: Duration,
    /// Cadence of availability probes (`PROBE_RETRY_INTERVAL`)
    pub probe_retry_interval: Duration,
    /// Optional health check on the https route (`HEALTH_CHECK_PATH`/`HEALTH_CHECK_HOST`)
    pub health_check_path: Option<String>,
    pub health_check_host: Option<String>,
    /// Tunnel considered dead after this much handshake silence (`HANDSHAKE_THRESHOLD`)
    pub handshake_threshold: Duration,
    /// Watcher poll cadence (`HANDSHAKE_POLL_INTERVAL`)
    pub handshake_poll_interval: Duration,
}

impl RequesterConfig {
    /// Load the provider file and the environment
    pub fn load(providers_file: &Path) -> Result<Self> {
        let providers = read_provider_file(providers_file)?;
        let mut config = Self::from_lookup(providers, |key| std::env::var(key).ok())?;
        config.source_path = Some(providers_file.to_path_buf());
        Ok(config)
    }

    /// Re-read the provider file this configuration came from
    pub fn reload_providers(&self) -> Result<Vec<String>> {
        match self.source_path {
            Some(ref path) => read_provider_file(path),
            None => Ok(self.providers.clone()),
        }
    }

    /// Build the configuration from a provider list and a variable lookup
    pub fn from_lookup<F>(providers: Vec<String>, get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            providers,
            source_path: None,
            state_dir: get("REQUESTER_STATE_DIR")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR)),
            target_host: get("ROUTING_TARGET_HOST").filter(|v| !v.is_empty()),
            target_port_http: parse_num(&get, "ROUTING_TARGET_PORT_HTTP", DEFAULT_PORT_HTTP)?,
            target_port_https: parse_num(&get, "ROUTING_TARGET_PORT_HTTPS", DEFAULT_PORT_HTTPS)?,
            route_priority: parse_num(&get, "ROUTE_PRIORITY", DEFAULT_ROUTE_PRIORITY)?,
            route_refresh_interval: secs(&get, "ROUTE_REFRESH_INTERVAL", DEFAULT_ROUTE_REFRESH_SECS)?,
            provider_retry_interval: secs(
                &get,
                "PROVIDER_RETRY_INTERVAL",
                DEFAULT_PROVIDER_RETRY_SECS,
            )?,
            probe_retry_interval: secs(&get, "PROBE_RETRY_INTERVAL", DEFAULT_PROBE_RETRY_SECS)?,
            health_check_path: get("HEALTH_CHECK_PATH").filter(|v| !v.is_empty()),
            health_check_host: get("HEALTH_CHECK_HOST").filter(|v| !v.is_empty()),
            handshake_threshold: secs(
                &get,
                "HANDSHAKE_THRESHOLD",
                DEFAULT_HANDSHAKE_THRESHOLD_SECS,
            )?,
            handshake_poll_interval: secs(
                &get,
                "HANDSHAKE_POLL_INTERVAL",
                DEFAULT_HANDSHAKE_POLL_SECS,
            )?,
        })
    }

    /// A documented sample provider file
    pub fn sample() -> String {
        r#"[
  {"provider": "https://gateway.example.com,alice,signature-from-the-gateway"}
]
"#
        .to_string()
    }
}

fn read_provider_file(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
    let entries: Vec<ProviderEntry> = serde_json::from_str(&content)
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
    Ok(entries.into_iter().map(|e| e.provider).collect())
}

fn parse_num<F, T>(get: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match get(key).filter(|v| !v.is_empty()) {
        Some(raw) => raw
            .parse()
            .map_err(|_| Error::Config(format!("{}: not a number: {}", key, raw))),
        None => Ok(default),
    }
}

fn secs<F>(get: &F, key: &str, default: u64) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(Duration::from_secs(parse_num(get, key, default)?))
}
