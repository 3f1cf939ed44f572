//! Multi-provider supervisor
//!
//! Owns every per-provider flow: probe, version gate, registration,
//! tunnel bring-up, route announcement and handshake watching. The
//! configured provider set is declarative; `reconcile` stops flows whose
//! string disappeared and starts flows for new ones, stops before starts,
//! so a provider that vanishes and reappears in one delta starts from a
//! clean slate.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use gate_api::{
    ProviderCredentials, RegisterRequest, RegisterResponse, TunnelConfig, VersionResponse,
    PROTOCOL_VERSION,
};
use gate_wg::{TunnelDriver, WgConfigFile, WgInterface, WgPeerSection};

use crate::announce::RouteAnnouncer;
use crate::config::RequesterConfig;
use crate::error::Result;
use crate::keys::{KeyPair, KeyStore};
use crate::watcher::HandshakeWatcher;

/// Distinctive exit code for an unrecoverable provider start failure
pub const START_FAILURE_EXIT_CODE: i32 = 51;

const PING_TIMEOUT: Duration = Duration::from_secs(30);
const VERSION_TIMEOUT: Duration = Duration::from_secs(10);

struct ActiveProvider {
    creds: ProviderCredentials,
    config_path: PathBuf,
    refresh: Option<JoinHandle<()>>,
}

/// Owner of every requester-side flow
pub struct Supervisor {
    config: RequesterConfig,
    driver: Arc<dyn TunnelDriver>,
    keys: KeyStore,
    announcer: Arc<RouteAnnouncer>,
    watcher: HandshakeWatcher,
    events_rx: Option<mpsc::UnboundedReceiver<String>>,
    http: reqwest::Client,
    active: HashMap<String, ActiveProvider>,
    shutdown_tx: watch::Sender<bool>,
}

impl Supervisor {
    pub fn new(config: RequesterConfig, driver: Arc<dyn TunnelDriver>) -> Self {
        let keys = KeyStore::new(config.state_dir.clone(), driver.clone());
        let announcer = Arc::new(RouteAnnouncer::new(&config));
        let (watcher, events_rx) = HandshakeWatcher::new(
            driver.clone(),
            config.handshake_threshold,
            config.handshake_poll_interval,
        );
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            config,
            driver,
            keys,
            announcer,
            watcher,
            events_rx: Some(events_rx),
            http: reqwest::Client::new(),
            active: HashMap::new(),
            shutdown_tx,
        }
    }

    /// Handle that stops the supervisor from outside `run`
    pub fn shutdown_handle(&self) -> watch::Sender<bool> {
        self.shutdown_tx.clone()
    }

    /// Number of providers with a live flow
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Reconcile the configured set until shutdown, restarting flows the
    /// handshake watcher flags as dead
    ///
    /// An error is an unrecoverable start failure: the caller exits with
    /// [`START_FAILURE_EXIT_CODE`] and a fresh process retries from the
    /// declarative config.
    pub async fn run(mut self) -> Result<()> {
        let providers = self.config.providers.clone();
        self.reconcile(providers).await?;

        let mut events_rx = self.events_rx.take().expect("run called twice");
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        #[cfg(unix)]
        let mut sighup =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())?;

        loop {
            #[cfg(unix)]
            {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    event = events_rx.recv() => match event {
                        Some(provider) => self.restart_provider(&provider).await?,
                        None => break,
                    },
                    _ = sighup.recv() => self.reload().await?,
                }
            }
            #[cfg(not(unix))]
            {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    event = events_rx.recv() => match event {
                        Some(provider) => self.restart_provider(&provider).await?,
                        None => break,
                    },
                }
            }
        }

        self.shutdown_all().await;
        Ok(())
    }

    /// Converge the active flows on a new provider set
    pub async fn reconcile(&mut self, providers: Vec<String>) -> Result<()> {
        let desired: HashSet<String> = providers.iter().cloned().collect();

        let to_stop: Vec<String> = self
            .active
            .keys()
            .filter(|p| !desired.contains(*p))
            .cloned()
            .collect();
        for provider in &to_stop {
            self.stop_provider(provider).await;
        }

        for provider in &providers {
            if !self.active.contains_key(provider) {
                self.start_provider(provider).await?;
            }
        }

        if self.active.is_empty() {
            self.watcher.stop();
        } else {
            self.watcher.start();
        }
        Ok(())
    }

    /// Re-read the declarative config and reconcile against it
    async fn reload(&mut self) -> Result<()> {
        match self.config.reload_providers() {
            Ok(providers) => {
                log::info!("provider file reloaded, {} provider(s)", providers.len());
                self.reconcile(providers).await
            }
            Err(e) => {
                log::error!("provider file reload failed, keeping current set: {}", e);
                Ok(())
            }
        }
    }

    async fn start_provider(&mut self, provider: &str) -> Result<()> {
        let creds = ProviderCredentials::parse(provider)?;
        log::info!("starting provider {}", creds.backend_url);

        self.wait_until_reachable(&creds).await?;
        self.wait_until_compatible(&creds).await?;

        let keys = self.keys.get_or_generate(&creds.backend_url).await?;
        let reg = self.register(&creds, &keys).await?;
        log::info!("registered with {} as {}", creds.backend_url, reg.domain);

        let config_path = self.keys.config_path(&creds.backend_url);
        tunnel_file(&reg.wg_config, &keys.private_key).store_atomic(&config_path)?;

        // Down first tolerates an interface left over from a crash.
        if let Err(e) = self.driver.interface_down(&config_path).await {
            log::debug!("pre-start interface down failed (ignored): {}", e);
        }
        self.driver.interface_up(&config_path).await?;

        ping_probe(&reg.server_ip).await;

        let refresh = self.announce(&creds, &reg).await;

        self.watcher
            .watch(provider, &KeyStore::interface(&creds.backend_url));
        self.active.insert(
            provider.to_string(),
            ActiveProvider {
                creds,
                config_path,
                refresh,
            },
        );
        Ok(())
    }

    /// Announce the tunnel's routes; on success, keep them refreshed
    ///
    /// Failure costs failover, not traffic, so it is logged and the start
    /// continues without a refresh loop.
    async fn announce(
        &self,
        creds: &ProviderCredentials,
        reg: &RegisterResponse,
    ) -> Option<JoinHandle<()>> {
        let Some(route_ip) = reg
            .route_ip
            .clone()
            .or_else(|| self.config.target_host.clone())
        else {
            log::warn!(
                "{} announced no route target and ROUTING_TARGET_HOST is unset, skipping",
                creds.backend_url
            );
            return None;
        };
        let route_port = reg.route_port.unwrap_or(self.config.target_port_https);

        match self.announcer.register(creds, &route_ip, route_port).await {
            Ok(_) => Some(self.announcer.clone().spawn_refresh(
                creds.clone(),
                route_ip,
                route_port,
                self.config.route_refresh_interval,
            )),
            Err(e) => {
                log::error!("route announcement to {} failed: {}", creds.backend_url, e);
                None
            }
        }
    }

    async fn stop_provider(&mut self, provider: &str) {
        let Some(active) = self.active.remove(provider) else {
            return;
        };
        log::info!("stopping provider {}", active.creds.backend_url);

        if let Some(refresh) = active.refresh {
            refresh.abort();
        }
        self.watcher.unwatch(provider);

        if let Err(e) = self.driver.interface_down(&active.config_path).await {
            log::warn!(
                "interface down for {} failed: {}",
                active.creds.backend_url,
                e
            );
        }
        if let Err(e) = tokio::fs::remove_file(&active.config_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("removing {} failed: {}", active.config_path.display(), e);
            }
        }
    }

    async fn restart_provider(&mut self, provider: &str) -> Result<()> {
        log::warn!("rebuilding tunnel flow for {}", provider);
        self.stop_provider(provider).await;
        self.start_provider(provider).await
    }

    async fn shutdown_all(&mut self) {
        log::info!("stopping all providers");
        let providers: Vec<String> = self.active.keys().cloned().collect();
        for provider in providers {
            self.stop_provider(&provider).await;
        }
        self.watcher.close();
    }

    /// Probe `/api/ping` until the provider answers
    async fn wait_until_reachable(&self, creds: &ProviderCredentials) -> Result<()> {
        let url = creds.backend_url.join("api/ping")?;
        loop {
            match self
                .http
                .get(url.clone())
                .timeout(PING_TIMEOUT)
                .send()
                .await
            {
                Ok(resp) if resp.status().is_success() => {
                    log::debug!("{} is reachable", creds.backend_url);
                    return Ok(());
                }
                Ok(resp) => {
                    log::info!(
                        "waiting for {}: ping returned {}",
                        creds.backend_url,
                        resp.status()
                    );
                }
                Err(e) => log::info!("waiting for {}: {}", creds.backend_url, e),
            }
            tokio::time::sleep(self.config.probe_retry_interval).await;
        }
    }

    /// Probe the version endpoint until the provider speaks the
    /// dual-scheme model
    ///
    /// An incompatible (or missing) version endpoint backs off on the long
    /// retry interval: the provider exists but has not migrated yet.
    async fn wait_until_compatible(&self, creds: &ProviderCredentials) -> Result<()> {
        let url = creds.backend_url.join("router/api/version")?;
        loop {
            match self
                .http
                .get(url.clone())
                .timeout(VERSION_TIMEOUT)
                .send()
                .await
            {
                Ok(resp) if resp.status().is_success() => {
                    match resp.json::<VersionResponse>().await {
                        Ok(v) if v.version >= PROTOCOL_VERSION => {
                            log::debug!("{} speaks version {}", creds.backend_url, v.version);
                            return Ok(());
                        }
                        Ok(v) => log::warn!(
                            "{} speaks version {}, waiting for an upgrade",
                            creds.backend_url,
                            v.version
                        ),
                        Err(e) => log::warn!(
                            "version response from {} unreadable: {}",
                            creds.backend_url,
                            e
                        ),
                    }
                    tokio::time::sleep(self.config.provider_retry_interval).await;
                }
                Ok(resp) => {
                    log::warn!(
                        "version endpoint of {} returned {}",
                        creds.backend_url,
                        resp.status()
                    );
                    tokio::time::sleep(self.config.provider_retry_interval).await;
                }
                Err(e) => {
                    log::info!("version probe of {} failed: {}", creds.backend_url, e);
                    tokio::time::sleep(self.config.probe_retry_interval).await;
                }
            }
        }
    }

    async fn register(
        &self,
        creds: &ProviderCredentials,
        keys: &KeyPair,
    ) -> Result<RegisterResponse> {
        let url = creds.backend_url.join("api/register")?;
        let body = RegisterRequest {
            user_id: creds.user_id.clone(),
            vpn_public_key: keys.public_key.clone(),
            auth_token: creds.signature.clone(),
            client_version: Some(PROTOCOL_VERSION),
        };
        let resp = self
            .http
            .post(url)
            .timeout(PING_TIMEOUT)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }
}

/// Persisted wg-quick file for a registration response
///
/// The provider's envelope never contains key material; the requester's
/// own private key goes in here and nowhere else.
fn tunnel_file(config: &TunnelConfig, private_key: &str) -> WgConfigFile {
    WgConfigFile {
        interface: WgInterface {
            address: config.wg_interface.address.clone(),
            private_key: Some(private_key.to_string()),
            listen_port: None,
        },
        peers: config
            .peers
            .iter()
            .map(|peer| WgPeerSection {
                name: None,
                public_key: peer.public_key.clone(),
                allowed_ips: peer.allowed_ips.clone(),
                endpoint: peer.endpoint.clone(),
                persistent_keepalive: peer.persistent_keepalive,
            })
            .collect(),
    }
}

/// One-shot ICMP echo against the provider's overlay address
///
/// Purely diagnostic: a missing reply is logged and never fails the start.
async fn ping_probe(server_ip: &str) {
    let result = tokio::process::Command::new("ping")
        .args(["-c", "1", "-W", "5", server_ip])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;

    match result {
        Ok(status) if status.success() => log::info!("tunnel to {} confirmed", server_ip),
        Ok(_) => log::warn!(
            "no ICMP reply from {} (tunnel may still be settling)",
            server_ip
        ),
        Err(e) => log::warn!("ping probe did not run: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gate_api::{WgInterfaceConfig, WgPeerConfig};
    use gate_wg::MockDriver;

    fn test_config(dir: &tempfile::TempDir, providers: Vec<String>) -> RequesterConfig {
        let state_dir = dir.path().to_string_lossy().into_owned();
        RequesterConfig::from_lookup(providers, move |key| {
            (key == "REQUESTER_STATE_DIR").then(|| state_dir.clone())
        })
        .unwrap()
    }

    fn registration_envelope() -> TunnelConfig {
        TunnelConfig {
            wg_interface: WgInterfaceConfig {
                address: vec!["10.0.0.2/32".to_string()],
                private_key: None,
            },
            peers: vec![WgPeerConfig {
                public_key: "serverpk".to_string(),
                allowed_ips: vec!["10.0.0.0/24".to_string()],
                endpoint: Some("gw.example.com:51820".to_string()),
                persistent_keepalive: Some(60),
            }],
        }
    }

    #[test]
    fn test_tunnel_file_injects_private_key() {
        let file = tunnel_file(&registration_envelope(), "my-private-key");

        assert_eq!(file.interface.address, vec!["10.0.0.2/32"]);
        assert_eq!(file.interface.private_key.as_deref(), Some("my-private-key"));
        assert_eq!(file.peers.len(), 1);
        assert_eq!(file.peers[0].public_key, "serverpk");
        assert_eq!(file.peers[0].allowed_ips, vec!["10.0.0.0/24"]);
        assert_eq!(
            file.peers[0].endpoint.as_deref(),
            Some("gw.example.com:51820")
        );
        assert_eq!(file.peers[0].persistent_keepalive, Some(60));

        // The rendered file is valid wg-quick input
        let rendered = file.render();
        assert!(rendered.contains("PrivateKey = my-private-key"));
        assert!(rendered.contains("PersistentKeepalive = 60"));
    }

    #[tokio::test]
    async fn test_stop_provider_tears_the_flow_down() {
        let dir = tempfile::tempdir().unwrap();
        let driver = Arc::new(MockDriver::new());
        let provider = "https://gw.example.com,alice,sig";
        let mut supervisor = Supervisor::new(test_config(&dir, vec![]), driver.clone());

        // Fabricate an active flow the way start_provider leaves one
        let creds = ProviderCredentials::parse(provider).unwrap();
        let config_path = supervisor.keys.config_path(&creds.backend_url);
        tunnel_file(&registration_envelope(), "pk").store_atomic(&config_path).unwrap();
        supervisor
            .watcher
            .watch(provider, &KeyStore::interface(&creds.backend_url));
        supervisor.active.insert(
            provider.to_string(),
            ActiveProvider {
                creds,
                config_path: config_path.clone(),
                refresh: None,
            },
        );

        supervisor.stop_provider(provider).await;

        assert_eq!(supervisor.active_count(), 0);
        assert!(!config_path.exists());
        assert!(driver
            .calls()
            .iter()
            .any(|c| c.starts_with("down") && c.contains("wgr")));

        // Stopping again is a no-op
        supervisor.stop_provider(provider).await;
    }

    #[tokio::test]
    async fn test_reconcile_empty_set_idles_the_watcher() {
        let dir = tempfile::tempdir().unwrap();
        let mut supervisor =
            Supervisor::new(test_config(&dir, vec![]), Arc::new(MockDriver::new()));

        supervisor.reconcile(vec![]).await.unwrap();
        assert_eq!(supervisor.active_count(), 0);
        assert!(!supervisor.watcher.is_running());
    }

    #[tokio::test]
    async fn test_unparseable_provider_fails_the_start() {
        let dir = tempfile::tempdir().unwrap();
        let mut supervisor =
            Supervisor::new(test_config(&dir, vec![]), Arc::new(MockDriver::new()));

        let result = supervisor
            .reconcile(vec!["ftp://bad,alice,sig".to_string()])
            .await;
        assert!(result.is_err());
    }
}
