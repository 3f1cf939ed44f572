//! Provider VPN manager
//!
//! Orchestrates the address pool, the peer table and the tunnel driver
//! behind the admission service. All mutations are serialized through one
//! lock: the peer table is a single-writer structure guarding both the
//! in-memory map and the on-disk file.

use std::net::Ipv4Addr;
use std::sync::Arc;

use tokio::sync::Mutex;

use gate_api::{TunnelConfig, WgInterfaceConfig, WgPeerConfig};
use gate_net::IpPool;
use gate_wg::{TunnelDriver, WgConfigFile, WgInterface};

use crate::config::ProviderConfig;
use crate::error::{Error, Result};
use crate::table::{Peer, PeerTable};

/// Keepalive pushed to every peer so NATed requesters stay reachable
const PERSISTENT_KEEPALIVE: u16 = 60;

struct Inner {
    pool: IpPool,
    table: PeerTable,
}

/// Owner of the provider's tunnel interface and peer bookkeeping
pub struct VpnManager {
    config: ProviderConfig,
    server_public_key: String,
    inner: Mutex<Inner>,
}

impl VpnManager {
    /// Bring the provider's tunnel up and converge on the persisted state
    ///
    /// Reuses the server key from an existing configuration file, or
    /// generates a fresh pair and writes a scaffold. The interface is
    /// toggled down-then-up so stale state from a previous run never
    /// survives, then every persisted peer address is re-leased.
    pub async fn init(config: ProviderConfig, driver: Arc<dyn TunnelDriver>) -> Result<Self> {
        if let Some(dir) = config.config_path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        let private_key = if config.config_path.exists() {
            let file = WgConfigFile::load(&config.config_path)?;
            log::info!("reusing server key from {}", config.config_path.display());
            file.interface.private_key.ok_or_else(|| {
                Error::Config(format!(
                    "{} exists but carries no PrivateKey",
                    config.config_path.display()
                ))
            })?
        } else {
            log::info!("generating server key pair");
            let private_key = driver.generate_private_key().await?;
            let scaffold = WgConfigFile {
                interface: WgInterface {
                    address: vec![format!(
                        "{}/{}",
                        config.subnet.gateway(),
                        config.subnet.prefix_len()
                    )],
                    private_key: Some(private_key.clone()),
                    listen_port: Some(config.vpn_port),
                },
                peers: vec![],
            };
            scaffold.store_atomic(&config.config_path)?;
            private_key
        };

        let server_public_key = driver.derive_public_key(&private_key).await?;

        // Down first tolerates an interface left over from a crash.
        if let Err(e) = driver.interface_down(&config.config_path).await {
            log::debug!("pre-start interface down failed (ignored): {}", e);
        }
        driver.interface_up(&config.config_path).await?;

        let mut pool = IpPool::new(config.subnet);
        pool.lease(config.subnet.network())?;
        pool.lease(config.subnet.gateway())?;

        let table = PeerTable::load(
            config.config_path.clone(),
            config.interface(),
            driver.clone(),
        )?;
        for peer in table.all() {
            pool.ensure_leased(peer.ip)?;
        }

        log::info!(
            "provider up: {} on {}, {} peer(s), endpoint {}",
            config.subnet,
            config.interface(),
            table.len(),
            config.endpoint()
        );

        Ok(Self {
            config,
            server_public_key,
            inner: Mutex::new(Inner { pool, table }),
        })
    }

    /// The provider's announcement configuration
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// The server's public key, as handed to every peer
    pub fn server_public_key(&self) -> &str {
        &self.server_public_key
    }

    /// Admit a peer under a logical name and return its tunnel configuration
    ///
    /// Re-registration with the same key is idempotent and preserves the
    /// address. A different key rotates the record: the old address is
    /// released before a fresh one is allocated.
    pub async fn register_peer(&self, public_key: &str, name: &str) -> Result<TunnelConfig> {
        let mut inner = self.inner.lock().await;

        let existing = inner
            .table
            .get(name)
            .map(|p| (p.public_key.clone(), p.ip));

        if let Some((current_key, ip)) = existing {
            if current_key == public_key {
                log::debug!("peer {} re-registered with unchanged key", name);
                return Ok(self.tunnel_config(ip));
            }
            log::info!("peer {} rotating key, releasing {}", name, ip);
            if let Some(old) = inner.table.remove(name).await? {
                inner.pool.release(old.ip);
            }
        }

        // A key is one requester's identity; if it still hangs off another
        // name, that record is stale and would alias this one on the
        // interface.
        let holder = inner
            .table
            .all()
            .find(|p| p.public_key == public_key)
            .map(|p| p.name.clone());
        if let Some(holder) = holder {
            log::info!("key moved from {} to {}, dropping the old record", holder, name);
            if let Some(old) = inner.table.remove(&holder).await? {
                inner.pool.release(old.ip);
            }
        }

        let ip = inner.pool.allocate()?;
        let peer = Peer {
            name: name.to_string(),
            public_key: public_key.to_string(),
            ip,
        };
        if let Err(e) = inner.table.add(peer).await {
            // Never leak the address if the table could not take the peer.
            inner.pool.release(ip);
            return Err(e);
        }

        log::info!("peer {} registered at {}", name, ip);
        Ok(self.tunnel_config(ip))
    }

    /// Drop a peer and release its address
    pub async fn remove_peer(&self, name: &str) -> Result<Option<Peer>> {
        let mut inner = self.inner.lock().await;
        let removed = inner.table.remove(name).await?;
        if let Some(ref peer) = removed {
            inner.pool.release(peer.ip);
            log::info!("peer {} removed, {} released", name, peer.ip);
        }
        Ok(removed)
    }

    /// Overlay address of a peer, if registered
    pub async fn ip_for_name(&self, name: &str) -> Option<Ipv4Addr> {
        self.inner.lock().await.table.get(name).map(|p| p.ip)
    }

    /// Number of admitted peers
    pub async fn peer_count(&self) -> usize {
        self.inner.lock().await.table.len()
    }

    fn tunnel_config(&self, ip: Ipv4Addr) -> TunnelConfig {
        TunnelConfig {
            wg_interface: WgInterfaceConfig {
                address: vec![format!("{}/32", ip)],
                private_key: None,
            },
            peers: vec![WgPeerConfig {
                public_key: self.server_public_key.clone(),
                allowed_ips: vec![self.config.subnet.to_string()],
                endpoint: Some(self.config.endpoint()),
                persistent_keepalive: Some(PERSISTENT_KEEPALIVE),
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gate_api::ROOT_PEER;
    use gate_wg::MockDriver;
    use std::collections::HashMap;

    fn test_config(dir: &tempfile::TempDir) -> ProviderConfig {
        let vars: HashMap<&str, String> = HashMap::from([
            ("VPN_IP_RANGE", "10.0.0.0/24".to_string()),
            ("VPN_PORT", "51820".to_string()),
            ("VPN_ENDPOINT_ANNOUNCE", "gw.example.com".to_string()),
            ("PROVIDER_ANNONCE_DOMAIN", "example.com".to_string()),
            ("PROVIDER_ROUTE_IP", "192.168.1.5".to_string()),
            (
                "VPN_CONFIG_PATH",
                dir.path().join("wggate.conf").to_string_lossy().into_owned(),
            ),
        ]);
        ProviderConfig::from_lookup(|key| vars.get(key).cloned()).unwrap()
    }

    async fn manager(dir: &tempfile::TempDir) -> (VpnManager, Arc<MockDriver>) {
        let driver = Arc::new(MockDriver::new());
        let manager = VpnManager::init(test_config(dir), driver.clone())
            .await
            .unwrap();
        (manager, driver)
    }

    #[tokio::test]
    async fn test_first_registration_gets_first_free_host() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, _) = manager(&dir).await;

        let config = manager.register_peer("pkA", "alice").await.unwrap();
        assert_eq!(config.wg_interface.address, vec!["10.0.0.2/32"]);

        let peer = &config.peers[0];
        assert_eq!(peer.public_key, manager.server_public_key());
        assert_eq!(peer.allowed_ips, vec!["10.0.0.0/24"]);
        assert_eq!(peer.endpoint.as_deref(), Some("gw.example.com:51820"));
        assert_eq!(peer.persistent_keepalive, Some(60));

        assert_eq!(
            manager.ip_for_name("alice").await,
            Some(Ipv4Addr::new(10, 0, 0, 2))
        );
    }

    #[tokio::test]
    async fn test_reregistration_with_same_key_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, _) = manager(&dir).await;

        let first = manager.register_peer("pkA", "alice").await.unwrap();
        let second = manager.register_peer("pkA", "alice").await.unwrap();
        assert_eq!(first.wg_interface.address, second.wg_interface.address);
        assert_eq!(manager.peer_count().await, 1);
    }

    #[tokio::test]
    async fn test_key_rotation_releases_the_old_address() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, _) = manager(&dir).await;

        manager.register_peer("pkA", "alice").await.unwrap();
        let rotated = manager.register_peer("pkA2", "alice").await.unwrap();
        assert_eq!(rotated.wg_interface.address, vec!["10.0.0.3/32"]);
        assert_eq!(manager.peer_count().await, 1);

        // The released .2 is the next allocation
        let bob = manager.register_peer("pkB", "bob").await.unwrap();
        assert_eq!(bob.wg_interface.address, vec!["10.0.0.2/32"]);
    }

    #[tokio::test]
    async fn test_file_is_authoritative_across_restart() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);

        {
            let driver = Arc::new(MockDriver::new());
            let manager = VpnManager::init(config.clone(), driver).await.unwrap();
            manager.register_peer("pkA", "alice").await.unwrap();
            manager.register_peer("pkB", "bob").await.unwrap();
        }

        // A second manager over the same file sees both peers and does not
        // re-allocate their addresses.
        let driver = Arc::new(MockDriver::new());
        let manager = VpnManager::init(config, driver).await.unwrap();
        assert_eq!(manager.peer_count().await, 2);
        assert_eq!(
            manager.ip_for_name("alice").await,
            Some(Ipv4Addr::new(10, 0, 0, 2))
        );

        let carol = manager.register_peer("pkC", "carol").await.unwrap();
        assert_eq!(carol.wg_interface.address, vec!["10.0.0.4/32"]);
    }

    #[tokio::test]
    async fn test_key_is_unique_across_names() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, _) = manager(&dir).await;

        manager.register_peer("pkA", "alice").await.unwrap();
        // The same requester re-registers under a new name: the stale
        // record must not keep holding the key (or its address)
        manager.register_peer("pkA", "aliased").await.unwrap();

        assert_eq!(manager.peer_count().await, 1);
        assert_eq!(manager.ip_for_name("alice").await, None);
        assert_eq!(
            manager.ip_for_name("aliased").await,
            Some(Ipv4Addr::new(10, 0, 0, 2))
        );
    }

    #[tokio::test]
    async fn test_root_peer_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, _) = manager(&dir).await;

        assert_eq!(manager.ip_for_name(ROOT_PEER).await, None);
        manager.register_peer("pkR", ROOT_PEER).await.unwrap();
        assert_eq!(
            manager.ip_for_name(ROOT_PEER).await,
            Some(Ipv4Addr::new(10, 0, 0, 2))
        );
    }

    #[tokio::test]
    async fn test_exhausted_pool_surfaces() {
        let dir = tempfile::tempdir().unwrap();
        let vars: HashMap<&str, String> = HashMap::from([
            ("VPN_IP_RANGE", "10.0.0.0/30".to_string()),
            ("VPN_PORT", "51820".to_string()),
            ("VPN_ENDPOINT_ANNOUNCE", "gw.example.com".to_string()),
            ("PROVIDER_ANNONCE_DOMAIN", "example.com".to_string()),
            ("PROVIDER_ROUTE_IP", "192.168.1.5".to_string()),
            (
                "VPN_CONFIG_PATH",
                dir.path().join("wggate.conf").to_string_lossy().into_owned(),
            ),
        ]);
        let config = ProviderConfig::from_lookup(|key| vars.get(key).cloned()).unwrap();
        let manager = VpnManager::init(config, Arc::new(MockDriver::new()))
            .await
            .unwrap();

        manager.register_peer("pkA", "alice").await.unwrap();
        let err = manager.register_peer("pkB", "bob").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Pool(gate_net::Error::ExhaustedPool)
        ));
    }

    #[tokio::test]
    async fn test_startup_toggles_interface() {
        let dir = tempfile::tempdir().unwrap();
        let (_, driver) = manager(&dir).await;

        let calls = driver.calls();
        let down = calls.iter().position(|c| c.starts_with("down"));
        let up = calls.iter().position(|c| c.starts_with("up"));
        assert!(down.unwrap() < up.unwrap());
    }
}
