//! Durable peer table
//!
//! The tunnel configuration file is the authoritative store: the table is
//! rebuilt from it on startup and re-serialized into it after every
//! mutation. Mutations also reach the live interface through the driver,
//! so a registration takes effect without restarting the tunnel.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;

use ipnet::Ipv4Net;

use gate_wg::{TunnelDriver, WgConfigFile, WgInterface, WgPeerSection};

use crate::error::Result;

/// Authoritative record for one admitted peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub name: String,
    pub public_key: String,
    pub ip: Ipv4Addr,
}

/// In-memory peer map backed by the tunnel configuration file
pub struct PeerTable {
    config_path: PathBuf,
    iface: String,
    interface: WgInterface,
    peers: HashMap<String, Peer>,
    driver: Arc<dyn TunnelDriver>,
}

impl PeerTable {
    /// Rebuild the table from the configuration file
    ///
    /// Peer sections without a name comment or a /32 allowed address do
    /// not belong to the admission plane; they are skipped with a warning
    /// and dropped from the next rewrite.
    pub fn load(config_path: PathBuf, iface: String, driver: Arc<dyn TunnelDriver>) -> Result<Self> {
        let file = WgConfigFile::load(&config_path)?;
        let mut peers = HashMap::new();

        for section in file.peers {
            let Some(name) = section.name.clone() else {
                log::warn!("skipping unnamed peer section ({})", section.public_key);
                continue;
            };
            let Some(ip) = first_host_address(&section) else {
                log::warn!("skipping peer {} without a /32 allowed address", name);
                continue;
            };
            peers.insert(
                name.clone(),
                Peer {
                    name,
                    public_key: section.public_key,
                    ip,
                },
            );
        }

        log::info!("loaded {} peer(s) from {}", peers.len(), config_path.display());

        Ok(Self {
            config_path,
            iface,
            interface: file.interface,
            peers,
            driver,
        })
    }

    pub fn get(&self, name: &str) -> Option<&Peer> {
        self.peers.get(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.peers.contains_key(name)
    }

    pub fn all(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Add a peer: map, live interface, then file
    pub async fn add(&mut self, peer: Peer) -> Result<()> {
        let allowed = Ipv4Net::new(peer.ip, 32).expect("/32 is always a valid prefix");
        self.driver
            .add_peer(&self.iface, &peer.public_key, &[allowed])
            .await?;
        self.peers.insert(peer.name.clone(), peer);
        self.persist()?;
        Ok(())
    }

    /// Remove a peer: map, live interface, then file
    ///
    /// Returns the removed record so the caller can release its address.
    pub async fn remove(&mut self, name: &str) -> Result<Option<Peer>> {
        let Some(peer) = self.peers.remove(name) else {
            return Ok(None);
        };
        if let Err(e) = self.driver.remove_peer(&self.iface, &peer.public_key).await {
            // The interface may already have dropped the peer (e.g. after a
            // restart); the file stays authoritative either way.
            log::warn!("removing peer {} from interface failed: {}", name, e);
        }
        self.persist()?;
        Ok(Some(peer))
    }

    /// Re-serialize the table into the configuration file atomically
    fn persist(&self) -> Result<()> {
        let mut sections: Vec<WgPeerSection> = self
            .peers
            .values()
            .map(|peer| WgPeerSection {
                name: Some(peer.name.clone()),
                public_key: peer.public_key.clone(),
                allowed_ips: vec![format!("{}/32", peer.ip)],
                endpoint: None,
                persistent_keepalive: None,
            })
            .collect();
        sections.sort_by(|a, b| a.allowed_ips.cmp(&b.allowed_ips));

        let file = WgConfigFile {
            interface: self.interface.clone(),
            peers: sections,
        };
        file.store_atomic(&self.config_path)?;
        Ok(())
    }
}

/// First /32 allowed address of a peer section
fn first_host_address(section: &WgPeerSection) -> Option<Ipv4Addr> {
    section.allowed_ips.iter().find_map(|raw| {
        let net: Ipv4Net = raw.parse().ok()?;
        (net.prefix_len() == 32).then(|| net.addr())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gate_wg::MockDriver;

    fn seed_file(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("wggate.conf");
        let file = WgConfigFile {
            interface: WgInterface {
                address: vec!["10.0.0.1/24".to_string()],
                private_key: Some("serverpriv".to_string()),
                listen_port: Some(51820),
            },
            peers: vec![],
        };
        file.store_atomic(&path).unwrap();
        path
    }

    fn peer(name: &str, pk: &str, ip: [u8; 4]) -> Peer {
        Peer {
            name: name.to_string(),
            public_key: pk.to_string(),
            ip: Ipv4Addr::from(ip),
        }
    }

    #[tokio::test]
    async fn test_add_reaches_interface_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = seed_file(&dir);
        let driver = Arc::new(MockDriver::new());

        let mut table =
            PeerTable::load(path.clone(), "wggate".to_string(), driver.clone()).unwrap();
        table.add(peer("alice", "pk-a", [10, 0, 0, 2])).await.unwrap();

        assert!(table.has("alice"));
        assert_eq!(driver.calls(), vec!["add-peer wggate pk-a 10.0.0.2/32"]);

        let reloaded = WgConfigFile::load(&path).unwrap();
        assert_eq!(reloaded.peers.len(), 1);
        assert_eq!(reloaded.peers[0].name.as_deref(), Some("alice"));
        assert_eq!(reloaded.peers[0].allowed_ips, vec!["10.0.0.2/32"]);
        // The interface section survives rewrites untouched
        assert_eq!(reloaded.interface.private_key.as_deref(), Some("serverpriv"));
    }

    #[tokio::test]
    async fn test_file_reload_matches_memory() {
        let dir = tempfile::tempdir().unwrap();
        let path = seed_file(&dir);
        let driver = Arc::new(MockDriver::new());

        let mut table =
            PeerTable::load(path.clone(), "wggate".to_string(), driver.clone()).unwrap();
        table.add(peer("alice", "pk-a", [10, 0, 0, 2])).await.unwrap();
        table.add(peer("bob", "pk-b", [10, 0, 0, 3])).await.unwrap();
        table.remove("alice").await.unwrap();

        let reloaded =
            PeerTable::load(path, "wggate".to_string(), driver).unwrap();
        assert_eq!(reloaded.len(), table.len());
        assert_eq!(reloaded.get("bob"), table.get("bob"));
        assert!(!reloaded.has("alice"));
    }

    #[tokio::test]
    async fn test_remove_unknown_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let path = seed_file(&dir);
        let driver = Arc::new(MockDriver::new());

        let mut table = PeerTable::load(path, "wggate".to_string(), driver.clone()).unwrap();
        assert!(table.remove("ghost").await.unwrap().is_none());
        assert!(driver.calls().is_empty());
    }

    #[tokio::test]
    async fn test_load_skips_unnamed_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wggate.conf");
        std::fs::write(
            &path,
            "[Interface]\nPrivateKey = k\n\n[Peer]\nPublicKey = stray\nAllowedIPs = 10.0.0.9/32\n\n# Name: alice\n[Peer]\nPublicKey = pk-a\nAllowedIPs = 10.0.0.2/32\n",
        )
        .unwrap();

        let table =
            PeerTable::load(path, "wggate".to_string(), Arc::new(MockDriver::new())).unwrap();
        assert_eq!(table.len(), 1);
        assert!(table.has("alice"));
    }
}
