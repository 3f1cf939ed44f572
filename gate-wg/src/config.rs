//! wg-quick configuration file model
//!
//! Both roles persist their tunnels as wg-quick files; on the provider the
//! file doubles as the authoritative peer store. wg-quick has no notion of
//! a peer name, so logical names are kept as `# Name: <name>` comment
//! lines inside the peer section they describe.

use std::fmt::Write as _;
use std::io::Write as _;
use std::path::Path;

use crate::error::{Error, Result};

const NAME_COMMENT: &str = "# Name:";

/// The `[Interface]` section of a wg-quick file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WgInterface {
    /// Interface addresses in CIDR form
    pub address: Vec<String>,
    /// Private key (absent only in templates that have not been completed)
    pub private_key: Option<String>,
    /// UDP listen port (providers listen; requesters pick an ephemeral port)
    pub listen_port: Option<u16>,
}

/// One `[Peer]` section of a wg-quick file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WgPeerSection {
    /// Logical peer name, persisted as a comment
    pub name: Option<String>,
    pub public_key: String,
    pub allowed_ips: Vec<String>,
    pub endpoint: Option<String>,
    pub persistent_keepalive: Option<u16>,
}

/// A complete wg-quick configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WgConfigFile {
    pub interface: WgInterface,
    pub peers: Vec<WgPeerSection>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    Interface,
    Peer,
}

impl WgConfigFile {
    /// Parse a wg-quick document
    pub fn parse(content: &str) -> Result<Self> {
        let mut config = WgConfigFile::default();
        let mut section = Section::None;
        let mut pending_name: Option<String> = None;

        for (lineno, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(name) = line.strip_prefix(NAME_COMMENT) {
                pending_name = Some(name.trim().to_string());
                continue;
            }
            if line.starts_with('#') {
                continue;
            }

            match line {
                "[Interface]" => {
                    section = Section::Interface;
                    continue;
                }
                "[Peer]" => {
                    section = Section::Peer;
                    config.peers.push(WgPeerSection {
                        name: pending_name.take(),
                        ..Default::default()
                    });
                    continue;
                }
                _ => {}
            }

            let (key, value) = line.split_once('=').ok_or_else(|| {
                Error::Parse(format!("line {}: expected `Key = Value`", lineno + 1))
            })?;
            let key = key.trim();
            let value = value.trim();

            match section {
                Section::None => {
                    return Err(Error::Parse(format!(
                        "line {}: `{}` outside any section",
                        lineno + 1,
                        key
                    )));
                }
                Section::Interface => match key {
                    "Address" => {
                        config
                            .interface
                            .address
                            .extend(value.split(',').map(|v| v.trim().to_string()));
                    }
                    "PrivateKey" => config.interface.private_key = Some(value.to_string()),
                    "ListenPort" => {
                        config.interface.listen_port = Some(value.parse().map_err(|_| {
                            Error::Parse(format!("line {}: bad ListenPort", lineno + 1))
                        })?);
                    }
                    other => log::debug!("ignoring interface key {}", other),
                },
                Section::Peer => {
                    // A `[Peer]` line always precedes peer keys, so the vec
                    // is non-empty here.
                    let peer = config.peers.last_mut().unwrap();
                    match key {
                        "PublicKey" => peer.public_key = value.to_string(),
                        "AllowedIPs" => {
                            peer.allowed_ips
                                .extend(value.split(',').map(|v| v.trim().to_string()));
                        }
                        "Endpoint" => peer.endpoint = Some(value.to_string()),
                        "PersistentKeepalive" => {
                            peer.persistent_keepalive = Some(value.parse().map_err(|_| {
                                Error::Parse(format!(
                                    "line {}: bad PersistentKeepalive",
                                    lineno + 1
                                ))
                            })?);
                        }
                        other => log::debug!("ignoring peer key {}", other),
                    }
                }
            }
        }

        Ok(config)
    }

    /// Load and parse a wg-quick file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Render the document
    pub fn render(&self) -> String {
        let mut out = String::new();

        writeln!(out, "[Interface]").unwrap();
        if !self.interface.address.is_empty() {
            writeln!(out, "Address = {}", self.interface.address.join(", ")).unwrap();
        }
        if let Some(ref key) = self.interface.private_key {
            writeln!(out, "PrivateKey = {}", key).unwrap();
        }
        if let Some(port) = self.interface.listen_port {
            writeln!(out, "ListenPort = {}", port).unwrap();
        }

        for peer in &self.peers {
            writeln!(out).unwrap();
            if let Some(ref name) = peer.name {
                writeln!(out, "{} {}", NAME_COMMENT, name).unwrap();
            }
            writeln!(out, "[Peer]").unwrap();
            writeln!(out, "PublicKey = {}", peer.public_key).unwrap();
            if !peer.allowed_ips.is_empty() {
                writeln!(out, "AllowedIPs = {}", peer.allowed_ips.join(", ")).unwrap();
            }
            if let Some(ref endpoint) = peer.endpoint {
                writeln!(out, "Endpoint = {}", endpoint).unwrap();
            }
            if let Some(keepalive) = peer.persistent_keepalive {
                writeln!(out, "PersistentKeepalive = {}", keepalive).unwrap();
            }
        }

        out
    }

    /// Write the document atomically (write-temp-then-rename, 0600)
    ///
    /// A crash mid-write leaves either the previous file or the new one,
    /// never a torn document.
    pub fn store_atomic(&self, path: &Path) -> Result<()> {
        let dir = path.parent().ok_or_else(|| {
            Error::Parse(format!("config path {} has no parent", path.display()))
        })?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(self.render().as_bytes())?;
        tmp.flush()?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(0o600))?;
        }

        tmp.persist(path)
            .map_err(|e| Error::Io(e.error))?;
        Ok(())
    }
}
