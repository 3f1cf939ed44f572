//! Command-line WireGuard driver
//!
//! Executes `wg` and `wg-quick` to manage interfaces and peers. Commands
//! are spawned directly (never through a shell), so argument values reach
//! the toolchain verbatim. Peer keys arriving over the network must pass
//! [`is_valid_wg_key`] before they are handed to the driver.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use ipnet::Ipv4Net;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{Error, Result};

/// Capability facade over the host tunnel toolchain
#[async_trait]
pub trait TunnelDriver: Send + Sync {
    /// Generate a fresh private key
    async fn generate_private_key(&self) -> Result<String>;

    /// Derive the public key for a private key
    async fn derive_public_key(&self, private_key: &str) -> Result<String>;

    /// Bring the interface described by a wg-quick config file up
    async fn interface_up(&self, config: &Path) -> Result<()>;

    /// Bring the interface described by a wg-quick config file down
    async fn interface_down(&self, config: &Path) -> Result<()>;

    /// Add or update a peer on a live interface
    async fn add_peer(&self, iface: &str, public_key: &str, allowed_ips: &[Ipv4Net])
        -> Result<()>;

    /// Remove a peer from a live interface
    async fn remove_peer(&self, iface: &str, public_key: &str) -> Result<()>;

    /// Last-handshake epoch seconds per peer public key (0 = never)
    async fn latest_handshakes(&self, iface: &str) -> Result<HashMap<String, u64>>;
}

/// Whether a string looks like a WireGuard key in base64 form
///
/// Curve25519 keys encode to exactly 44 base64 characters ending in `=`.
/// This is the gate between untrusted registration input and the `wg`
/// command line.
pub fn is_valid_wg_key(s: &str) -> bool {
    s.len() == 44
        && s.ends_with('=')
        && s[..43]
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/')
}

/// Driver that shells out to `wg` and `wg-quick`
pub struct WgDriver {
    wg_path: String,
    wg_quick_path: String,
}

impl WgDriver {
    /// Create a driver using the commands from `PATH`
    pub fn new() -> Self {
        Self {
            wg_path: "wg".to_string(),
            wg_quick_path: "wg-quick".to_string(),
        }
    }

    /// Create a driver with explicit command paths
    pub fn with_paths(wg_path: impl Into<String>, wg_quick_path: impl Into<String>) -> Self {
        Self {
            wg_path: wg_path.into(),
            wg_quick_path: wg_quick_path.into(),
        }
    }

    /// Run a command and return its stdout, surfacing non-zero exits
    async fn exec(&self, program: &str, args: &[&str]) -> Result<String> {
        log::debug!("exec: {} {}", program, args.join(" "));

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| Error::Spawn {
                program: program.to_string(),
                source: e,
            })?;

        if !output.status.success() {
            return Err(Error::Command {
                program: program.to_string(),
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Run a command, feeding `input` to its stdin
    async fn exec_with_stdin(&self, program: &str, args: &[&str], input: &str) -> Result<String> {
        log::debug!("exec (stdin): {} {}", program, args.join(" "));

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Spawn {
                program: program.to_string(),
                source: e,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input.as_bytes()).await?;
            // Closing stdin lets the tool finish reading
            drop(stdin);
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(Error::Command {
                program: program.to_string(),
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn config_arg(config: &Path) -> Result<&str> {
        config
            .to_str()
            .ok_or_else(|| Error::Parse(format!("non-UTF-8 config path: {}", config.display())))
    }
}

impl Default for WgDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TunnelDriver for WgDriver {
    async fn generate_private_key(&self) -> Result<String> {
        let out = self.exec(&self.wg_path, &["genkey"]).await?;
        Ok(out.trim().to_string())
    }

    async fn derive_public_key(&self, private_key: &str) -> Result<String> {
        let out = self
            .exec_with_stdin(&self.wg_path, &["pubkey"], private_key)
            .await?;
        Ok(out.trim().to_string())
    }

    async fn interface_up(&self, config: &Path) -> Result<()> {
        self.exec(&self.wg_quick_path, &["up", Self::config_arg(config)?])
            .await?;
        Ok(())
    }

    async fn interface_down(&self, config: &Path) -> Result<()> {
        self.exec(&self.wg_quick_path, &["down", Self::config_arg(config)?])
            .await?;
        Ok(())
    }

    async fn add_peer(
        &self,
        iface: &str,
        public_key: &str,
        allowed_ips: &[Ipv4Net],
    ) -> Result<()> {
        let ips = allowed_ips
            .iter()
            .map(|n| n.to_string())
            .collect::<Vec<_>>()
            .join(",");
        self.exec(
            &self.wg_path,
            &["set", iface, "peer", public_key, "allowed-ips", &ips],
        )
        .await?;
        Ok(())
    }

    async fn remove_peer(&self, iface: &str, public_key: &str) -> Result<()> {
        self.exec(&self.wg_path, &["set", iface, "peer", public_key, "remove"])
            .await?;
        Ok(())
    }

    async fn latest_handshakes(&self, iface: &str) -> Result<HashMap<String, u64>> {
        let out = self
            .exec(&self.wg_path, &["show", iface, "latest-handshakes"])
            .await?;
        parse_handshake_dump(&out)
    }
}

/// Parse `wg show <if> latest-handshakes` output: one `<key>\t<epoch>` per line
fn parse_handshake_dump(out: &str) -> Result<HashMap<String, u64>> {
    let mut handshakes = HashMap::new();
    for line in out.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split_whitespace();
        let key = fields
            .next()
            .ok_or_else(|| Error::Parse(format!("malformed handshake line: {:?}", line)))?;
        let epoch: u64 = fields
            .next()
            .and_then(|f| f.parse().ok())
            .ok_or_else(|| Error::Parse(format!("malformed handshake line: {:?}", line)))?;
        handshakes.insert(key.to_string(), epoch);
    }
    Ok(handshakes)
}
