//! Per-provider long-term key pairs
//!
//! Every provider URL maps to one key pair generated on first use and
//! reused forever after. Files live under the state directory and are
//! named by a stable tag derived from the URL; the same tag names the
//! provider's tunnel config, which keeps the wg-quick interface name
//! within the kernel's 15-character limit.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use url::Url;

use gate_wg::TunnelDriver;

use crate::error::Result;

/// A WireGuard key pair in base64 form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub private_key: String,
    pub public_key: String,
}

/// On-disk cache of per-provider key pairs
pub struct KeyStore {
    dir: PathBuf,
    driver: Arc<dyn TunnelDriver>,
}

/// Stable 8-hex-digit tag for a provider URL
pub fn provider_tag(backend_url: &Url) -> String {
    let digest = Sha256::digest(backend_url.as_str().as_bytes());
    digest[..4].iter().map(|b| format!("{:02x}", b)).collect()
}

impl KeyStore {
    pub fn new(dir: PathBuf, driver: Arc<dyn TunnelDriver>) -> Self {
        Self { dir, driver }
    }

    /// Name of the tunnel interface for a provider (`wgr` + tag)
    pub fn interface(backend_url: &Url) -> String {
        format!("wgr{}", provider_tag(backend_url))
    }

    /// Path of the provider's tunnel config file
    pub fn config_path(&self, backend_url: &Url) -> PathBuf {
        self.dir.join(format!("{}.conf", Self::interface(backend_url)))
    }

    fn private_key_path(&self, backend_url: &Url) -> PathBuf {
        self.dir.join(format!("{}.key", Self::interface(backend_url)))
    }

    fn public_key_path(&self, backend_url: &Url) -> PathBuf {
        self.dir.join(format!("{}.pub", Self::interface(backend_url)))
    }

    /// Load the provider's key pair, generating it on first use
    ///
    /// A stored pair whose public half no longer matches its private half
    /// is discarded and regenerated.
    pub async fn get_or_generate(&self, backend_url: &Url) -> Result<KeyPair> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let private_path = self.private_key_path(backend_url);
        let public_path = self.public_key_path(backend_url);

        if let (Ok(private_key), Ok(public_key)) = (
            tokio::fs::read_to_string(&private_path).await,
            tokio::fs::read_to_string(&public_path).await,
        ) {
            let private_key = private_key.trim().to_string();
            let public_key = public_key.trim().to_string();
            let derived = self.driver.derive_public_key(&private_key).await?;
            if derived == public_key {
                return Ok(KeyPair {
                    private_key,
                    public_key,
                });
            }
            log::warn!(
                "stored key pair for {} is inconsistent, regenerating",
                backend_url
            );
        }

        let private_key = self.driver.generate_private_key().await?;
        let public_key = self.driver.derive_public_key(&private_key).await?;

        write_secret(&private_path, &private_key).await?;
        write_secret(&public_path, &public_key).await?;
        log::info!("generated key pair for {}", backend_url);

        Ok(KeyPair {
            private_key,
            public_key,
        })
    }
}

/// Write a key file with owner-only permissions
async fn write_secret(path: &Path, value: &str) -> Result<()> {
    tokio::fs::write(path, format!("{}\n", value)).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gate_wg::MockDriver;

    fn backend() -> Url {
        Url::parse("https://gateway.example.com").unwrap()
    }

    #[test]
    fn test_tag_is_stable_and_short() {
        let a = provider_tag(&backend());
        let b = provider_tag(&backend());
        assert_eq!(a, b);
        assert_eq!(a.len(), 8);

        let other = provider_tag(&Url::parse("https://other.example.com").unwrap());
        assert_ne!(a, other);

        let iface = KeyStore::interface(&backend());
        assert!(iface.len() <= 15);
        assert!(iface.starts_with("wgr"));
    }

    #[tokio::test]
    async fn test_generates_once_and_reuses() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(dir.path().to_path_buf(), Arc::new(MockDriver::new()));

        let first = store.get_or_generate(&backend()).await.unwrap();
        let second = store.get_or_generate(&backend()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.public_key, format!("{}-pub", first.private_key));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(dir.path().join(format!(
                "{}.key",
                KeyStore::interface(&backend())
            )))
            .unwrap()
            .permissions()
            .mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[tokio::test]
    async fn test_regenerates_on_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(dir.path().to_path_buf(), Arc::new(MockDriver::new()));

        let first = store.get_or_generate(&backend()).await.unwrap();

        // Corrupt the public half
        let public_path = dir
            .path()
            .join(format!("{}.pub", KeyStore::interface(&backend())));
        std::fs::write(&public_path, "tampered\n").unwrap();

        let second = store.get_or_generate(&backend()).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(second.public_key, format!("{}-pub", second.private_key));
    }

    #[tokio::test]
    async fn test_distinct_providers_get_distinct_pairs() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(dir.path().to_path_buf(), Arc::new(MockDriver::new()));

        let a = store.get_or_generate(&backend()).await.unwrap();
        let b = store
            .get_or_generate(&Url::parse("https://other.example.com").unwrap())
            .await
            .unwrap();
        assert_ne!(a, b);
    }
}
