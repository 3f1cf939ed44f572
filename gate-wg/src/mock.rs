//! In-memory tunnel driver for tests
//!
//! Records every verb it is asked to perform and serves canned handshake
//! data, so control-plane logic can be exercised without a WireGuard
//! toolchain on the host.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use ipnet::Ipv4Net;

use crate::driver::TunnelDriver;
use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct MockState {
    key_counter: u32,
    calls: Vec<String>,
    handshakes: HashMap<String, HashMap<String, u64>>,
    fail_interface_ops: bool,
}

/// Recording driver; see the crate docs of the real [`crate::WgDriver`]
/// for the verbs it mirrors
#[derive(Debug, Default)]
pub struct MockDriver {
    state: Mutex<MockState>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every verb performed so far, in order, formatted one per entry
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Set the handshake map returned for an interface
    pub fn set_handshakes(&self, iface: &str, handshakes: HashMap<String, u64>) {
        self.state
            .lock()
            .unwrap()
            .handshakes
            .insert(iface.to_string(), handshakes);
    }

    /// Make `interface_up` / `interface_down` fail
    pub fn fail_interface_ops(&self, fail: bool) {
        self.state.lock().unwrap().fail_interface_ops = fail;
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl TunnelDriver for MockDriver {
    async fn generate_private_key(&self) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.key_counter += 1;
        let key = format!("priv-{}", state.key_counter);
        state.calls.push(format!("genkey {}", key));
        Ok(key)
    }

    async fn derive_public_key(&self, private_key: &str) -> Result<String> {
        Ok(format!("{}-pub", private_key))
    }

    async fn interface_up(&self, config: &Path) -> Result<()> {
        if self.state.lock().unwrap().fail_interface_ops {
            return Err(Error::Command {
                program: "wg-quick".to_string(),
                code: 1,
                stderr: "mock failure".to_string(),
            });
        }
        self.record(format!("up {}", config.display()));
        Ok(())
    }

    async fn interface_down(&self, config: &Path) -> Result<()> {
        if self.state.lock().unwrap().fail_interface_ops {
            return Err(Error::Command {
                program: "wg-quick".to_string(),
                code: 1,
                stderr: "mock failure".to_string(),
            });
        }
        self.record(format!("down {}", config.display()));
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
        self.record(format!("add-peer {} {} {}", iface, public_key, ips));
        Ok(())
    }

    async fn remove_peer(&self, iface: &str, public_key: &str) -> Result<()> {
        self.record(format!("remove-peer {} {}", iface, public_key));
        Ok(())
    }

    async fn latest_handshakes(&self, iface: &str) -> Result<HashMap<String, u64>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .handshakes
            .get(iface)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_records_calls() {
        let driver = MockDriver::new();
        driver
            .add_peer("wg0", "pk", &["10.0.0.2/32".parse().unwrap()])
            .await
            .unwrap();
        driver.remove_peer("wg0", "pk").await.unwrap();

        assert_eq!(
            driver.calls(),
            vec!["add-peer wg0 pk 10.0.0.2/32", "remove-peer wg0 pk"]
        );
    }

    #[tokio::test]
    async fn test_mock_keys_are_consistent() {
        let driver = MockDriver::new();
        let a = driver.generate_private_key().await.unwrap();
        let b = driver.generate_private_key().await.unwrap();
        assert_ne!(a, b);
        assert_eq!(driver.derive_public_key(&a).await.unwrap(), format!("{}-pub", a));
    }
}
