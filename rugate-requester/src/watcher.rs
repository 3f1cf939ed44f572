//! Handshake liveness watcher
//!
//! WireGuard exposes the instant of each peer's last completed handshake;
//! a tunnel that stops handshaking is dead even though the interface
//! still exists. One background task polls every watched interface and
//! emits a restart event for the owning provider when a peer has been
//! silent past the threshold. The supervisor reacts with a stop+start
//! cycle for exactly that provider.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use gate_wg::TunnelDriver;

#[derive(Debug, Clone)]
struct WatchEntry {
    iface: String,
    /// Grace baseline: a peer that has never handshaken (epoch 0) is
    /// measured from this instant instead, and the entry is re-armed
    /// after every emitted event so a slow restart is not re-flagged
    /// every poll.
    armed_at: u64,
}

/// Watches handshake timestamps and flags silent tunnels
pub struct HandshakeWatcher {
    driver: Arc<dyn TunnelDriver>,
    threshold: Duration,
    poll_interval: Duration,
    entries: Arc<Mutex<HashMap<String, WatchEntry>>>,
    events_tx: mpsc::UnboundedSender<String>,
    task: Mutex<Option<JoinHandle<()>>>,
}

fn now_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl HandshakeWatcher {
    /// Create a watcher and the receiving end of its restart events
    pub fn new(
        driver: Arc<dyn TunnelDriver>,
        threshold: Duration,
        poll_interval: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        (
            Self {
                driver,
                threshold,
                poll_interval,
                entries: Arc::new(Mutex::new(HashMap::new())),
                events_tx,
                task: Mutex::new(None),
            },
            events_rx,
        )
    }

    /// Watch a provider's interface; idempotent
    pub fn watch(&self, provider: &str, iface: &str) {
        self.entries.lock().unwrap().insert(
            provider.to_string(),
            WatchEntry {
                iface: iface.to_string(),
                armed_at: now_epoch(),
            },
        );
        log::debug!("watching handshakes on {}", iface);
    }

    /// Stop watching a provider; idempotent
    pub fn unwatch(&self, provider: &str) {
        if self.entries.lock().unwrap().remove(provider).is_some() {
            log::debug!("unwatched {}", provider);
        }
    }

    /// Whether the poll task is running
    pub fn is_running(&self) -> bool {
        self.task.lock().unwrap().is_some()
    }

    /// Start the poll task; idempotent
    pub fn start(&self) {
        let mut task = self.task.lock().unwrap();
        if task.is_some() {
            return;
        }

        let driver = self.driver.clone();
        let threshold = self.threshold;
        let poll_interval = self.poll_interval;
        let entries = self.entries.clone();
        let events_tx = self.events_tx.clone();

        *task = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(poll_interval).await;

                let snapshot: Vec<(String, WatchEntry)> = entries
                    .lock()
                    .unwrap()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();

                for (provider, entry) in snapshot {
                    let handshakes = match driver.latest_handshakes(&entry.iface).await {
                        Ok(handshakes) => handshakes,
                        Err(e) => {
                            // Surfaced but never stops the watcher
                            log::warn!("handshake read on {} failed: {}", entry.iface, e);
                            continue;
                        }
                    };

                    let now = now_epoch();
                    let stale = handshakes.iter().any(|(_, &epoch)| {
                        let last_seen = epoch.max(entry.armed_at);
                        now.saturating_sub(last_seen) > threshold.as_secs()
                    });

                    if stale {
                        log::warn!(
                            "no handshake on {} within {}s, flagging restart",
                            entry.iface,
                            threshold.as_secs()
                        );
                        if let Some(entry) = entries.lock().unwrap().get_mut(&provider) {
                            entry.armed_at = now;
                        }
                        let _ = events_tx.send(provider);
                    }
                }
            }
        }));
        log::info!("handshake watcher started");
    }

    /// Stop the poll task; idempotent
    pub fn stop(&self) {
        if let Some(task) = self.task.lock().unwrap().take() {
            task.abort();
            log::info!("handshake watcher stopped");
        }
    }

    /// Stop the task and forget every watched interface
    pub fn close(&self) {
        self.stop();
        self.entries.lock().unwrap().clear();
    }

    #[cfg(test)]
    fn backdate(&self, provider: &str, secs: u64) {
        if let Some(entry) = self.entries.lock().unwrap().get_mut(provider) {
            entry.armed_at = now_epoch().saturating_sub(secs);
        }
    }
}

impl Drop for HandshakeWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gate_wg::MockDriver;
    use std::collections::HashMap as Map;

    fn watcher(
        driver: Arc<MockDriver>,
        threshold: Duration,
    ) -> (HandshakeWatcher, mpsc::UnboundedReceiver<String>) {
        HandshakeWatcher::new(driver, threshold, Duration::from_millis(20))
    }

    #[tokio::test]
    async fn test_stale_handshake_emits_restart() {
        let driver = Arc::new(MockDriver::new());
        driver.set_handshakes("wgr0", Map::from([("pk".to_string(), 1_000u64)]));

        let (watcher, mut events) = watcher(driver.clone(), Duration::from_secs(30));
        watcher.watch("provider-a", "wgr0");
        watcher.backdate("provider-a", 120);
        watcher.start();

        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("watcher should emit within one period")
            .unwrap();
        assert_eq!(event, "provider-a");
    }

    #[tokio::test]
    async fn test_fresh_tunnel_gets_grace() {
        let driver = Arc::new(MockDriver::new());
        // Never handshaken: wg reports epoch 0
        driver.set_handshakes("wgr0", Map::from([("pk".to_string(), 0u64)]));

        let (watcher, mut events) = watcher(driver.clone(), Duration::from_secs(3600));
        watcher.watch("provider-a", "wgr0");
        watcher.start();

        let outcome = tokio::time::timeout(Duration::from_millis(200), events.recv()).await;
        assert!(outcome.is_err(), "no event within the grace window");
    }

    #[tokio::test]
    async fn test_unwatch_silences_a_provider() {
        let driver = Arc::new(MockDriver::new());
        driver.set_handshakes("wgr0", Map::from([("pk".to_string(), 1u64)]));

        let (watcher, mut events) = watcher(driver.clone(), Duration::from_secs(1));
        watcher.watch("provider-a", "wgr0");
        watcher.backdate("provider-a", 600);
        watcher.unwatch("provider-a");
        watcher.start();

        let outcome = tokio::time::timeout(Duration::from_millis(200), events.recv()).await;
        assert!(outcome.is_err());
    }

    #[tokio::test]
    async fn test_start_stop_are_idempotent() {
        let driver = Arc::new(MockDriver::new());
        let (watcher, _events) = watcher(driver, Duration::from_secs(1));

        assert!(!watcher.is_running());
        watcher.start();
        watcher.start();
        assert!(watcher.is_running());
        watcher.stop();
        watcher.stop();
        assert!(!watcher.is_running());
    }

    #[tokio::test]
    async fn test_read_errors_do_not_stop_the_watcher() {
        let driver = Arc::new(MockDriver::new());
        // No canned handshakes for wgr-missing: the mock returns an empty
        // map, which never flags; meanwhile a stale interface still does.
        driver.set_handshakes("wgr1", Map::from([("pk".to_string(), 1u64)]));

        let (watcher, mut events) = watcher(driver.clone(), Duration::from_secs(1));
        watcher.watch("provider-a", "wgr-missing");
        watcher.watch("provider-b", "wgr1");
        watcher.backdate("provider-b", 600);
        watcher.start();

        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, "provider-b");
    }
}
