//! Route announcement to the routing backend
//!
//! After a tunnel comes up the requester publishes a dual-scheme route
//! pair pointing at the provider's gateway, then re-publishes it on a
//! fixed cadence so the backend's TTL never lapses while the tunnel
//! lives. `source:"tunnel"` lets the backend atomically replace whatever
//! tunnel routes this user announced before, which makes registration
//! idempotent from the user's perspective.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use gate_api::{
    HealthCheck, ProviderCredentials, Route, RouteScheme, RoutesRequest, RoutesResponse,
};

use crate::config::RequesterConfig;
use crate::error::{Error, Result};

const ROUTE_SOURCE: &str = "tunnel";
const REGISTER_TIMEOUT: Duration = Duration::from_secs(30);

/// Publisher of tunnel route records
pub struct RouteAnnouncer {
    http: reqwest::Client,
    priority: u32,
    http_port: u16,
    health_check: Option<HealthCheck>,
}

impl RouteAnnouncer {
    pub fn new(config: &RequesterConfig) -> Self {
        let health_check = config.health_check_path.as_ref().map(|path| HealthCheck {
            path: path.clone(),
            host: config.health_check_host.clone(),
        });
        Self {
            http: reqwest::Client::new(),
            priority: config.route_priority,
            http_port: config.target_port_http,
            health_check,
        }
    }

    /// The dual-scheme route list for one tunnel
    ///
    /// One https record on the announced port and one plain-http record on
    /// the http port, both aimed at the provider's gateway.
    pub fn build_routes(&self, ip: &str, https_port: u16) -> Vec<Route> {
        vec![
            Route {
                ip: ip.to_string(),
                port: https_port,
                priority: self.priority,
                scheme: Some(RouteScheme::Https),
                source: ROUTE_SOURCE.to_string(),
                health_check: self.health_check.clone(),
            },
            Route {
                ip: ip.to_string(),
                port: self.http_port,
                priority: self.priority,
                scheme: Some(RouteScheme::Http),
                source: ROUTE_SOURCE.to_string(),
                health_check: None,
            },
        ]
    }

    /// Publish the route pair for one provider
    ///
    /// An error status and a non-JSON body are distinct failures: the
    /// first means the backend refused the routes, the second that the
    /// endpoint does not implement the routes API at all.
    pub async fn register(
        &self,
        creds: &ProviderCredentials,
        ip: &str,
        https_port: u16,
    ) -> Result<RoutesResponse> {
        let url = creds.backend_url.join(&format!(
            "router/api/routes/{}/{}",
            urlencoding::encode(&creds.user_id),
            urlencoding::encode(&creds.signature)
        ))?;

        let body = RoutesRequest {
            routes: self.build_routes(ip, https_port),
        };

        let resp = self
            .http
            .post(url)
            .timeout(REGISTER_TIMEOUT)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;

        if status.as_u16() >= 400 {
            return Err(Error::RouteBackend {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: RoutesResponse =
            serde_json::from_str(&text).map_err(|_| Error::RouteNotJson)?;
        if let Some(ref err) = parsed.error {
            log::warn!("routing backend flagged: {}", err);
        }
        log::info!(
            "announced routes for {} -> {}:{}",
            creds.backend_url,
            ip,
            https_port
        );
        Ok(parsed)
    }

    /// Re-register on a fixed cadence until the task is aborted
    ///
    /// The caller has already registered once; the first tick fires a full
    /// interval later. Tick failures are logged and the loop keeps going:
    /// a backend outage must not tear down a working tunnel.
    pub fn spawn_refresh(
        self: Arc<Self>,
        creds: ProviderCredentials,
        ip: String,
        https_port: u16,
        interval: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The interval's first tick completes immediately
            timer.tick().await;
            loop {
                timer.tick().await;
                if let Err(e) = self.register(&creds, &ip, https_port).await {
                    log::warn!("route refresh for {} failed: {}", creds.backend_url, e);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RequesterConfig;

    fn announcer_with(vars: &[(&str, &str)]) -> RouteAnnouncer {
        let map: std::collections::HashMap<&str, &str> = vars.iter().copied().collect();
        let config =
            RequesterConfig::from_lookup(vec![], |key| map.get(key).map(|v| v.to_string()))
                .unwrap();
        RouteAnnouncer::new(&config)
    }

    #[test]
    fn test_dual_scheme_route_pair() {
        let announcer = announcer_with(&[]);
        let routes = announcer.build_routes("192.168.1.5", 443);

        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].ip, "192.168.1.5");
        assert_eq!(routes[0].port, 443);
        assert_eq!(routes[0].scheme, Some(RouteScheme::Https));
        assert_eq!(routes[1].port, 80);
        assert_eq!(routes[1].scheme, Some(RouteScheme::Http));
        for route in &routes {
            assert_eq!(route.source, "tunnel");
            assert_eq!(route.priority, 2);
        }
    }

    #[test]
    fn test_health_check_rides_the_https_route_only() {
        let announcer = announcer_with(&[
            ("HEALTH_CHECK_PATH", "/healthz"),
            ("HEALTH_CHECK_HOST", "svc.internal"),
        ]);
        let routes = announcer.build_routes("10.1.2.3", 8443);

        let check = routes[0].health_check.as_ref().unwrap();
        assert_eq!(check.path, "/healthz");
        assert_eq!(check.host.as_deref(), Some("svc.internal"));
        assert!(routes[1].health_check.is_none());
    }

    #[test]
    fn test_priority_follows_configuration() {
        let announcer = announcer_with(&[("ROUTE_PRIORITY", "9")]);
        let routes = announcer.build_routes("10.1.2.3", 443);
        assert!(routes.iter().all(|r| r.priority == 9));
    }
}
