//! Admission HTTP service
//!
//! Serves the liveness, version, name-resolution and registration
//! endpoints. Handlers never put internal error text on the wire; every
//! unexpected failure is logged and collapsed to `500 "Internal error"`.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};

use gate_api::{
    peer_name_for_host, AuthRecord, RegisterRequest, RegisterResponse, VersionResponse,
    PROTOCOL_VERSION, ROOT_PEER,
};
use gate_wg::is_valid_wg_key;

use crate::error::Error;
use crate::manager::VpnManager;

const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared state of the admission handlers
#[derive(Clone)]
pub struct AppState {
    manager: Arc<VpnManager>,
    http: reqwest::Client,
}

impl AppState {
    pub fn new(manager: Arc<VpnManager>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(AUTH_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { manager, http }
    }
}

/// Build the admission router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/ping", get(ping))
        .route("/router/api/version", get(version))
        .route("/api/get_ip/{host}", get(get_ip))
        .route("/api/register", post(register))
        .with_state(state)
}

/// Serve the admission API until the shutdown future resolves
pub async fn serve(
    state: AppState,
    port: u16,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> crate::error::Result<()> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("admission API listening on {}", addr);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// How a handler failure reaches the wire
#[derive(Debug)]
enum ServiceError {
    BadRequest,
    Unauthorized,
    Internal,
}

impl From<Error> for ServiceError {
    fn from(err: Error) -> Self {
        match err {
            Error::Unauthorized(reason) => {
                log::info!("registration refused: {}", reason);
                ServiceError::Unauthorized
            }
            other => {
                log::error!("admission handler failed: {}", other);
                ServiceError::Internal
            }
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        match self {
            ServiceError::BadRequest => (StatusCode::BAD_REQUEST, "Bad request"),
            ServiceError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized"),
            ServiceError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "Internal error"),
        }
        .into_response()
    }
}

async fn ping() -> &'static str {
    "ok"
}

async fn version() -> Json<VersionResponse> {
    Json(VersionResponse {
        version: PROTOCOL_VERSION,
    })
}

async fn get_ip(State(state): State<AppState>, Path(host): Path<String>) -> Response {
    let announce = &state.manager.config().announce_domain;
    let Some(name) = peer_name_for_host(&host, announce) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match state.manager.ip_for_name(&name).await {
        Some(ip) => format!("http://{}:80", ip).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, ServiceError> {
    if !is_valid_wg_key(&req.vpn_public_key) {
        log::warn!("register: rejected malformed public key for {:?}", req.user_id);
        return Err(ServiceError::BadRequest);
    }

    let (server_domain, domain_name) = authenticate(&state, &req).await?;

    let wg_config = state
        .manager
        .register_peer(&req.vpn_public_key, &domain_name)
        .await?;

    let domain = public_domain(&domain_name, &server_domain);
    let config = state.manager.config();

    Ok(Json(RegisterResponse {
        wg_config,
        server_ip: config.subnet.gateway().to_string(),
        server_domain,
        domain_name,
        domain,
        route_ip: Some(config.route_ip.clone()),
        route_port: Some(config.route_port),
    }))
}

/// Resolve the peer's `(serverDomain, domainName)` pair
///
/// With an auth backend configured its record is authoritative; without
/// one the announcement domain admits any caller under its own user id.
async fn authenticate(
    state: &AppState,
    req: &RegisterRequest,
) -> crate::error::Result<(String, String)> {
    let Some(ref auth_url) = state.manager.config().auth_api_url else {
        let name = if req.user_id.is_empty() {
            ROOT_PEER.to_string()
        } else {
            req.user_id.to_ascii_lowercase()
        };
        return Ok((state.manager.config().announce_domain.clone(), name));
    };

    let url = format!(
        "{}/{}/{}",
        auth_url.as_str().trim_end_matches('/'),
        urlencoding::encode(&req.user_id),
        urlencoding::encode(&req.auth_token)
    );

    let resp = state.http.get(&url).send().await?;

    if !resp.status().is_success() {
        return Err(Error::Unauthorized(format!(
            "auth backend answered {} for {:?}",
            resp.status(),
            req.user_id
        )));
    }

    let record: AuthRecord = resp
        .json()
        .await
        .map_err(|_| Error::Unauthorized("malformed auth record".to_string()))?;
    domains_from_record(record)
        .ok_or_else(|| Error::Unauthorized("incomplete auth record".to_string()))
}

/// Both fields of the auth record are required for admission
fn domains_from_record(record: AuthRecord) -> Option<(String, String)> {
    let server_domain = record.server_domain.filter(|s| !s.is_empty())?;
    let domain_name = record.domain_name.filter(|s| !s.is_empty())?;
    Some((server_domain, domain_name.to_ascii_lowercase()))
}

/// `serverDomain` for the root peer, `<domainName>.<serverDomain>` otherwise
fn public_domain(domain_name: &str, server_domain: &str) -> String {
    if domain_name == ROOT_PEER {
        server_domain.to_string()
    } else {
        format!("{}.{}", domain_name, server_domain)
    }
}
