//! Dash-escaped host names for the name-resolution endpoint
//!
//! The edge proxy cannot put dots in a single path segment's label
//! namespace, so `GET /api/get_ip/{host}` receives DNS names with every
//! dot escaped to a dash: `alice.example.com` → `alice-example-com`.

use crate::types::ROOT_PEER;

/// Escape a DNS name the way the resolution endpoint expects
pub fn escape_domain(domain: &str) -> String {
    domain.to_ascii_lowercase().replace('.', "-")
}

/// Resolve an escaped host against the announcement domain
///
/// Strips the escaped announcement suffix and interprets the left-most
/// remaining label as the peer name; the bare announcement domain maps to
/// the root peer. Returns `None` when the host does not belong to the
/// announcement domain at all.
pub fn peer_name_for_host(host: &str, announce_domain: &str) -> Option<String> {
    let host = host.to_ascii_lowercase();
    let suffix = escape_domain(announce_domain);

    if host == suffix {
        return Some(ROOT_PEER.to_string());
    }

    let prefix = host.strip_suffix(&suffix)?.strip_suffix('-')?;
    let label = prefix.split('-').next()?;
    if label.is_empty() {
        return None;
    }
    Some(label.to_string())
}
