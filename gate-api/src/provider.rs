//! Provider connection strings
//!
//! A requester is configured with one connection string per provider:
//! `<backendUrl>,<userId>,<signature>`. The backend URL serves both the
//! admission API and the routing API; the user id and signature are opaque
//! credentials forwarded to those backends.

use std::fmt;
use std::str::FromStr;

use url::Url;

use crate::error::{Error, Result};

/// Parsed provider connection string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCredentials {
    pub backend_url: Url,
    pub user_id: String,
    pub signature: String,
}

impl ProviderCredentials {
    /// Parse `<backendUrl>,<userId>,<signature>`
    ///
    /// The signature may itself contain commas; only the first two commas
    /// separate fields. An empty user id is legal and denotes the apex
    /// (root) subdomain.
    pub fn parse(s: &str) -> Result<Self> {
        let mut fields = s.splitn(3, ',');
        let (backend, user_id, signature) = match (fields.next(), fields.next(), fields.next()) {
            (Some(b), Some(u), Some(sig)) => (b.trim(), u.trim(), sig.trim()),
            _ => return Err(Error::InvalidProvider(s.to_string())),
        };

        if backend.is_empty() || signature.is_empty() {
            return Err(Error::InvalidProvider(s.to_string()));
        }

        let backend_url =
            Url::parse(backend).map_err(|_| Error::InvalidProvider(s.to_string()))?;
        match backend_url.scheme() {
            "http" | "https" => {}
            _ => return Err(Error::UnsupportedScheme(backend.to_string())),
        }

        Ok(Self {
            backend_url,
            user_id: user_id.to_string(),
            signature: signature.to_string(),
        })
    }
}

impl FromStr for ProviderCredentials {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ProviderCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.backend_url, self.user_id, self.signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic() {
        let creds =
            ProviderCredentials::parse("https://gw.example.com,alice,sig123").unwrap();
        assert_eq!(creds.backend_url.as_str(), "https://gw.example.com/");
        assert_eq!(creds.user_id, "alice");
        assert_eq!(creds.signature, "sig123");
    }

    #[test]
    fn test_serialize_parse_round_trip() {
        let creds =
            ProviderCredentials::parse("http://gw.example.com:8080,alice,sig").unwrap();
        let reparsed = ProviderCredentials::parse(&creds.to_string()).unwrap();
        assert_eq!(reparsed, creds);
    }

    #[test]
    fn test_empty_user_id_is_root() {
        let creds = ProviderCredentials::parse("https://gw.example.com,,sig").unwrap();
        assert_eq!(creds.user_id, "");
    }

    #[test]
    fn test_signature_may_contain_commas() {
        let creds = ProviderCredentials::parse("https://gw.example.com,u,a,b,c").unwrap();
        assert_eq!(creds.signature, "a,b,c");
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(ProviderCredentials::parse("").is_err());
        assert!(ProviderCredentials::parse("https://gw.example.com,alice").is_err());
        assert!(ProviderCredentials::parse("not a url,alice,sig").is_err());
        assert!(ProviderCredentials::parse("ftp://gw.example.com,alice,sig").is_err());
        assert!(ProviderCredentials::parse("https://gw.example.com,alice,").is_err());
    }
}
