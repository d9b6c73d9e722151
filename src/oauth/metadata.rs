//! OAuth authorization server metadata (RFC 8414)
//!
//! Metadata is fetched from an explicitly configured URL. Servers without a
//! discovery document are tolerated: a non-2xx response falls back to
//! default endpoints derived from the URL's authority.

use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;
use url::Url;

use crate::protocol::PROTOCOL_VERSION;
use crate::{Error, Result};

/// OAuth 2.0 Authorization Server Metadata (RFC 8414)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthServerMetadata {
    /// Authorization server issuer URL
    #[serde(default)]
    pub issuer: String,

    /// Authorization endpoint URL
    pub authorization_endpoint: String,

    /// Token endpoint URL
    pub token_endpoint: String,

    /// Dynamic client registration endpoint (optional)
    #[serde(default)]
    pub registration_endpoint: Option<String>,

    /// Supported scopes (lenient: accepts a space-separated string too)
    #[serde(default, deserialize_with = "deserialize_scopes")]
    pub scopes_supported: Vec<String>,

    /// Supported response types
    #[serde(default)]
    pub response_types_supported: Vec<String>,

    /// Supported grant types
    #[serde(default)]
    pub grant_types_supported: Vec<String>,

    /// Supported token endpoint auth methods
    #[serde(default)]
    pub token_endpoint_auth_methods_supported: Vec<String>,
}

/// Deserialize scopes that may be either a string or an array
///
/// Some server implementations incorrectly return `"read write"` instead of
/// `["read", "write"]`.
fn deserialize_scopes<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrVec {
        String(String),
        Vec(Vec<String>),
    }

    match StringOrVec::deserialize(deserializer)? {
        StringOrVec::String(s) => Ok(s.split_whitespace().map(String::from).collect()),
        StringOrVec::Vec(v) => Ok(v),
    }
}

impl AuthServerMetadata {
    /// Fetch authorization server metadata from an explicit metadata URL
    ///
    /// A non-2xx response is not fatal: default endpoints are derived from
    /// the authority of `metadata_url` instead. A malformed JSON body is a
    /// terminal error.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be sent, the response body is
    /// not valid metadata JSON, or `metadata_url` has no valid authority to
    /// derive defaults from.
    pub async fn fetch(client: &Client, metadata_url: &str) -> Result<Self> {
        debug!(url = %metadata_url, "Fetching OAuth authorization server metadata");

        let response = client
            .get(metadata_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .header("MCP-Protocol-Version", PROTOCOL_VERSION)
            .send()
            .await
            .map_err(|e| Error::Metadata(format!("Failed to fetch metadata: {e}")))?;

        if !response.status().is_success() {
            // No discovery document; assume conventional endpoint paths
            debug!(
                status = %response.status(),
                "Metadata endpoint unavailable, deriving default endpoints"
            );
            return Self::default_endpoints(metadata_url);
        }

        let metadata: Self = response
            .json()
            .await
            .map_err(|e| Error::Decode(format!("Failed to decode metadata response: {e}")))?;

        debug!(issuer = %metadata.issuer, "Resolved authorization server metadata");
        Ok(metadata)
    }

    /// Derive default OAuth endpoints from the authority of a URL
    ///
    /// # Errors
    ///
    /// Returns an error if `url` cannot be parsed.
    pub fn default_endpoints(url: &str) -> Result<Self> {
        let base = authority_base(url)?;

        Ok(Self {
            issuer: base.clone(),
            authorization_endpoint: format!("{base}/authorize"),
            token_endpoint: format!("{base}/token"),
            registration_endpoint: Some(format!("{base}/register")),
            scopes_supported: Vec::new(),
            response_types_supported: Vec::new(),
            grant_types_supported: Vec::new(),
            token_endpoint_auth_methods_supported: Vec::new(),
        })
    }
}

/// Extract the base URL (scheme + host + port) from a full URL
fn authority_base(url: &str) -> Result<String> {
    let parsed =
        Url::parse(url).map_err(|e| Error::Metadata(format!("Invalid metadata URL: {e}")))?;

    let host = parsed
        .host_str()
        .ok_or_else(|| Error::Metadata(format!("Metadata URL has no host: {url}")))?;

    let mut base = format!("{}://{host}", parsed.scheme());

    if let Some(port) = parsed.port() {
        use std::fmt::Write;
        let _ = write!(base, ":{port}");
    }

    Ok(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // Deserialization
    // =========================================================================

    #[test]
    fn deserialize_full_metadata() {
        let json = r#"{
            "issuer": "https://auth.example.com",
            "authorization_endpoint": "https://auth.example.com/authorize",
            "token_endpoint": "https://auth.example.com/token",
            "registration_endpoint": "https://auth.example.com/register",
            "scopes_supported": ["read", "write"],
            "grant_types_supported": ["authorization_code", "refresh_token"],
            "response_types_supported": ["code"]
        }"#;
        let meta: AuthServerMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(meta.issuer, "https://auth.example.com");
        assert_eq!(
            meta.registration_endpoint.as_deref(),
            Some("https://auth.example.com/register")
        );
        assert_eq!(meta.scopes_supported, vec!["read", "write"]);
    }

    #[test]
    fn deserialize_minimal_metadata() {
        let json = r#"{
            "authorization_endpoint": "https://auth.example.com/authorize",
            "token_endpoint": "https://auth.example.com/token"
        }"#;
        let meta: AuthServerMetadata = serde_json::from_str(json).unwrap();
        assert!(meta.registration_endpoint.is_none());
        assert!(meta.scopes_supported.is_empty());
    }

    #[test]
    fn deserialize_scopes_from_string() {
        let json = r#"{
            "authorization_endpoint": "https://auth.example.com/authorize",
            "token_endpoint": "https://auth.example.com/token",
            "scopes_supported": "read write admin"
        }"#;
        let meta: AuthServerMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(meta.scopes_supported, vec!["read", "write", "admin"]);
    }

    // =========================================================================
    // Default endpoints
    // =========================================================================

    #[test]
    fn default_endpoints_from_authority() {
        let meta = AuthServerMetadata::default_endpoints(
            "https://auth.example.com/.well-known/oauth-authorization-server",
        )
        .unwrap();
        assert_eq!(meta.authorization_endpoint, "https://auth.example.com/authorize");
        assert_eq!(meta.token_endpoint, "https://auth.example.com/token");
        assert_eq!(
            meta.registration_endpoint.as_deref(),
            Some("https://auth.example.com/register")
        );
    }

    #[test]
    fn default_endpoints_preserve_port() {
        let meta =
            AuthServerMetadata::default_endpoints("http://127.0.0.1:9000/metadata").unwrap();
        assert_eq!(meta.token_endpoint, "http://127.0.0.1:9000/token");
    }

    #[test]
    fn default_endpoints_invalid_url_is_error() {
        assert!(AuthServerMetadata::default_endpoints("not a url").is_err());
    }

    // =========================================================================
    // authority_base
    // =========================================================================

    #[test]
    fn authority_base_strips_path_and_query() {
        assert_eq!(
            authority_base("https://api.example.com/v1/auth?foo=bar").unwrap(),
            "https://api.example.com"
        );
    }

    #[test]
    fn authority_base_with_port() {
        assert_eq!(
            authority_base("http://localhost:8080/api").unwrap(),
            "http://localhost:8080"
        );
    }
}
