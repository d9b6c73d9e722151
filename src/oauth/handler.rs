//! OAuth orchestrator
//!
//! [`OAuthHandler`] drives the credential lifecycle: it reads the token
//! store, refreshes expired tokens when a refresh token is available, and
//! signals [`Error::AuthorizationRequired`] when only the interactive flow
//! can produce a valid token. It also builds authorization URLs, exchanges
//! authorization codes, and performs dynamic client registration.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{debug, info};
use url::Url;

use super::metadata::AuthServerMetadata;
use super::pkce::validate_redirect_uri;
use super::token::{MemoryTokenStore, Token, TokenStore};
use crate::{Error, Result};

/// Timeout applied to all OAuth network round trips
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// OAuth client configuration
#[derive(Debug, Clone, Default)]
pub struct OAuthConfig {
    /// OAuth client ID
    pub client_id: String,

    /// OAuth client secret (confidential clients only)
    pub client_secret: Option<String>,

    /// Redirect URI for the authorization flow
    pub redirect_uri: String,

    /// Scopes to request, joined with spaces in configuration order
    pub scopes: Vec<String>,

    /// URL of the authorization server metadata document. Required before
    /// any operation that talks to the server.
    pub metadata_url: Option<String>,

    /// Enable PKCE (recommended for public clients)
    pub pkce_enabled: bool,
}

/// OAuth token endpoint response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    token_type: Option<String>,
    expires_in: Option<u64>,
    refresh_token: Option<String>,
    scope: Option<String>,
}

/// Client registration response (RFC 7591)
#[derive(Debug, Deserialize)]
struct RegistrationResponse {
    client_id: String,
    client_secret: Option<String>,
}

/// OAuth orchestrator for a single authorization server
///
/// Metadata resolution runs exactly once per handler instance: the first
/// caller performs the round trip and both success and failure are cached
/// for the handler's lifetime, so all concurrent and later callers observe
/// the identical result without re-issuing the request.
pub struct OAuthHandler {
    /// HTTP client for token requests
    http_client: Client,

    /// Client configuration; dynamic registration replaces the identity
    /// wholesale under the write lock
    config: RwLock<OAuthConfig>,

    /// Token storage
    store: Arc<dyn TokenStore>,

    /// Cached metadata resolution result (success or failure)
    metadata: OnceCell<std::result::Result<AuthServerMetadata, String>>,
}

impl std::fmt::Debug for OAuthHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let config = self.config.read();
        f.debug_struct("OAuthHandler")
            .field("client_id", &config.client_id)
            .field("redirect_uri", &config.redirect_uri)
            .field("pkce_enabled", &config.pkce_enabled)
            .finish_non_exhaustive()
    }
}

impl OAuthHandler {
    /// Create a new OAuth handler backed by an in-memory token store
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the redirect URI is invalid, or an error
    /// if the HTTP client cannot be built.
    pub fn new(config: OAuthConfig) -> Result<Self> {
        Self::with_store(config, Arc::new(MemoryTokenStore::new()))
    }

    /// Create a new OAuth handler with a caller-supplied token store
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the redirect URI is invalid, or an error
    /// if the HTTP client cannot be built.
    pub fn with_store(config: OAuthConfig, store: Arc<dyn TokenStore>) -> Result<Self> {
        validate_redirect_uri(&config.redirect_uri)?;

        let http_client = Client::builder().timeout(HTTP_TIMEOUT).build()?;

        Ok(Self {
            http_client,
            config: RwLock::new(config),
            store,
            metadata: OnceCell::new(),
        })
    }

    /// Current client ID
    #[must_use]
    pub fn client_id(&self) -> String {
        self.config.read().client_id.clone()
    }

    /// Current client secret, if configured or registered
    #[must_use]
    pub fn client_secret(&self) -> Option<String> {
        self.config.read().client_secret.clone()
    }

    /// Check whether a usable (non-empty, unexpired) token is stored
    pub fn has_valid_token(&self) -> Result<bool> {
        let token = self.store.get()?;
        Ok(token.is_some_and(|t| !t.access_token.is_empty() && !t.is_expired()))
    }

    /// Build the `Authorization` header value for a request
    ///
    /// Returns immediately from the store when a fresh token is available.
    /// An expired token with a refresh token triggers a refresh; a refresh
    /// failure falls through to the unauthenticated path rather than
    /// surfacing separately. With no unattended path to a valid token this
    /// fails with [`Error::AuthorizationRequired`] carrying a handle to this
    /// handler, so the caller can start the interactive flow directly.
    ///
    /// Takes an `Arc` receiver so the handle can be attached to the error;
    /// callers keeping their `Arc` pass a clone.
    pub async fn authorization_header(self: Arc<Self>) -> Result<String> {
        let token = self.valid_token().await?;
        Ok(format!("{} {}", token.token_type, token.access_token))
    }

    /// Return a valid token, refreshing if necessary
    async fn valid_token(self: Arc<Self>) -> Result<Token> {
        let stored = self.store.get()?;

        if let Some(ref token) = stored {
            if !token.access_token.is_empty() && !token.is_expired() {
                return Ok(token.clone());
            }
        }

        if let Some(refresh) = stored.and_then(|t| t.refresh_token) {
            match self.refresh_token(&refresh).await {
                Ok(token) => return Ok(token),
                Err(e) => {
                    debug!(error = %e, "Token refresh failed, authorization flow required");
                }
            }
        }

        Err(Error::AuthorizationRequired(self))
    }

    /// Refresh an access token
    ///
    /// If the response omits a new refresh token, the previous refresh token
    /// is carried forward (many servers omit it to signal "unchanged"). The
    /// merged token is persisted before it is returned.
    ///
    /// # Errors
    ///
    /// Returns an error if metadata resolution fails, the token endpoint
    /// returns a non-200 status, the response cannot be decoded, or the
    /// store rejects the save. Refresh requests are never retried here.
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<Token> {
        let metadata = self.server_metadata().await?;
        let (client_id, client_secret) = {
            let config = self.config.read();
            (config.client_id.clone(), config.client_secret.clone())
        };

        let mut params = HashMap::new();
        params.insert("grant_type", "refresh_token".to_string());
        params.insert("refresh_token", refresh_token.to_string());
        params.insert("client_id", client_id);
        if let Some(secret) = client_secret {
            params.insert("client_secret", secret);
        }

        let response = self.token_request(&metadata.token_endpoint, &params).await?;

        let mut token = Token::from_response(
            response.access_token,
            response.token_type,
            response.refresh_token,
            response.expires_in,
            response.scope,
        );

        if token.refresh_token.is_none() {
            token.refresh_token = Some(refresh_token.to_string());
        }

        self.store.save(&token)?;
        info!("OAuth token refreshed");
        Ok(token)
    }

    /// Build the authorization endpoint URL for the interactive flow
    ///
    /// Pure construction besides metadata resolution; no other network I/O.
    /// The caller opens this URL in a user agent and collects the `code` and
    /// `state` query parameters from the redirect.
    ///
    /// # Errors
    ///
    /// Returns an error if metadata resolution fails or the advertised
    /// authorization endpoint is not a valid URL.
    pub async fn authorization_url(&self, state: &str, code_challenge: &str) -> Result<String> {
        let metadata = self.server_metadata().await?;
        let config = self.config.read().clone();

        let mut auth_url = Url::parse(&metadata.authorization_endpoint).map_err(|e| {
            Error::Metadata(format!("Invalid authorization endpoint: {e}"))
        })?;

        {
            let mut params = auth_url.query_pairs_mut();
            params.append_pair("response_type", "code");
            params.append_pair("client_id", &config.client_id);
            params.append_pair("redirect_uri", &config.redirect_uri);
            params.append_pair("state", state);

            if !config.scopes.is_empty() {
                params.append_pair("scope", &config.scopes.join(" "));
            }

            if config.pkce_enabled && !code_challenge.is_empty() {
                params.append_pair("code_challenge", code_challenge);
                params.append_pair("code_challenge_method", "S256");
            }
        }

        Ok(auth_url.to_string())
    }

    /// Exchange an authorization code for a token and persist it
    ///
    /// The caller must verify that `state` matches the value it generated
    /// before invoking this; the handler keeps no record of issued state
    /// values and does not compare them.
    ///
    /// # Errors
    ///
    /// Returns an error if metadata resolution fails, the token endpoint
    /// returns a non-200 status, the response cannot be decoded, or the
    /// store rejects the save.
    pub async fn process_authorization_response(
        &self,
        code: &str,
        _state: &str,
        code_verifier: &str,
    ) -> Result<()> {
        let metadata = self.server_metadata().await?;
        let config = self.config.read().clone();

        let mut params = HashMap::new();
        params.insert("grant_type", "authorization_code".to_string());
        params.insert("code", code.to_string());
        params.insert("client_id", config.client_id);
        params.insert("redirect_uri", config.redirect_uri);
        if let Some(secret) = config.client_secret {
            params.insert("client_secret", secret);
        }
        if config.pkce_enabled && !code_verifier.is_empty() {
            params.insert("code_verifier", code_verifier.to_string());
        }

        let response = self.token_request(&metadata.token_endpoint, &params).await?;

        let token = Token::from_response(
            response.access_token,
            response.token_type,
            response.refresh_token,
            response.expires_in,
            response.scope,
        );

        self.store.save(&token)?;
        info!("Authorization code exchanged for token");
        Ok(())
    }

    /// Register this client dynamically (RFC 7591)
    ///
    /// On success the handler's client ID and secret are replaced with the
    /// registered identity. Callers that need the identity across process
    /// restarts must persist it themselves.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the server advertises no registration
    /// endpoint, or an error if the registration request fails or cannot be
    /// decoded.
    pub async fn register_client(&self, client_name: &str) -> Result<()> {
        let metadata = self.server_metadata().await?;

        let Some(registration_endpoint) = metadata.registration_endpoint else {
            return Err(Error::Config(
                "Server does not support dynamic client registration".to_string(),
            ));
        };

        let config = self.config.read().clone();
        let auth_method = if config.client_secret.is_some() {
            "client_secret_basic"
        } else {
            "none"
        };

        let body = serde_json::json!({
            "client_name": client_name,
            "redirect_uris": [config.redirect_uri],
            "token_endpoint_auth_method": auth_method,
            "grant_types": ["authorization_code", "refresh_token"],
            "response_types": ["code"],
            "scope": config.scopes.join(" "),
        });

        let response = self
            .http_client
            .post(&registration_endpoint)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK && status != StatusCode::CREATED {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::TokenRequest {
                status: status.as_u16(),
                body,
            });
        }

        let registration: RegistrationResponse = response
            .json()
            .await
            .map_err(|e| Error::Decode(format!("Failed to decode registration response: {e}")))?;

        info!(client_id = %registration.client_id, "Registered OAuth client");

        let mut config = self.config.write();
        config.client_id = registration.client_id;
        if registration.client_secret.is_some() {
            config.client_secret = registration.client_secret;
        }

        Ok(())
    }

    /// Resolve authorization server metadata, exactly once per handler
    ///
    /// The first call performs the network round trip; its result, success
    /// or failure, is cached for the lifetime of this handler. There is no
    /// mid-process retry of metadata discovery.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Metadata`] when no metadata URL is configured or the
    /// first resolution failed.
    pub async fn server_metadata(&self) -> Result<AuthServerMetadata> {
        let resolved = self
            .metadata
            .get_or_init(|| async {
                let metadata_url = self.config.read().metadata_url.clone();

                let Some(url) = metadata_url else {
                    return Err("Metadata URL is required but was not provided".to_string());
                };

                AuthServerMetadata::fetch(&self.http_client, &url)
                    .await
                    .map_err(|e| e.to_string())
            })
            .await;

        resolved.clone().map_err(Error::Metadata)
    }

    /// POST a form-encoded request to the token endpoint and decode the
    /// token response
    async fn token_request(
        &self,
        token_endpoint: &str,
        params: &HashMap<&str, String>,
    ) -> Result<TokenResponse> {
        let response = self
            .http_client
            .post(token_endpoint)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(params)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::TokenRequest {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| Error::Decode(format!("Failed to decode token response: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> OAuthConfig {
        OAuthConfig {
            client_id: "test-client".to_string(),
            client_secret: None,
            redirect_uri: "http://localhost:8085/callback".to_string(),
            scopes: vec!["mcp.read".to_string(), "mcp.write".to_string()],
            metadata_url: None,
            pkce_enabled: true,
        }
    }

    #[test]
    fn new_rejects_invalid_redirect_uri() {
        let config = OAuthConfig {
            redirect_uri: "http://example.com/cb".to_string(),
            ..test_config()
        };
        assert!(OAuthHandler::new(config).is_err());

        let config = OAuthConfig {
            redirect_uri: String::new(),
            ..test_config()
        };
        assert!(OAuthHandler::new(config).is_err());
    }

    #[test]
    fn accessors_reflect_config() {
        let handler = OAuthHandler::new(OAuthConfig {
            client_secret: Some("shh".to_string()),
            ..test_config()
        })
        .unwrap();
        assert_eq!(handler.client_id(), "test-client");
        assert_eq!(handler.client_secret().as_deref(), Some("shh"));
    }

    #[test]
    fn debug_omits_client_secret() {
        let handler = OAuthHandler::new(OAuthConfig {
            client_secret: Some("super-secret".to_string()),
            ..test_config()
        })
        .unwrap();
        let rendered = format!("{handler:?}");
        assert!(rendered.contains("test-client"));
        assert!(!rendered.contains("super-secret"));
    }

    #[tokio::test]
    async fn metadata_without_url_is_cached_config_error() {
        let handler = OAuthHandler::new(test_config()).unwrap();

        let first = handler.server_metadata().await;
        assert!(matches!(first, Err(Error::Metadata(_))));

        // Failure is cached: same outcome, no new resolution attempt
        let second = handler.server_metadata().await;
        assert!(matches!(second, Err(Error::Metadata(_))));
    }

    #[tokio::test]
    async fn empty_access_token_requires_authorization() {
        let store = Arc::new(MemoryTokenStore::new());
        let token = Token::from_response(String::new(), None, None, Some(3600), None);
        store.save(&token).unwrap();

        let handler =
            Arc::new(OAuthHandler::with_store(test_config(), store).unwrap());

        let err = handler.authorization_header().await.unwrap_err();
        assert!(err.is_authorization_required());
        assert!(err.oauth_handler().is_some());
    }

    #[tokio::test]
    async fn fresh_token_returns_header_without_network() {
        let store = Arc::new(MemoryTokenStore::new());
        let token = Token::from_response(
            "abc123".to_string(),
            Some("Bearer".to_string()),
            None,
            Some(3600),
            None,
        );
        store.save(&token).unwrap();

        // No metadata URL configured: any network path would fail, so a
        // returned header proves the store alone satisfied the call
        let handler =
            Arc::new(OAuthHandler::with_store(test_config(), store).unwrap());

        let header = handler.authorization_header().await.unwrap();
        assert_eq!(header, "Bearer abc123");
    }

    #[tokio::test]
    async fn expired_token_without_refresh_requires_authorization() {
        let store = Arc::new(MemoryTokenStore::new());
        let mut token = Token::from_response("old".to_string(), None, None, Some(3600), None);
        token.expires_at = Some(1);
        store.save(&token).unwrap();

        let handler =
            Arc::new(OAuthHandler::with_store(test_config(), store).unwrap());

        let err = handler.authorization_header().await.unwrap_err();
        assert!(err.is_authorization_required());
    }

    #[tokio::test]
    async fn refresh_failure_falls_back_to_authorization_required() {
        // Refresh token present but no metadata URL: the refresh attempt
        // fails and must be swallowed into AuthorizationRequired
        let store = Arc::new(MemoryTokenStore::new());
        let mut token = Token::from_response(
            "old".to_string(),
            None,
            Some("refresh-1".to_string()),
            Some(3600),
            None,
        );
        token.expires_at = Some(1);
        store.save(&token).unwrap();

        let handler =
            Arc::new(OAuthHandler::with_store(test_config(), store).unwrap());

        let err = handler.authorization_header().await.unwrap_err();
        assert!(err.is_authorization_required());
    }
}
