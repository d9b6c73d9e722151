//! Streamable HTTP transport
//!
//! Posts JSON-RPC messages directly to a single MCP endpoint
//! (MCP 2025-03-26 Streamable HTTP). Servers may answer a POST with either
//! `application/json` or a `text/event-stream` body carrying the response in
//! a `data:` line; both are handled.
//!
//! When an [`OAuthHandler`] is attached, every request carries an
//! `Authorization` header and an HTTP 401 from the server surfaces as
//! [`Error::AuthorizationRequired`] with the handler attached, so calling
//! code can drive the interactive flow.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, StatusCode, header};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::Transport;
use crate::oauth::OAuthHandler;
use crate::protocol::{
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION, RequestId,
};
use crate::{Error, Result};

/// Streamable HTTP transport for MCP servers
pub struct StreamableHttpTransport {
    /// HTTP client
    client: Client,
    /// MCP endpoint URL
    base_url: String,
    /// Custom headers
    headers: HashMap<String, String>,
    /// Session ID (from the `MCP-Session-Id` response header)
    session_id: RwLock<Option<String>>,
    /// Request ID counter
    request_id: AtomicU64,
    /// Connected flag
    connected: AtomicBool,
    /// OAuth handler, when the server requires authentication
    oauth: Option<Arc<OAuthHandler>>,
}

impl StreamableHttpTransport {
    /// Create a new transport without OAuth
    pub fn new(url: &str, headers: HashMap<String, String>, timeout: Duration) -> Result<Arc<Self>> {
        Self::build(url, headers, timeout, None)
    }

    /// Create a new transport with OAuth authentication attached
    pub fn with_oauth(
        url: &str,
        headers: HashMap<String, String>,
        timeout: Duration,
        oauth: Arc<OAuthHandler>,
    ) -> Result<Arc<Self>> {
        Self::build(url, headers, timeout, Some(oauth))
    }

    fn build(
        url: &str,
        headers: HashMap<String, String>,
        timeout: Duration,
        oauth: Option<Arc<OAuthHandler>>,
    ) -> Result<Arc<Self>> {
        let client = Client::builder()
            .timeout(timeout)
            .tcp_nodelay(true)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| Error::Transport(e.to_string()))?;

        Ok(Arc::new(Self {
            client,
            base_url: url.to_string(),
            headers,
            session_id: RwLock::new(None),
            request_id: AtomicU64::new(1),
            connected: AtomicBool::new(false),
            oauth,
        }))
    }

    /// Check whether OAuth is attached to this transport
    #[must_use]
    pub fn is_oauth_enabled(&self) -> bool {
        self.oauth.is_some()
    }

    /// The attached OAuth handler, if any
    #[must_use]
    pub fn oauth_handler(&self) -> Option<Arc<OAuthHandler>> {
        self.oauth.clone()
    }

    /// Initialize the connection: `initialize` request followed by the
    /// `notifications/initialized` notification
    ///
    /// # Errors
    ///
    /// Returns an error if the handshake fails or the server rejects the
    /// initialize request.
    pub async fn initialize(&self) -> Result<()> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: RequestId::Number(0),
            method: "initialize".to_string(),
            params: Some(serde_json::json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {
                    "name": env!("CARGO_PKG_NAME"),
                    "version": env!("CARGO_PKG_VERSION")
                }
            })),
        };

        let response = self.send_request(&request).await?;

        if response.error.is_some() {
            return Err(Error::Protocol("Initialize failed".to_string()));
        }

        self.notify("notifications/initialized", None).await?;

        self.connected.store(true, Ordering::Relaxed);
        debug!(url = %self.base_url, "Streamable HTTP transport initialized");

        Ok(())
    }

    /// Build common headers, including the OAuth `Authorization` header when
    /// enabled
    async fn request_headers(&self) -> Result<header::HeaderMap> {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
        // Some servers answer POST requests with SSE-framed bodies
        headers.insert(
            header::ACCEPT,
            "application/json, text/event-stream".parse().unwrap(),
        );
        headers.insert("MCP-Protocol-Version", PROTOCOL_VERSION.parse().unwrap());

        if let Some(ref session_id) = *self.session_id.read() {
            headers.insert(
                "MCP-Session-Id",
                session_id
                    .parse()
                    .map_err(|_| Error::Transport("Invalid session ID".to_string()))?,
            );
        }

        for (key, value) in &self.headers {
            if let (Ok(k), Ok(v)) = (
                key.parse::<header::HeaderName>(),
                value.parse::<header::HeaderValue>(),
            ) {
                headers.insert(k, v);
            }
        }

        if let Some(ref oauth) = self.oauth {
            let auth = Arc::clone(oauth).authorization_header().await?;
            headers.insert(
                header::AUTHORIZATION,
                auth.parse()
                    .map_err(|_| Error::Transport("Invalid authorization header".to_string()))?,
            );
        }

        Ok(headers)
    }

    /// Send a request to the MCP endpoint
    async fn send_request(&self, request: &JsonRpcRequest) -> Result<JsonRpcResponse> {
        let headers = self.request_headers().await?;

        let response = self
            .client
            .post(&self.base_url)
            .headers(headers)
            .json(request)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("Request failed: {e}")))?;

        // Capture the session ID on first contact
        if self.session_id.read().is_none() {
            if let Some(session_id) = response.headers().get("mcp-session-id") {
                if let Ok(id) = session_id.to_str() {
                    info!(session_id = %id, "Stored session ID from response");
                    *self.session_id.write() = Some(id.to_string());
                }
            }
        }

        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            if let Some(ref oauth) = self.oauth {
                debug!(url = %self.base_url, "Server returned 401, authorization required");
                return Err(Error::AuthorizationRequired(Arc::clone(oauth)));
            }
            return Err(Error::Transport(
                "HTTP 401 Unauthorized and no OAuth handler configured".to_string(),
            ));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Transport(format!("HTTP {status}: {body}")));
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        if content_type.contains("text/event-stream") {
            // Extract the JSON payload from the first data: line
            let text = response
                .text()
                .await
                .map_err(|e| Error::Transport(format!("Failed to read SSE response: {e}")))?;

            for line in text.lines() {
                if let Some(data) = line.strip_prefix("data:") {
                    return serde_json::from_str(data.trim())
                        .map_err(|e| Error::Transport(format!("Failed to parse SSE data: {e}")));
                }
            }
            Err(Error::Transport("No data in SSE response".to_string()))
        } else {
            response
                .json()
                .await
                .map_err(|e| Error::Transport(format!("Failed to parse response: {e}")))
        }
    }

    /// Get next request ID
    #[allow(clippy::cast_possible_wrap)]
    fn next_id(&self) -> RequestId {
        RequestId::Number(self.request_id.fetch_add(1, Ordering::Relaxed) as i64)
    }
}

#[async_trait]
impl Transport for StreamableHttpTransport {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: self.next_id(),
            method: method.to_string(),
            params,
        };

        self.send_request(&request).await
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let headers = self.request_headers().await?;

        let notification = JsonRpcNotification {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
        };

        let response = self
            .client
            .post(&self.base_url)
            .headers(headers)
            .json(&notification)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("Notification failed: {e}")))?;

        if !response.status().is_success() {
            warn!(
                status = %response.status(),
                url = %self.base_url,
                "Notification failed"
            );
        }

        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::Relaxed);

        // Terminate the session if one was established
        let session_id = self.session_id.read().clone();
        if let Some(ref id) = session_id {
            let _ = self
                .client
                .delete(&self.base_url)
                .header("MCP-Session-Id", id)
                .send()
                .await;
        }

        Ok(())
    }
}
