//! OAuth 2.0 client authentication for MCP clients
//!
//! Acquires, caches, refreshes, and supplies bearer tokens for outbound MCP
//! requests, with dynamic client registration and authorization server
//! metadata resolution so a client can bootstrap trust with a server it has
//! never talked to.
//!
//! # Flow
//!
//! 1. Attach an [`oauth::OAuthHandler`] to a
//!    [`transport::StreamableHttpTransport`].
//! 2. Requests carry the stored bearer token; expired tokens are refreshed
//!    in place when a refresh token is available.
//! 3. When no unattended path to a valid token exists (including an HTTP 401
//!    from the server), the call fails with
//!    [`Error::AuthorizationRequired`] carrying the handler.
//! 4. The caller builds the URL with [`oauth::OAuthHandler::authorization_url`],
//!    sends the user there, collects `code` and `state` from the redirect,
//!    verifies `state`, and completes with
//!    [`oauth::OAuthHandler::process_authorization_response`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod oauth;
pub mod protocol;
pub mod transport;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
