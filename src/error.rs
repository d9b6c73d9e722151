//! Error types for the OAuth client layer

use std::io;
use std::sync::Arc;

use thiserror::Error;

use crate::oauth::OAuthHandler;

/// Result type alias for this crate
pub type Result<T> = std::result::Result<T, Error>;

/// OAuth client errors
#[derive(Error, Debug)]
pub enum Error {
    /// No unattended path to a valid token; the caller must drive the
    /// interactive authorization flow using the attached handler
    #[error("OAuth authorization required")]
    AuthorizationRequired(Arc<OAuthHandler>),

    /// Authorization server metadata resolution failed (cached for the
    /// lifetime of the handler that produced it)
    #[error("Metadata resolution failed: {0}")]
    Metadata(String),

    /// Non-2xx response from the token or registration endpoint
    #[error("Token request failed with status {status}: {body}")]
    TokenRequest {
        /// HTTP status code returned by the endpoint
        status: u16,
        /// Response body, kept verbatim for diagnostics
        body: String,
    },

    /// Malformed JSON in a token, metadata, or registration response
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Token storage error
    #[error("Token storage error: {0}")]
    Storage(String),

    /// Transport error
    #[error("Transport error: {0}")]
    Transport(String),

    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Check whether this error signals that interactive authorization is
    /// needed
    #[must_use]
    pub fn is_authorization_required(&self) -> bool {
        matches!(self, Self::AuthorizationRequired(_))
    }

    /// The OAuth handler attached to an `AuthorizationRequired` error, if any
    #[must_use]
    pub fn oauth_handler(&self) -> Option<&Arc<OAuthHandler>> {
        match self {
            Self::AuthorizationRequired(handler) => Some(handler),
            _ => None,
        }
    }
}
