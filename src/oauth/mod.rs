//! OAuth 2.0 client authentication for MCP servers
//!
//! Implements the client side of OAuth Authorization Code flow with
//! PKCE (RFC 7636) for MCP servers that require authentication.
//!
//! Features:
//! - Authorization server metadata resolution (RFC 8414) with endpoint fallback
//! - Authorization code flow with PKCE
//! - Token storage with automatic refresh
//! - Dynamic client registration (RFC 7591)
//!
//! The interactive part of the flow (opening a browser, catching the
//! redirect) is the caller's responsibility: build the URL with
//! [`OAuthHandler::authorization_url`], collect `code` and `state` out of
//! band, verify `state`, then call
//! [`OAuthHandler::process_authorization_response`].

mod handler;
mod metadata;
mod pkce;
mod token;

pub use handler::{OAuthConfig, OAuthHandler};
pub use metadata::AuthServerMetadata;
pub use pkce::{code_challenge, code_verifier, random_string, state, validate_redirect_uri};
pub use token::{FileTokenStore, MemoryTokenStore, Token, TokenStore};
