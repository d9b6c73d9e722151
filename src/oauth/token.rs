//! OAuth tokens and token storage
//!
//! The [`TokenStore`] trait is the persistence seam: the handler only ever
//! reads the current token and replaces it wholesale. [`MemoryTokenStore`]
//! is the thread-safe reference implementation; [`FileTokenStore`] persists
//! tokens to disk for reuse across process restarts.

use std::fs;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::{Error, Result};

/// OAuth token information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    /// Access token
    pub access_token: String,

    /// Token type (usually "Bearer")
    #[serde(default = "default_token_type")]
    pub token_type: String,

    /// Refresh token (optional)
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// Remaining lifetime in seconds, as reported by the server
    #[serde(default)]
    pub expires_in: Option<u64>,

    /// Granted scopes
    #[serde(default)]
    pub scope: Option<String>,

    /// Absolute expiration time (Unix timestamp, seconds)
    #[serde(default)]
    pub expires_at: Option<u64>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

impl Token {
    /// Create a token from an OAuth token endpoint response, computing the
    /// absolute expiry from the relative lifetime hint
    #[must_use]
    pub fn from_response(
        access_token: String,
        token_type: Option<String>,
        refresh_token: Option<String>,
        expires_in: Option<u64>,
        scope: Option<String>,
    ) -> Self {
        // Saturate: a pathological expires_in must not wrap into the past
        let expires_at = expires_in.map(|secs| unix_now().saturating_add(secs));

        Self {
            access_token,
            token_type: token_type.unwrap_or_else(default_token_type),
            refresh_token,
            expires_in,
            scope,
            expires_at,
        }
    }

    /// Check if the token is expired
    ///
    /// A token without an absolute expiry never expires (lifetime is managed
    /// by the caller).
    #[must_use]
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => unix_now() >= expires_at,
            None => false,
        }
    }

    /// Time until expiration, `None` if already expired or never expiring
    #[must_use]
    pub fn time_until_expiry(&self) -> Option<Duration> {
        self.expires_at.and_then(|expires_at| {
            let now = unix_now();
            (expires_at > now).then(|| Duration::from_secs(expires_at - now))
        })
    }
}

/// Storage seam for the current OAuth token
///
/// Implementations must be safe for concurrent `get`/`save` from multiple
/// callers. No ordering is guaranteed between concurrent saves beyond
/// last-write-wins.
pub trait TokenStore: Send + Sync {
    /// Return the current token, `None` if no token has been stored
    fn get(&self) -> Result<Option<Token>>;

    /// Replace the stored token
    fn save(&self, token: &Token) -> Result<()>;
}

/// Thread-safe in-memory token store
#[derive(Default)]
pub struct MemoryTokenStore {
    token: RwLock<Option<Token>>,
}

impl MemoryTokenStore {
    /// Create an empty in-memory token store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self) -> Result<Option<Token>> {
        Ok(self.token.read().clone())
    }

    fn save(&self, token: &Token) -> Result<()> {
        *self.token.write() = Some(token.clone());
        Ok(())
    }
}

/// Token store that persists the token as JSON on disk
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    /// Create a file token store at the given path, creating parent
    /// directories as needed
    pub fn new(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)
                    .map_err(|e| Error::Storage(format!("Failed to create token dir: {e}")))?;
            }
        }
        Ok(Self { path })
    }

    /// Create a file token store in the default location
    /// (`~/.mcp-oauth/{key}_token.json`, keyed by server name)
    pub fn default_location(server_name: &str) -> Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Storage("Cannot determine home directory".to_string()))?;

        let mut hasher = Sha256::new();
        hasher.update(server_name.as_bytes());
        let hash = hasher.finalize();
        let key = format!("{hash:x}")[..16].to_string();

        Self::new(home.join(".mcp-oauth").join(format!("{key}_token.json")))
    }
}

impl TokenStore for FileTokenStore {
    fn get(&self) -> Result<Option<Token>> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "No stored token found");
            return Ok(None);
        }

        let content = fs::read_to_string(&self.path)
            .map_err(|e| Error::Storage(format!("Failed to read token file: {e}")))?;

        match serde_json::from_str::<Token>(&content) {
            Ok(token) => {
                if token.is_expired() {
                    // Keep the token in case its refresh token is still usable
                    debug!(path = %self.path.display(), "Stored token is expired");
                } else {
                    debug!(expires_in = ?token.time_until_expiry(), "Loaded stored token");
                }
                Ok(Some(token))
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to parse stored token");
                Ok(None)
            }
        }
    }

    fn save(&self, token: &Token) -> Result<()> {
        let content = serde_json::to_string_pretty(token)?;

        fs::write(&self.path, content)
            .map_err(|e| Error::Storage(format!("Failed to write token file: {e}")))?;

        // Owner read/write only
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            let _ = fs::set_permissions(&self.path, perms);
        }

        info!(path = %self.path.display(), "Saved OAuth token");
        Ok(())
    }
}
