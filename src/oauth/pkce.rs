//! PKCE and state parameter generation (RFC 7636)
//!
//! All generators are pure and thread-safe, with no shared state between
//! calls. The caller must retain the code verifier across the redirect round
//! trip and supply it again at code-exchange time.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use sha2::{Digest, Sha256};
use url::{Host, Url};

use crate::{Error, Result};

/// Generate a cryptographically secure random string of exactly `len`
/// URL-safe characters
///
/// Encodes `len` random bytes as base64url and truncates to `len`
/// characters. The whole string is unpredictable; callers must not assume
/// the truncation preserves entropy density of the final characters.
#[must_use]
pub fn random_string(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::rng().fill_bytes(&mut bytes);
    let mut encoded = URL_SAFE_NO_PAD.encode(&bytes);
    encoded.truncate(len);
    encoded
}

/// Generate a PKCE code verifier
///
/// RFC 7636 requires 43 to 128 characters; 64 gives a comfortable margin.
#[must_use]
pub fn code_verifier() -> String {
    random_string(64)
}

/// Derive the S256 code challenge for a verifier:
/// base64url(SHA-256(verifier)), unpadded
#[must_use]
pub fn code_challenge(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Generate a state parameter for CSRF protection
#[must_use]
pub fn state() -> String {
    random_string(32)
}

/// Validate that a redirect URI is safe to use
///
/// HTTPS URIs are accepted for any host. Plain HTTP is accepted only for
/// loopback hosts (`localhost`, `127.0.0.1`, `[::1]`), where traffic never
/// leaves the machine. The hostname is parsed and compared exactly, so
/// lookalike domains such as `http://localhost.evil.com` are rejected.
///
/// # Errors
///
/// Returns [`Error::Config`] for empty, unparseable, non-loopback HTTP, or
/// non-HTTP(S) URIs.
pub fn validate_redirect_uri(redirect_uri: &str) -> Result<()> {
    if redirect_uri.is_empty() {
        return Err(Error::Config("Redirect URI cannot be empty".to_string()));
    }

    let parsed = Url::parse(redirect_uri)
        .map_err(|e| Error::Config(format!("Invalid redirect URI: {e}")))?;

    match parsed.scheme() {
        "https" => Ok(()),
        "http" => match parsed.host() {
            Some(Host::Domain("localhost")) => Ok(()),
            Some(Host::Ipv4(ip)) if ip == std::net::Ipv4Addr::LOCALHOST => Ok(()),
            Some(Host::Ipv6(ip)) if ip == std::net::Ipv6Addr::LOCALHOST => Ok(()),
            _ => Err(Error::Config(
                "HTTP redirect URIs are only allowed for loopback hosts".to_string(),
            )),
        },
        other => Err(Error::Config(format!(
            "Redirect URI scheme must be http(s), got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // random_string
    // =========================================================================

    #[test]
    fn random_string_has_exact_length() {
        for len in [1, 16, 32, 43, 64, 128] {
            assert_eq!(random_string(len).len(), len);
        }
    }

    #[test]
    fn random_string_is_url_safe() {
        let s = random_string(128);
        assert!(!s.contains('+'));
        assert!(!s.contains('/'));
        assert!(!s.contains('='));
    }

    #[test]
    fn random_string_generates_unique_values() {
        assert_ne!(random_string(32), random_string(32));
    }

    // =========================================================================
    // PKCE
    // =========================================================================

    #[test]
    fn code_verifier_length_within_rfc_bounds() {
        let verifier = code_verifier();
        assert!(verifier.len() >= 43 && verifier.len() <= 128);
    }

    #[test]
    fn code_challenge_is_deterministic() {
        let verifier = code_verifier();
        assert_eq!(code_challenge(&verifier), code_challenge(&verifier));
    }

    #[test]
    fn code_challenge_is_43_chars_for_any_verifier() {
        // Unpadded base64url of a SHA-256 digest is always 43 characters
        assert_eq!(code_challenge("a").len(), 43);
        assert_eq!(code_challenge(&random_string(64)).len(), 43);
        assert_eq!(code_challenge(&random_string(128)).len(), 43);
    }

    #[test]
    fn code_challenge_known_vector() {
        // RFC 7636 appendix B
        let challenge = code_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk");
        assert_eq!(challenge, "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM");
    }

    #[test]
    fn state_is_32_chars_and_unique() {
        let s = state();
        assert_eq!(s.len(), 32);
        assert_ne!(s, state());
    }

    // =========================================================================
    // validate_redirect_uri
    // =========================================================================

    #[test]
    fn accepts_https() {
        assert!(validate_redirect_uri("https://example.com/cb").is_ok());
    }

    #[test]
    fn accepts_loopback_http() {
        assert!(validate_redirect_uri("http://localhost:8085/cb").is_ok());
        assert!(validate_redirect_uri("http://127.0.0.1:8085/cb").is_ok());
        assert!(validate_redirect_uri("http://[::1]:8085/cb").is_ok());
    }

    #[test]
    fn rejects_non_loopback_http() {
        assert!(validate_redirect_uri("http://example.com/cb").is_err());
        assert!(validate_redirect_uri("http://localdomain.com/cb").is_err());
        // Hostname comparison is exact, not a prefix match
        assert!(validate_redirect_uri("http://localhost.evil.com/cb").is_err());
        assert!(validate_redirect_uri("http://loc-fake.evil.com/cb").is_err());
    }

    #[test]
    fn rejects_empty_and_other_schemes() {
        assert!(validate_redirect_uri("").is_err());
        assert!(validate_redirect_uri("ftp://example.com/cb").is_err());
        assert!(validate_redirect_uri("not a uri").is_err());
    }
}
