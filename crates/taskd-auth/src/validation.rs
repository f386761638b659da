//! Token header and claim checks
//!
//! These run around the signature check performed by `jsonwebtoken`:
//! - the header algorithm is checked before any key is used, which defeats
//!   algorithm-confusion attacks (`none`, or an HMAC keyed with the public key)
//! - timestamp sanity (`iat` not in the future, `exp` after `iat`) is checked
//!   after the signature

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::{error::AuthError, jwt::Claims};

/// Forbidden JWT algorithms that are never accepted
///
/// - `none`: No signature verification (trivially bypassable)
/// - `HS256`, `HS384`, `HS512`: Symmetric algorithms (shared secret vulnerability)
pub const FORBIDDEN_ALGORITHMS: &[&str] = &["none", "HS256", "HS384", "HS512"];

/// Accepted JWT algorithms
///
/// Tokens are only ever signed with Ed25519. This list is intentionally not
/// configurable.
pub const ACCEPTED_ALGORITHMS: &[&str] = &["EdDSA"];

/// Read the `alg` field from a compact JWT without verifying anything
///
/// # Errors
///
/// Returns `InvalidTokenFormat` if the token does not have three segments or
/// the header is not base64url-encoded JSON with a string `alg`.
pub fn decode_header_algorithm(token: &str) -> Result<String, AuthError> {
    let mut parts = token.split('.');
    let (Some(header), Some(_), Some(_), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(AuthError::InvalidTokenFormat("JWT must have 3 parts".into()));
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(header)
        .map_err(|e| AuthError::InvalidTokenFormat(format!("header is not base64url: {}", e)))?;

    let value: serde_json::Value = serde_json::from_slice(&bytes)
        .map_err(|e| AuthError::InvalidTokenFormat(format!("header is not JSON: {}", e)))?;

    value
        .get("alg")
        .and_then(|alg| alg.as_str())
        .map(str::to_string)
        .ok_or_else(|| AuthError::InvalidTokenFormat("header has no alg".into()))
}

/// Validate a JWT algorithm against the security policy
///
/// Uses constant-time comparison to prevent timing attacks.
///
/// ```rust
/// use taskd_auth::validation::validate_algorithm;
///
/// assert!(validate_algorithm("EdDSA").is_ok());
/// assert!(validate_algorithm("HS256").is_err());
/// assert!(validate_algorithm("none").is_err());
/// ```
pub fn validate_algorithm(alg: &str) -> Result<(), AuthError> {
    if FORBIDDEN_ALGORITHMS
        .iter()
        .any(|forbidden| alg.as_bytes().ct_eq(forbidden.as_bytes()).into())
    {
        warn!(algorithm = %alg, "Rejected token with forbidden algorithm");
        return Err(AuthError::UnsupportedAlgorithm(format!(
            "Algorithm '{}' is not allowed for security reasons",
            alg
        )));
    }

    if !ACCEPTED_ALGORITHMS.iter().any(|a| a.as_bytes().ct_eq(alg.as_bytes()).into()) {
        return Err(AuthError::UnsupportedAlgorithm(format!(
            "Algorithm '{}' is not in accepted list (only EdDSA is supported)",
            alg
        )));
    }

    Ok(())
}

/// Check issued-at/expiry consistency of signature-verified claims
pub fn validate_timestamps(claims: &Claims, now: u64, clock_skew: u64) -> Result<(), AuthError> {
    if claims.iat > now + clock_skew {
        return Err(AuthError::InvalidTokenFormat("iat claim is in the future".into()));
    }

    if claims.exp <= claims.iat {
        return Err(AuthError::InvalidTokenFormat("exp claim is not after iat".into()));
    }

    Ok(())
}
