//! # taskd Authentication
//!
//! Credential lifecycle for the taskd service: hashing account secrets,
//! managing the token signing key, issuing and validating tokens, and
//! revoking them.
//!
//! ## Security
//!
//! - Tokens are signed with Ed25519 only; `none` and HMAC algorithms are
//!   rejected before any key is used
//! - Secrets are stored as Argon2id hashes and compared in constant time
//! - Refresh tokens are single-use: spending one revokes it atomically
//! - No unsafe code is allowed in this crate
//!
//! ## Example
//!
//! ```ignore
//! use taskd_auth::{KeyPair, TokenCodec, TokenSettings};
//!
//! let keys = Arc::new(KeyPair::load_or_create(&vault)?);
//! let codec = TokenCodec::new(keys, TokenSettings::from(&config.auth), revocations);
//! let pair = codec.issue(user_id, &roles)?;
//! let claims = codec.validate(&pair.access, Some(TokenType::Access)).await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Basic credential authentication
pub mod basic;
/// Authentication errors
pub mod error;
/// Token claims, issuance and validation
pub mod jwt;
/// Signing key management
pub mod keys;
/// Prometheus metrics for authentication operations
pub mod metrics;
/// Secret hashing, verification and generation
pub mod password;
/// Token revocation and cleanup scheduling
pub mod revocation;
/// Token header and claim checks
pub mod validation;

// Re-export key types
pub use basic::authenticate_basic;
pub use error::{AuthError, AuthErrorKind, Result};
pub use jwt::{Claims, TokenCodec, TokenPair, TokenSettings};
pub use keys::KeyPair;
pub use metrics::AuthMetrics;
pub use password::{PasswordPolicy, PolicyViolation, generate_random_secret, hash_secret, verify_secret};
pub use revocation::{CleanupScheduler, RevocationReason, Revoker};
