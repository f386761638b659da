use taskd_types::TokenType;
use thiserror::Error;

use crate::password::HashError;

/// Authentication errors
///
/// Variants carry enough detail for server-side logs. Callers only ever see
/// the coarse [`AuthErrorKind`] and its fixed message.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Malformed token - cannot be decoded
    #[error("Invalid token format: {0}")]
    InvalidTokenFormat(String),

    /// Token has expired
    #[error("Token expired")]
    TokenExpired,

    /// Signature verification failed
    #[error("Invalid signature")]
    InvalidSignature,

    /// Issuer doesn't match this service
    #[error("Invalid issuer")]
    InvalidIssuer,

    /// Algorithm not in allowed list
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Token id found in the revocation store
    #[error("Token revoked")]
    TokenRevoked,

    /// Token was revoked by a concurrent caller first
    #[error("Token already revoked")]
    AlreadyRevoked,

    /// Endpoint requires a different kind of token
    #[error("Wrong token type: expected {expected}, got {actual}")]
    WrongTokenType {
        /// Type the endpoint requires
        expected: TokenType,
        /// Type the caller presented
        actual: TokenType,
    },

    /// No credentials attached to the call
    #[error("Missing credentials")]
    MissingCredentials,

    /// Authorization scheme other than bearer or basic
    #[error("Unsupported authorization scheme: {0}")]
    UnsupportedScheme(String),

    /// Authorization header could not be parsed
    #[error("Malformed credentials: {0}")]
    MalformedCredentials(String),

    /// Unknown account or wrong secret
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// A request-supplied identifier could not be parsed
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Secret vault read/write failure
    #[error("Key storage error: {0}")]
    KeyStorage(String),

    /// Stored key material is unusable
    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    /// Token signing failed
    #[error("Signing failed: {0}")]
    Signing(String),

    /// Revocation or account store failure
    #[error("Store error: {0}")]
    Store(String),

    /// Credential hashing failure (KDF, entropy or corrupt stored hash)
    #[error("Credential hashing error: {0}")]
    Hashing(String),

    /// Cleanup scheduler is not running
    #[error("Cleanup scheduler unavailable")]
    SchedulerUnavailable,
}

/// Caller-visible error classes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    /// Missing, malformed, expired, revoked or badly signed credentials
    Unauthenticated,
    /// Wrong token type for the endpoint, malformed identifiers
    InvalidArgument,
    /// Vault, store, signing or entropy failures
    Internal,
}

impl AuthErrorKind {
    /// Fixed message safe to return to callers
    pub fn public_message(&self) -> &'static str {
        match self {
            AuthErrorKind::Unauthenticated => "unauthenticated",
            AuthErrorKind::InvalidArgument => "invalid credentials for this operation",
            AuthErrorKind::Internal => "internal error",
        }
    }
}

impl AuthError {
    /// Classify the error for callers
    pub fn kind(&self) -> AuthErrorKind {
        match self {
            AuthError::InvalidTokenFormat(_)
            | AuthError::TokenExpired
            | AuthError::InvalidSignature
            | AuthError::InvalidIssuer
            | AuthError::UnsupportedAlgorithm(_)
            | AuthError::TokenRevoked
            | AuthError::AlreadyRevoked
            | AuthError::MissingCredentials
            | AuthError::UnsupportedScheme(_)
            | AuthError::MalformedCredentials(_)
            | AuthError::InvalidCredentials => AuthErrorKind::Unauthenticated,

            AuthError::WrongTokenType { .. } | AuthError::InvalidIdentifier(_) => {
                AuthErrorKind::InvalidArgument
            },

            AuthError::KeyStorage(_)
            | AuthError::InvalidKey(_)
            | AuthError::Signing(_)
            | AuthError::Store(_)
            | AuthError::Hashing(_)
            | AuthError::SchedulerUnavailable => AuthErrorKind::Internal,
        }
    }

    /// Short label used for metrics and structured logs
    pub fn label(&self) -> &'static str {
        match self {
            AuthError::InvalidTokenFormat(_) => "invalid_format",
            AuthError::TokenExpired => "expired",
            AuthError::InvalidSignature => "invalid_signature",
            AuthError::InvalidIssuer => "invalid_issuer",
            AuthError::UnsupportedAlgorithm(_) => "unsupported_algorithm",
            AuthError::TokenRevoked | AuthError::AlreadyRevoked => "revoked",
            AuthError::WrongTokenType { .. } => "wrong_type",
            AuthError::MissingCredentials => "missing",
            AuthError::UnsupportedScheme(_) => "unsupported_scheme",
            AuthError::MalformedCredentials(_) => "malformed",
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::InvalidIdentifier(_) => "invalid_identifier",
            AuthError::KeyStorage(_) | AuthError::InvalidKey(_) => "key_error",
            AuthError::Signing(_) => "signing_error",
            AuthError::Store(_) => "store_error",
            AuthError::Hashing(_) => "hashing_error",
            AuthError::SchedulerUnavailable => "scheduler_error",
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::InvalidToken => {
                AuthError::InvalidTokenFormat("Invalid JWT structure".into())
            },
            ErrorKind::InvalidSignature => AuthError::InvalidSignature,
            ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            ErrorKind::InvalidIssuer => AuthError::InvalidIssuer,
            ErrorKind::InvalidAlgorithm => {
                AuthError::UnsupportedAlgorithm("Algorithm not supported".into())
            },
            ErrorKind::InvalidKeyFormat => AuthError::InvalidKey(err.to_string()),
            _ => AuthError::InvalidTokenFormat(format!("JWT error: {}", err)),
        }
    }
}

impl From<HashError> for AuthError {
    fn from(err: HashError) -> Self {
        match err {
            HashError::Mismatch => AuthError::InvalidCredentials,
            other => AuthError::Hashing(other.to_string()),
        }
    }
}

impl From<taskd_config::secrets::SecretError> for AuthError {
    fn from(err: taskd_config::secrets::SecretError) -> Self {
        AuthError::KeyStorage(err.to_string())
    }
}

/// Result type alias for authentication operations
pub type Result<T> = std::result::Result<T, AuthError>;
