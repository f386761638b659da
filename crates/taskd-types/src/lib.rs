//! # taskd Types
//!
//! Shared type definitions for the taskd service.
//!
//! This crate holds the identity, credential and account types that flow
//! between the authentication core, the storage layer and the RPC surface,
//! keeping them free of circular dependencies.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Roles
// ============================================================================

/// Role granted to administrators
pub const ROLE_ADMIN: &str = "ADMIN";

/// Role granted to every regular account
pub const ROLE_USER: &str = "USER";

// ============================================================================
// Token and Credential Types
// ============================================================================

/// The kind of a signed token, fixed at issuance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    /// Short-lived token presented on every protected call
    Access,
    /// Long-lived, single-use token exchanged for a new pair
    Refresh,
    /// Password-style credential marker
    Basic,
}

impl TokenType {
    /// Wire name of the token type, as carried in the `typ` claim
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
            TokenType::Basic => "basic",
        }
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity verified from a bearer token, scoped to a single call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    /// Account the token was issued to
    pub subject: Uuid,
    /// Unique identifier of the presented token
    pub token_id: Uuid,
    /// Roles carried by the token, in issuance order
    pub roles: Vec<String>,
    /// Kind of the presented token
    pub token_type: TokenType,
    /// Natural expiry of the presented token
    pub expires_at: DateTime<Utc>,
}

impl VerifiedIdentity {
    /// Whether the identity carries the given role
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Raw, unverified identifier/secret pair taken from a basic credential header
#[derive(Clone, PartialEq, Eq)]
pub struct BasicCredentials {
    /// Account identifier (email)
    pub identifier: String,
    /// Plaintext secret, checked later against the stored hash
    pub secret: String,
}

impl fmt::Debug for BasicCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicCredentials")
            .field("identifier", &self.identifier)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Credentials the authentication gate attaches to a call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    /// A fully validated bearer token
    Token(VerifiedIdentity),
    /// An unverified basic credential pair
    Basic(BasicCredentials),
}

// ============================================================================
// Accounts
// ============================================================================

/// A registered account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub roles: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Data needed to create an account
#[derive(Clone, PartialEq, Eq)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    /// Credential hash, never the plaintext secret
    pub secret_hash: String,
    pub roles: Vec<String>,
}

impl fmt::Debug for NewUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewUser")
            .field("name", &self.name)
            .field("email", &self.email)
            .field("roles", &self.roles)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Not found")]
    NotFound,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
