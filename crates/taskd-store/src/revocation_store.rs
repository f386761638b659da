//! Revocation store trait
//!
//! Persisted set of revoked token identifiers. A token id present here is
//! rejected by validation regardless of its signature; records are purged
//! some time after the token would have expired anyway.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use taskd_types::StoreResult;
use uuid::Uuid;

/// A revoked token and the time it would have expired naturally
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevokedToken {
    pub token_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// Trait for revocation storage operations
///
/// Implementations must give read-after-write visibility: an `insert` that
/// completes before an `exists` begins is observed by it.
#[async_trait]
pub trait RevocationStore: Send + Sync {
    /// Record a revocation. Fails with `StoreError::Conflict` if the token
    /// was already revoked, so that exactly one concurrent caller succeeds.
    async fn insert(&self, token_id: Uuid, expires_at: DateTime<Utc>) -> StoreResult<()>;

    /// Whether the token has been revoked
    async fn exists(&self, token_id: Uuid) -> StoreResult<bool>;

    /// Remove a revocation record. Removing an absent record is not an error.
    async fn delete(&self, token_id: Uuid) -> StoreResult<()>;

    /// Every stored revocation record
    async fn list_all(&self) -> StoreResult<Vec<RevokedToken>>;
}
