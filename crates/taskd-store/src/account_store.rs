//! Account store trait
//!
//! Provides the account lookups needed to sign users up, log them in and
//! bootstrap the first administrator.

use async_trait::async_trait;
use taskd_types::{NewUser, StoreResult, User};
use uuid::Uuid;

/// Trait for account storage operations
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Create a new account. Fails with `StoreError::Conflict` if the email is taken.
    async fn create_user(&self, user: NewUser) -> StoreResult<User>;

    /// Look up an account and its credential hash by email (case-insensitive)
    async fn find_by_email(&self, email: &str) -> StoreResult<Option<(User, String)>>;

    /// Roles held by an account, in grant order
    async fn roles(&self, user_id: Uuid) -> StoreResult<Vec<String>>;

    /// Replace an account's credential hash. Fails with `StoreError::NotFound` for an unknown id.
    async fn update_secret(&self, user_id: Uuid, secret_hash: String) -> StoreResult<()>;

    /// Append a role to the account with this email; a role already held is kept once
    async fn grant_role(&self, email: &str, role: &str) -> StoreResult<()>;

    /// Number of registered accounts
    async fn count(&self) -> StoreResult<u64>;

    /// Whether any account holds the administrator role
    async fn admin_exists(&self) -> StoreResult<bool>;
}
