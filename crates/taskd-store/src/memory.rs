//! In-memory storage backend for testing and development

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use taskd_types::{NewUser, ROLE_ADMIN, StoreError, StoreResult, User};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{AccountStore, RevocationStore, RevokedToken};

/// An account together with its credential hash
#[derive(Debug, Clone)]
struct StoredAccount {
    user: User,
    secret_hash: String,
}

/// In-memory store implementing both account and revocation storage
#[derive(Clone)]
pub struct MemoryBackend {
    data: Arc<RwLock<MemoryStore>>,
}

#[derive(Default)]
struct MemoryStore {
    /// Accounts by id
    accounts: HashMap<Uuid, StoredAccount>,

    /// Lowercased email to account id
    email_index: HashMap<String, Uuid>,

    /// Revoked token ids and their natural expiry
    revoked: HashMap<Uuid, DateTime<Utc>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self { data: Arc::new(RwLock::new(MemoryStore::default())) }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[async_trait]
impl AccountStore for MemoryBackend {
    async fn create_user(&self, new_user: NewUser) -> StoreResult<User> {
        let key = normalize_email(&new_user.email);
        let mut store = self.data.write().await;

        if store.email_index.contains_key(&key) {
            return Err(StoreError::Conflict(format!("email {} already registered", key)));
        }

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            name: new_user.name,
            email: new_user.email.trim().to_string(),
            roles: new_user.roles,
            created_at: now,
            updated_at: now,
        };

        store.email_index.insert(key, user.id);
        store.accounts.insert(
            user.id,
            StoredAccount { user: user.clone(), secret_hash: new_user.secret_hash },
        );

        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<(User, String)>> {
        let store = self.data.read().await;
        let found = store
            .email_index
            .get(&normalize_email(email))
            .and_then(|id| store.accounts.get(id))
            .map(|account| (account.user.clone(), account.secret_hash.clone()));
        Ok(found)
    }

    async fn roles(&self, user_id: Uuid) -> StoreResult<Vec<String>> {
        let store = self.data.read().await;
        store
            .accounts
            .get(&user_id)
            .map(|account| account.user.roles.clone())
            .ok_or(StoreError::NotFound)
    }

    async fn update_secret(&self, user_id: Uuid, secret_hash: String) -> StoreResult<()> {
        let mut store = self.data.write().await;
        let account = store.accounts.get_mut(&user_id).ok_or(StoreError::NotFound)?;
        account.secret_hash = secret_hash;
        account.user.updated_at = Utc::now();
        Ok(())
    }

    async fn grant_role(&self, email: &str, role: &str) -> StoreResult<()> {
        let mut store = self.data.write().await;
        let id = *store.email_index.get(&normalize_email(email)).ok_or(StoreError::NotFound)?;
        let account = store.accounts.get_mut(&id).ok_or(StoreError::NotFound)?;

        if !account.user.roles.iter().any(|r| r == role) {
            account.user.roles.push(role.to_string());
            account.user.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn count(&self) -> StoreResult<u64> {
        Ok(self.data.read().await.accounts.len() as u64)
    }

    async fn admin_exists(&self) -> StoreResult<bool> {
        let store = self.data.read().await;
        Ok(store.accounts.values().any(|a| a.user.roles.iter().any(|r| r == ROLE_ADMIN)))
    }
}

#[async_trait]
impl RevocationStore for MemoryBackend {
    async fn insert(&self, token_id: Uuid, expires_at: DateTime<Utc>) -> StoreResult<()> {
        let mut store = self.data.write().await;
        if store.revoked.contains_key(&token_id) {
            return Err(StoreError::Conflict(format!("token {} already revoked", token_id)));
        }
        store.revoked.insert(token_id, expires_at);
        Ok(())
    }

    async fn exists(&self, token_id: Uuid) -> StoreResult<bool> {
        Ok(self.data.read().await.revoked.contains_key(&token_id))
    }

    async fn delete(&self, token_id: Uuid) -> StoreResult<()> {
        self.data.write().await.revoked.remove(&token_id);
        Ok(())
    }

    async fn list_all(&self) -> StoreResult<Vec<RevokedToken>> {
        let store = self.data.read().await;
        Ok(store
            .revoked
            .iter()
            .map(|(token_id, expires_at)| RevokedToken {
                token_id: *token_id,
                expires_at: *expires_at,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use taskd_types::ROLE_USER;

    use super::*;

    fn new_user(email: &str, roles: &[&str]) -> NewUser {
        NewUser {
            name: "Test User".to_string(),
            email: email.to_string(),
            secret_hash: "salt$key".to_string(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_grant_role() {
        let store = MemoryBackend::new();
        let user = store.create_user(new_user("admin@localhost", &[ROLE_USER])).await.unwrap();
        assert!(!store.admin_exists().await.unwrap());

        store.grant_role("ADMIN@localhost", ROLE_ADMIN).await.unwrap();
        store.grant_role("admin@localhost", ROLE_ADMIN).await.unwrap();

        assert_eq!(store.roles(user.id).await.unwrap(), vec![ROLE_USER, ROLE_ADMIN]);
        assert!(store.admin_exists().await.unwrap());
        assert!(matches!(
            store.grant_role("ghost@localhost", ROLE_ADMIN).await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_update_secret() {
        let store = MemoryBackend::new();
        let user = store.create_user(new_user("alice@example.com", &[ROLE_USER])).await.unwrap();

        store.update_secret(user.id, "salt2$key2".to_string()).await.unwrap();

        let (found, hash) = store.find_by_email("alice@example.com").await.unwrap().unwrap();
        assert_eq!(hash, "salt2$key2");
        assert!(found.updated_at >= user.updated_at);
        assert!(matches!(
            store.update_secret(Uuid::new_v4(), "x$y".to_string()).await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_create_and_find_user() {
        let store = MemoryBackend::new();
        let user = store.create_user(new_user("alice@example.com", &[ROLE_USER])).await.unwrap();

        let (found, hash) = store.find_by_email("Alice@Example.com").await.unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert_eq!(hash, "salt$key");
        assert_eq!(store.roles(user.id).await.unwrap(), vec![ROLE_USER.to_string()]);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_email_conflicts() {
        let store = MemoryBackend::new();
        store.create_user(new_user("bob@example.com", &[ROLE_USER])).await.unwrap();

        let result = store.create_user(new_user(" BOB@example.com ", &[ROLE_USER])).await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unknown_user() {
        let store = MemoryBackend::new();
        assert!(store.find_by_email("nobody@example.com").await.unwrap().is_none());
        assert!(matches!(store.roles(Uuid::new_v4()).await, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn test_admin_exists() {
        let store = MemoryBackend::new();
        assert!(!store.admin_exists().await.unwrap());

        store.create_user(new_user("user@example.com", &[ROLE_USER])).await.unwrap();
        assert!(!store.admin_exists().await.unwrap());

        store.create_user(new_user("admin@localhost", &[ROLE_ADMIN, ROLE_USER])).await.unwrap();
        assert!(store.admin_exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_revocation_lifecycle() {
        let store = MemoryBackend::new();
        let token_id = Uuid::new_v4();
        let expiry = Utc::now() + Duration::hours(1);

        assert!(!store.exists(token_id).await.unwrap());

        store.insert(token_id, expiry).await.unwrap();
        assert!(store.exists(token_id).await.unwrap());
        assert_eq!(
            store.list_all().await.unwrap(),
            vec![RevokedToken { token_id, expires_at: expiry }]
        );

        store.delete(token_id).await.unwrap();
        assert!(!store.exists(token_id).await.unwrap());
        // deleting twice is fine
        store.delete(token_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_double_revocation_conflicts() {
        let store = MemoryBackend::new();
        let token_id = Uuid::new_v4();
        let expiry = Utc::now() + Duration::hours(1);

        store.insert(token_id, expiry).await.unwrap();
        assert!(matches!(store.insert(token_id, expiry).await, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_concurrent_revocation_single_winner() {
        let store = MemoryBackend::new();
        let token_id = Uuid::new_v4();
        let expiry = Utc::now() + Duration::hours(1);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.insert(token_id, expiry).await.is_ok() })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
