//! Redis-backed revocation store
//!
//! Revocations live in a single hash mapping token id to the Unix expiry of
//! the revoked token. Records are removed by the cleanup scheduler rather
//! than by Redis TTLs, so that the startup sweep can see every pending one.
//!
//! ```ignore
//! use taskd_store::RedisRevocationStore;
//!
//! let store = RedisRevocationStore::new("redis://localhost:6379").await?;
//! ```

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use taskd_types::{StoreError, StoreResult};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{RevocationStore, RevokedToken};

const DEFAULT_KEY: &str = "taskd:revoked";

pub struct RedisRevocationStore {
    client: redis::aio::ConnectionManager,
    key: String,
}

impl RedisRevocationStore {
    /// Connect to Redis
    ///
    /// # Errors
    ///
    /// Returns an error if the Redis connection cannot be established
    pub async fn new(redis_url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(redis_url).map_err(|e| {
            StoreError::Backend(format!("Failed to create Redis client: {}", e))
        })?;

        let connection_manager = redis::aio::ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to connect to Redis: {}", e)))?;

        debug!("Redis revocation store initialized");

        Ok(Self { client: connection_manager, key: DEFAULT_KEY.to_string() })
    }

    /// Use a different hash key (e.g. to share one Redis between deployments)
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }
}

#[async_trait]
impl RevocationStore for RedisRevocationStore {
    async fn insert(&self, token_id: Uuid, expires_at: DateTime<Utc>) -> StoreResult<()> {
        let mut conn = self.client.clone();

        // HSETNX gives the single-winner guarantee across nodes
        let created: bool = conn
            .hset_nx(&self.key, token_id.to_string(), expires_at.timestamp())
            .await
            .map_err(|e| StoreError::Backend(format!("Redis HSETNX failed: {}", e)))?;

        if !created {
            return Err(StoreError::Conflict(format!("token {} already revoked", token_id)));
        }
        Ok(())
    }

    async fn exists(&self, token_id: Uuid) -> StoreResult<bool> {
        let mut conn = self.client.clone();
        conn.hexists(&self.key, token_id.to_string())
            .await
            .map_err(|e| StoreError::Backend(format!("Redis HEXISTS failed: {}", e)))
    }

    async fn delete(&self, token_id: Uuid) -> StoreResult<()> {
        let mut conn = self.client.clone();
        let _: i64 = conn
            .hdel(&self.key, token_id.to_string())
            .await
            .map_err(|e| StoreError::Backend(format!("Redis HDEL failed: {}", e)))?;
        Ok(())
    }

    async fn list_all(&self) -> StoreResult<Vec<RevokedToken>> {
        let mut conn = self.client.clone();
        let entries: HashMap<String, i64> = conn
            .hgetall(&self.key)
            .await
            .map_err(|e| StoreError::Backend(format!("Redis HGETALL failed: {}", e)))?;

        let mut records = Vec::with_capacity(entries.len());
        for (field, expiry) in entries {
            let (Ok(token_id), Some(expires_at)) =
                (Uuid::parse_str(&field), DateTime::<Utc>::from_timestamp(expiry, 0))
            else {
                warn!(field = %field, expiry, "Skipping malformed revocation record");
                continue;
            };
            records.push(RevokedToken { token_id, expires_at });
        }

        Ok(records)
    }
}
