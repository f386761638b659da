//! # taskd Store - Storage Abstraction Layer
//!
//! Storage contracts consumed by the authentication core and the account
//! RPCs, with an in-memory backend and an optional Redis revocation backend.

pub mod account_store;
pub mod memory;
#[cfg(feature = "redis-revocation")]
pub mod redis_store;
pub mod revocation_store;

pub use account_store::AccountStore;
pub use memory::MemoryBackend;
#[cfg(feature = "redis-revocation")]
pub use redis_store::RedisRevocationStore;
pub use revocation_store::{RevocationStore, RevokedToken};
pub use taskd_types::{StoreError, StoreResult};
