//! Keyed store used for all session and user state
//!
//! Every operation is atomic on its own key. Writes refresh the key's TTL so a
//! session stays alive as long as it is in use. Sequences of operations are
//! not transactional.

pub mod memory;
pub mod redis_store;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::Result;

pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyedStore: Send + Sync {
    /// Read a string value
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a string value
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Write a string value and return the previous one
    async fn swap(&self, key: &str, value: &str) -> Result<Option<String>>;

    /// Add `delta` to an integer value (missing counts as 0) and return the result
    async fn incr(&self, key: &str, delta: i64) -> Result<i64>;

    /// Add a set member. Returns `true` if it was not present.
    async fn set_add(&self, key: &str, member: &str) -> Result<bool>;

    /// Remove a set member. Returns `true` if it was present.
    async fn set_remove(&self, key: &str, member: &str) -> Result<bool>;

    async fn set_members(&self, key: &str) -> Result<Vec<String>>;

    async fn set_len(&self, key: &str) -> Result<usize>;

    async fn set_contains(&self, key: &str, member: &str) -> Result<bool>;

    /// Write hash fields, keeping fields not mentioned
    async fn hash_set(&self, key: &str, fields: Vec<(String, String)>) -> Result<()>;

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>>;

    /// Read a whole hash. A missing key reads as an empty map.
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>>;
}
