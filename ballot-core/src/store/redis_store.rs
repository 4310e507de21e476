//! Redis implementation of [`KeyedStore`]

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager as RedisConnectionManager;
use redis::AsyncCommands;

use super::KeyedStore;
use crate::Result;

/// Keyed store backed by Redis
///
/// Each write is sent together with an `EXPIRE` (or `EX` option) in one atomic
/// pipeline so keys keep a refreshing TTL.
#[derive(Clone)]
pub struct RedisStore {
    redis: RedisConnectionManager,
    ttl_seconds: i64,
}

impl RedisStore {
    #[must_use]
    pub fn new(redis: RedisConnectionManager, ttl: Duration) -> Self {
        Self {
            redis,
            ttl_seconds: i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX),
        }
    }

    /// Connect to Redis with a timeout on the initial connection
    pub async fn connect(url: &str, ttl: Duration, connect_timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let manager = tokio::time::timeout(connect_timeout, RedisConnectionManager::new(client))
            .await
            .map_err(|_| crate::Error::Store(format!("timed out connecting to Redis at {url}")))??;

        tracing::info!(ttl_seconds = ttl.as_secs(), "Redis store connected");
        Ok(Self::new(manager, ttl))
    }
}

#[async_trait]
impl KeyedStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.redis.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.redis.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(self.ttl_seconds)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn swap(&self, key: &str, value: &str) -> Result<Option<String>> {
        let mut conn = self.redis.clone();
        // SET ... GET returns the old value atomically (Redis >= 6.2)
        let previous: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("GET")
            .arg("EX")
            .arg(self.ttl_seconds)
            .query_async(&mut conn)
            .await?;
        Ok(previous)
    }

    async fn incr(&self, key: &str, delta: i64) -> Result<i64> {
        let mut conn = self.redis.clone();
        let (value,): (i64,) = redis::pipe()
            .atomic()
            .cmd("INCRBY")
            .arg(key)
            .arg(delta)
            .cmd("EXPIRE")
            .arg(key)
            .arg(self.ttl_seconds)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(value)
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.redis.clone();
        let (added,): (i64,) = redis::pipe()
            .atomic()
            .cmd("SADD")
            .arg(key)
            .arg(member)
            .cmd("EXPIRE")
            .arg(key)
            .arg(self.ttl_seconds)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(added > 0)
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.redis.clone();
        let (removed,): (i64,) = redis::pipe()
            .atomic()
            .cmd("SREM")
            .arg(key)
            .arg(member)
            .cmd("EXPIRE")
            .arg(key)
            .arg(self.ttl_seconds)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.redis.clone();
        let members: Vec<String> = conn.smembers(key).await?;
        Ok(members)
    }

    async fn set_len(&self, key: &str) -> Result<usize> {
        let mut conn = self.redis.clone();
        let len: usize = conn.scard(key).await?;
        Ok(len)
    }

    async fn set_contains(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.redis.clone();
        let present: bool = conn.sismember(key, member).await?;
        Ok(present)
    }

    async fn hash_set(&self, key: &str, fields: Vec<(String, String)>) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        pipe.atomic().cmd("HSET").arg(key);
        for (field, value) in &fields {
            pipe.arg(field).arg(value);
        }
        pipe.ignore()
            .cmd("EXPIRE")
            .arg(key)
            .arg(self.ttl_seconds)
            .ignore();

        let mut conn = self.redis.clone();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>> {
        let mut conn = self.redis.clone();
        let value: Option<String> = conn.hget(key, field).await?;
        Ok(value)
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.redis.clone();
        let fields: HashMap<String, String> = conn.hgetall(key).await?;
        Ok(fields)
    }
}
