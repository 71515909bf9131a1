//! # rb-cache-redis
//!
//! Redis-backed `CacheBackend`. The cache is a rebuildable projection, so
//! nothing here retries: failures surface as `StoreError::Backend` and the
//! projection logs and moves on.

use async_trait::async_trait;
use deadpool_redis::redis::cmd;
use deadpool_redis::{Config, Connection, Pool, Runtime};
use rb_core::{CacheBackend, StoreError};
use tracing::info;

pub struct RedisCache {
    pool: Pool,
}

fn backend(err: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(err.to_string())
}

impl RedisCache {
    /// Builds the pool and checks the server answers `PING`. Startup treats
    /// a failure here as fatal.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = Config::from_url(url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(backend)?;
        let cache = Self { pool };

        let mut conn = cache.conn().await?;
        let pong: String = cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(backend)?;
        info!(reply = %pong, "redis cache reachable");
        Ok(cache)
    }

    async fn conn(&self) -> Result<Connection, StoreError> {
        self.pool.get().await.map_err(backend)
    }
}

/// Escapes glob metacharacters so a key prefix matches literally in `KEYS`.
fn glob_prefix(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('*');
    pattern
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let _: () = cmd("SET")
            .arg(key)
            .arg(value)
            .query_async(&mut conn)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut conn = self.conn().await?;
        let value: Option<Vec<u8>> = cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(backend)?;
        Ok(value)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let _: i64 = cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn().await?;
        let found: i64 = cmd("EXISTS")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(backend)?;
        Ok(found > 0)
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn().await?;
        let mut keys: Vec<String> = cmd("KEYS")
            .arg(glob_prefix(prefix))
            .query_async(&mut conn)
            .await
            .map_err(backend)?;
        keys.sort_unstable();
        Ok(keys)
    }

    async fn flush_all(&self) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let _: () = cmd("FLUSHDB")
            .query_async(&mut conn)
            .await
            .map_err(backend)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_match_literally() {
        assert_eq!(glob_prefix("thread:b:"), "thread:b:*");
        assert_eq!(glob_prefix("image:a*b:"), "image:a\\*b:*");
        assert_eq!(glob_prefix("x[1]?"), "x\\[1\\]\\?*");
    }
}
