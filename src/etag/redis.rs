//! Redis-backed ETag cache. `compare_and_swap` runs as a single Lua script
//! so the check-then-set step the conditional-write protocol depends on is
//! genuinely atomic, not just sequential.

use async_trait::async_trait;
use deadpool_redis::redis::{AsyncCommands, Script};
use deadpool_redis::Pool;

use crate::error::{Error, Result};

use super::{CheckResult, EtagCache};

const CAS_SCRIPT: &str = r#"
local current = redis.call("GET", KEYS[1])
if current == false then
  return -1
elseif current == ARGV[1] then
  redis.call("SET", KEYS[1], ARGV[2])
  return 1
else
  return 0
end
"#;

pub struct RedisEtagCache {
    pool: Pool,
}

impl RedisEtagCache {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    fn key(id: &str) -> String {
        format!("plan:etag:{id}")
    }
}

#[async_trait]
impl EtagCache for RedisEtagCache {
    async fn set(&self, id: &str, etag: &str) -> Result<()> {
        let mut conn = self.pool.get().await.map_err(|e| Error::RedisError { message: e.to_string() })?;
        conn.set::<_, _, ()>(Self::key(id), etag)
            .await
            .map_err(|e| Error::RedisError { message: e.to_string() })
    }

    async fn get(&self, id: &str) -> Result<Option<String>> {
        let mut conn = self.pool.get().await.map_err(|e| Error::RedisError { message: e.to_string() })?;
        conn.get(Self::key(id)).await.map_err(|e| Error::RedisError { message: e.to_string() })
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut conn = self.pool.get().await.map_err(|e| Error::RedisError { message: e.to_string() })?;
        conn.del::<_, ()>(Self::key(id)).await.map_err(|e| Error::RedisError { message: e.to_string() })
    }

    async fn compare_and_swap(&self, id: &str, expected: &str, new: &str) -> Result<CheckResult> {
        let mut conn = self.pool.get().await.map_err(|e| Error::RedisError { message: e.to_string() })?;
        let result: i64 = Script::new(CAS_SCRIPT)
            .key(Self::key(id))
            .arg(expected)
            .arg(new)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| Error::RedisError { message: e.to_string() })?;

        Ok(match result {
            1 => CheckResult::Ok,
            -1 => CheckResult::NotFound,
            _ => CheckResult::Mismatch,
        })
    }
}
