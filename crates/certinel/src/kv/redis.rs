//! Redis-backed [`Kv`] implementation
//!
//! Uses `ConnectionManager` for transparent reconnection and
//! `redis::pipe().atomic()` (MULTI/EXEC) for the composite operations.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::debug;

use super::Kv;
use crate::errors::CertsResult;

/// Lua compare-and-delete used for lock release
const DEL_IF_EQUALS: &str = r"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('del', KEYS[1])
else
    return 0
end";

/// Redis adapter over a reconnecting async connection
#[derive(Clone)]
pub struct RedisKv {
    connection: ConnectionManager,
}

impl RedisKv {
    /// Connect to the given Redis URL
    pub async fn connect(url: &str) -> CertsResult<Self> {
        let client = redis::Client::open(url).map_err(crate::errors::CertsError::from)?;
        let connection = ConnectionManager::new(client).await?;

        debug!(url = %url, "Redis KV adapter connected");

        Ok(Self { connection })
    }

    /// Wrap an existing connection manager
    pub fn from_connection(connection: ConnectionManager) -> Self {
        Self { connection }
    }

    fn conn(&self) -> ConnectionManager {
        self.connection.clone()
    }
}

#[async_trait]
impl Kv for RedisKv {
    async fn get(&self, key: &str) -> CertsResult<Option<Vec<u8>>> {
        let mut conn = self.conn();
        let value: Option<Vec<u8>> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8]) -> CertsResult<()> {
        let mut conn = self.conn();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn set_with_expiry(&self, key: &str, value: &[u8], ttl_ms: u64) -> CertsResult<()> {
        let mut conn = self.conn();
        redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(key)
            .arg(value)
            .ignore()
            .cmd("PEXPIRE")
            .arg(key)
            .arg(ttl_ms)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn set_nx_px(&self, key: &str, value: &[u8], ttl_ms: u64) -> CertsResult<bool> {
        let mut conn = self.conn();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn del(&self, key: &str) -> CertsResult<bool> {
        let mut conn = self.conn();
        let removed: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> CertsResult<bool> {
        let mut conn = self.conn();
        let n: i64 = redis::cmd("EXISTS").arg(key).query_async(&mut conn).await?;
        Ok(n > 0)
    }

    async fn expire(&self, key: &str, ttl_ms: u64) -> CertsResult<bool> {
        let mut conn = self.conn();
        let n: i64 = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;
        Ok(n > 0)
    }

    async fn del_if_equals(&self, key: &str, expected: &[u8]) -> CertsResult<bool> {
        let mut conn = self.conn();
        let removed: i64 = redis::Script::new(DEL_IF_EQUALS)
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }

    async fn incr(&self, key: &str) -> CertsResult<i64> {
        let mut conn = self.conn();
        let value: i64 = redis::cmd("INCR").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn hget(&self, key: &str, field: &str) -> CertsResult<Option<Vec<u8>>> {
        let mut conn = self.conn();
        let value: Option<Vec<u8>> = redis::cmd("HGET")
            .arg(key)
            .arg(field)
            .query_async(&mut conn)
            .await?;
        Ok(value)
    }

    async fn hmget(&self, key: &str, fields: &[&str]) -> CertsResult<Vec<Option<Vec<u8>>>> {
        let mut conn = self.conn();
        let mut cmd = redis::cmd("HMGET");
        cmd.arg(key);
        for field in fields {
            cmd.arg(field);
        }
        let values: Vec<Option<Vec<u8>>> = cmd.query_async(&mut conn).await?;
        Ok(values)
    }

    async fn hset_multi(&self, key: &str, fields: &[(String, Vec<u8>)]) -> CertsResult<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn();
        let mut cmd = redis::cmd("HSET");
        cmd.arg(key);
        for (field, value) in fields {
            cmd.arg(field).arg(value.as_slice());
        }
        cmd.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn hset_multi_incr(
        &self,
        key: &str,
        fields: &[(String, Vec<u8>)],
        incr_field: &str,
        delta: i64,
    ) -> CertsResult<i64> {
        let mut conn = self.conn();
        let mut pipe = redis::pipe();
        pipe.atomic();
        if !fields.is_empty() {
            let mut cmd = redis::cmd("HSET");
            cmd.arg(key);
            for (field, value) in fields {
                cmd.arg(field).arg(value.as_slice());
            }
            pipe.add_command(cmd).ignore();
        }
        pipe.cmd("HINCRBY").arg(key).arg(incr_field).arg(delta);
        let (version,): (i64,) = pipe.query_async(&mut conn).await?;
        Ok(version)
    }

    async fn hdel(&self, key: &str, fields: &[&str]) -> CertsResult<usize> {
        if fields.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn();
        let mut cmd = redis::cmd("HDEL");
        cmd.arg(key);
        for field in fields {
            cmd.arg(field);
        }
        let removed: i64 = cmd.query_async(&mut conn).await?;
        Ok(removed as usize)
    }

    async fn hexists(&self, key: &str, field: &str) -> CertsResult<bool> {
        let mut conn = self.conn();
        let n: i64 = redis::cmd("HEXISTS")
            .arg(key)
            .arg(field)
            .query_async(&mut conn)
            .await?;
        Ok(n > 0)
    }

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> CertsResult<i64> {
        let mut conn = self.conn();
        let value: i64 = redis::cmd("HINCRBY")
            .arg(key)
            .arg(field)
            .arg(delta)
            .query_async(&mut conn)
            .await?;
        Ok(value)
    }
}

impl std::fmt::Debug for RedisKv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisKv").finish_non_exhaustive()
    }
}
