//! Key/value backend abstraction
//!
//! The coordinator talks to its backing store through the [`Kv`] trait so
//! that many stateless processes can share one Redis while tests run
//! against an in-process map. The trait mirrors the small slice of the
//! Redis command set the stores need: flat keys with TTL, hash fields,
//! and a few composites that must execute atomically.

mod memory;
mod redis;

pub use memory::MemoryKv;
pub use redis::RedisKv;

use async_trait::async_trait;

use crate::errors::CertsResult;

/// Byte-oriented key/value operations over the shared backing store
///
/// Values are raw bytes; callers own serialization. Composite operations
/// (`set_with_expiry`, `del_if_equals`, `hset_multi_incr`) are atomic:
/// either every command in the composite applies or none does.
#[async_trait]
pub trait Kv: Send + Sync {
    async fn get(&self, key: &str) -> CertsResult<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: &[u8]) -> CertsResult<()>;

    /// SET + PEXPIRE in one atomic pipeline
    async fn set_with_expiry(&self, key: &str, value: &[u8], ttl_ms: u64) -> CertsResult<()>;

    /// SET NX PX; returns whether the key was newly set
    async fn set_nx_px(&self, key: &str, value: &[u8], ttl_ms: u64) -> CertsResult<bool>;

    async fn del(&self, key: &str) -> CertsResult<bool>;

    async fn exists(&self, key: &str) -> CertsResult<bool>;

    async fn expire(&self, key: &str, ttl_ms: u64) -> CertsResult<bool>;

    /// Delete `key` only while it still holds `expected`; returns whether
    /// a deletion happened. Used for lock release so a stale holder can
    /// never drop a lease it no longer owns.
    async fn del_if_equals(&self, key: &str, expected: &[u8]) -> CertsResult<bool>;

    /// INCR; returns the post-increment value
    async fn incr(&self, key: &str) -> CertsResult<i64>;

    async fn hget(&self, key: &str, field: &str) -> CertsResult<Option<Vec<u8>>>;

    /// Multi-field read preserving request order
    async fn hmget(&self, key: &str, fields: &[&str]) -> CertsResult<Vec<Option<Vec<u8>>>>;

    /// One HSET writing all fields in a single round-trip
    async fn hset_multi(&self, key: &str, fields: &[(String, Vec<u8>)]) -> CertsResult<()>;

    /// HSET of all fields plus HINCRBY on `incr_field`, atomically; returns
    /// the post-increment counter value
    async fn hset_multi_incr(
        &self,
        key: &str,
        fields: &[(String, Vec<u8>)],
        incr_field: &str,
        delta: i64,
    ) -> CertsResult<i64>;

    async fn hdel(&self, key: &str, fields: &[&str]) -> CertsResult<usize>;

    async fn hexists(&self, key: &str, field: &str) -> CertsResult<bool>;

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> CertsResult<i64>;
}
