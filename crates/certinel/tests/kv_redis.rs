//! Integration tests for the Redis KV adapter
//!
//! These tests require a running Redis instance.
//!
//! To run with Docker:
//! ```bash
//! docker run --rm -p 6379:6379 redis:7-alpine
//! cargo test -p certinel --test kv_redis
//! ```
//!
//! Environment variables:
//! - `REDIS_URL`: Redis connection URL (default: redis://127.0.0.1:6379)
//! - `SKIP_REDIS_TESTS`: Set to skip these tests when Redis is unavailable

use std::time::Duration;

use certinel::kv::{Kv, RedisKv};

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

fn should_skip() -> bool {
    std::env::var("SKIP_REDIS_TESTS").is_ok()
}

/// Connect, or `None` when Redis is unavailable (test is skipped)
async fn connect() -> Option<RedisKv> {
    if should_skip() {
        return None;
    }
    tokio::time::timeout(Duration::from_secs(2), RedisKv::connect(&redis_url()))
        .await
        .ok()?
        .ok()
}

/// Unique key prefix so concurrent test runs cannot collide
fn prefix() -> String {
    format!("certinel:test:{}:", uuid::Uuid::new_v4())
}

#[tokio::test]
async fn test_flat_key_roundtrip() {
    let Some(kv) = connect().await else {
        eprintln!("Redis unavailable, skipping");
        return;
    };
    let k = format!("{}k", prefix());

    kv.set(&k, b"\x00binary\xff").await.unwrap();
    assert_eq!(kv.get(&k).await.unwrap(), Some(b"\x00binary\xff".to_vec()));
    assert!(kv.exists(&k).await.unwrap());
    assert!(kv.del(&k).await.unwrap());
    assert_eq!(kv.get(&k).await.unwrap(), None);
}

#[tokio::test]
async fn test_set_with_expiry_expires() {
    let Some(kv) = connect().await else {
        eprintln!("Redis unavailable, skipping");
        return;
    };
    let k = format!("{}k", prefix());

    kv.set_with_expiry(&k, b"v", 60).await.unwrap();
    assert!(kv.exists(&k).await.unwrap());

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(!kv.exists(&k).await.unwrap());
}

#[tokio::test]
async fn test_set_nx_px_mutual_exclusion() {
    let Some(kv) = connect().await else {
        eprintln!("Redis unavailable, skipping");
        return;
    };
    let k = format!("{}lock", prefix());

    assert!(kv.set_nx_px(&k, b"holder-a", 10_000).await.unwrap());
    assert!(!kv.set_nx_px(&k, b"holder-b", 10_000).await.unwrap());

    // Wrong holder cannot release; right holder can.
    assert!(!kv.del_if_equals(&k, b"holder-b").await.unwrap());
    assert!(kv.del_if_equals(&k, b"holder-a").await.unwrap());
    assert!(kv.set_nx_px(&k, b"holder-b", 10_000).await.unwrap());

    kv.del(&k).await.unwrap();
}

#[tokio::test]
async fn test_hash_fields_roundtrip() {
    let Some(kv) = connect().await else {
        eprintln!("Redis unavailable, skipping");
        return;
    };
    let k = format!("{}settings", prefix());

    kv.hset_multi(
        &k,
        &[
            ("a".to_string(), b"1".to_vec()),
            ("b".to_string(), vec![0xc0, 0x00]),
        ],
    )
    .await
    .unwrap();

    assert!(kv.hexists(&k, "a").await.unwrap());
    assert_eq!(
        kv.hmget(&k, &["b", "missing", "a"]).await.unwrap(),
        vec![Some(vec![0xc0, 0x00]), None, Some(b"1".to_vec())]
    );
    assert_eq!(kv.hdel(&k, &["a", "missing"]).await.unwrap(), 1);

    kv.del(&k).await.unwrap();
}

#[tokio::test]
async fn test_hset_multi_incr_returns_version() {
    let Some(kv) = connect().await else {
        eprintln!("Redis unavailable, skipping");
        return;
    };
    let k = format!("{}settings", prefix());

    let v1 = kv
        .hset_multi_incr(&k, &[("data".to_string(), b"x".to_vec())], "version", 1)
        .await
        .unwrap();
    let v2 = kv
        .hset_multi_incr(&k, &[("data".to_string(), b"y".to_vec())], "version", 1)
        .await
        .unwrap();

    assert_eq!(v1, 1);
    assert_eq!(v2, 2);
    assert_eq!(kv.hget(&k, "data").await.unwrap(), Some(b"y".to_vec()));

    kv.del(&k).await.unwrap();
}

#[tokio::test]
async fn test_incr_is_monotonic() {
    let Some(kv) = connect().await else {
        eprintln!("Redis unavailable, skipping");
        return;
    };
    let k = format!("{}fence", prefix());

    let a = kv.incr(&k).await.unwrap();
    let b = kv.incr(&k).await.unwrap();
    assert!(b > a);

    kv.del(&k).await.unwrap();
}
