//! In-process [`Kv`] implementation
//!
//! A single-process stand-in for Redis used by unit and integration
//! tests. Honors per-key TTLs against the monotonic clock; expired keys
//! behave exactly like missing ones.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::Kv;
use crate::errors::{CertsError, CertsResult};

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self) -> bool {
        self.expires_at.is_none_or(|at| Instant::now() < at)
    }
}

#[derive(Debug, Default)]
struct State {
    flat: HashMap<String, Entry>,
    hashes: HashMap<String, HashMap<String, Vec<u8>>>,
}

impl State {
    fn prune(&mut self) {
        self.flat.retain(|_, entry| entry.live());
    }
}

/// HashMap-backed KV store with TTL bookkeeping
#[derive(Debug, Default)]
pub struct MemoryKv {
    state: Mutex<State>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live flat keys, for test assertions
    pub fn flat_len(&self) -> usize {
        let mut state = self.state.lock();
        state.prune();
        state.flat.len()
    }
}

fn parse_counter(raw: Option<&Vec<u8>>) -> CertsResult<i64> {
    match raw {
        None => Ok(0),
        Some(bytes) => std::str::from_utf8(bytes)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| CertsError::Kv("hash field is not an integer".to_string())),
    }
}

#[async_trait]
impl Kv for MemoryKv {
    async fn get(&self, key: &str) -> CertsResult<Option<Vec<u8>>> {
        let mut state = self.state.lock();
        state.prune();
        Ok(state.flat.get(key).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &[u8]) -> CertsResult<()> {
        self.state.lock().flat.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn set_with_expiry(&self, key: &str, value: &[u8], ttl_ms: u64) -> CertsResult<()> {
        self.state.lock().flat.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at: Some(Instant::now() + Duration::from_millis(ttl_ms)),
            },
        );
        Ok(())
    }

    async fn set_nx_px(&self, key: &str, value: &[u8], ttl_ms: u64) -> CertsResult<bool> {
        let mut state = self.state.lock();
        state.prune();
        if state.flat.contains_key(key) {
            return Ok(false);
        }
        state.flat.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at: Some(Instant::now() + Duration::from_millis(ttl_ms)),
            },
        );
        Ok(true)
    }

    async fn del(&self, key: &str) -> CertsResult<bool> {
        let mut state = self.state.lock();
        state.prune();
        Ok(state.flat.remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> CertsResult<bool> {
        let mut state = self.state.lock();
        state.prune();
        Ok(state.flat.contains_key(key))
    }

    async fn expire(&self, key: &str, ttl_ms: u64) -> CertsResult<bool> {
        let mut state = self.state.lock();
        state.prune();
        match state.flat.get_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + Duration::from_millis(ttl_ms));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn del_if_equals(&self, key: &str, expected: &[u8]) -> CertsResult<bool> {
        let mut state = self.state.lock();
        state.prune();
        let matches = state
            .flat
            .get(key)
            .is_some_and(|entry| entry.value == expected);
        if matches {
            state.flat.remove(key);
        }
        Ok(matches)
    }

    async fn incr(&self, key: &str) -> CertsResult<i64> {
        let mut state = self.state.lock();
        state.prune();
        let current = match state.flat.get(key) {
            Some(entry) => parse_counter(Some(&entry.value))?,
            None => 0,
        };
        let next = current + 1;
        state.flat.insert(
            key.to_string(),
            Entry {
                value: next.to_string().into_bytes(),
                expires_at: None,
            },
        );
        Ok(next)
    }

    async fn hget(&self, key: &str, field: &str) -> CertsResult<Option<Vec<u8>>> {
        let state = self.state.lock();
        Ok(state
            .hashes
            .get(key)
            .and_then(|h| h.get(field))
            .cloned())
    }

    async fn hmget(&self, key: &str, fields: &[&str]) -> CertsResult<Vec<Option<Vec<u8>>>> {
        let state = self.state.lock();
        let hash = state.hashes.get(key);
        Ok(fields
            .iter()
            .map(|field| hash.and_then(|h| h.get(*field)).cloned())
            .collect())
    }

    async fn hset_multi(&self, key: &str, fields: &[(String, Vec<u8>)]) -> CertsResult<()> {
        let mut state = self.state.lock();
        let hash = state.hashes.entry(key.to_string()).or_default();
        for (field, value) in fields {
            hash.insert(field.clone(), value.clone());
        }
        Ok(())
    }

    async fn hset_multi_incr(
        &self,
        key: &str,
        fields: &[(String, Vec<u8>)],
        incr_field: &str,
        delta: i64,
    ) -> CertsResult<i64> {
        let mut state = self.state.lock();
        let hash = state.hashes.entry(key.to_string()).or_default();
        for (field, value) in fields {
            hash.insert(field.clone(), value.clone());
        }
        let next = parse_counter(hash.get(incr_field))? + delta;
        hash.insert(incr_field.to_string(), next.to_string().into_bytes());
        Ok(next)
    }

    async fn hdel(&self, key: &str, fields: &[&str]) -> CertsResult<usize> {
        let mut state = self.state.lock();
        let Some(hash) = state.hashes.get_mut(key) else {
            return Ok(0);
        };
        let mut removed = 0;
        for field in fields {
            if hash.remove(*field).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn hexists(&self, key: &str, field: &str) -> CertsResult<bool> {
        let state = self.state.lock();
        Ok(state
            .hashes
            .get(key)
            .is_some_and(|h| h.contains_key(field)))
    }

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> CertsResult<i64> {
        let mut state = self.state.lock();
        let hash = state.hashes.entry(key.to_string()).or_default();
        let next = parse_counter(hash.get(field))? + delta;
        hash.insert(field.to_string(), next.to_string().into_bytes());
        Ok(next)
    }
}
