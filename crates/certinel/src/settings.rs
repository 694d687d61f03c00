//! Typed settings facade over the shared settings hash
//!
//! All coordinator state except challenges and locks lives in one Redis
//! hash (`<ns>settings`) whose field values are MessagePack. A multi-field
//! `put_fields` is a single HSET, so readers never observe a torn write
//! from one call. A field that fails to decode is reported absent rather
//! than failing the whole read; transport errors propagate.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::codec;
use crate::errors::CertsResult;
use crate::kv::Kv;

/// Name of the settings hash under the namespace prefix
const SETTINGS_HASH: &str = "settings";

/// Typed binary key/value store over a single hash
#[derive(Clone)]
pub struct SettingsStore {
    kv: Arc<dyn Kv>,
    hash_key: String,
}

impl SettingsStore {
    /// Create a settings store under the given namespace prefix
    pub fn new(kv: Arc<dyn Kv>, namespace: &str) -> Self {
        Self {
            kv,
            hash_key: format!("{namespace}{SETTINGS_HASH}"),
        }
    }

    /// Encode and write one field
    pub async fn put<T: Serialize>(&self, field: &str, value: &T) -> CertsResult<()> {
        self.put_fields(vec![(field.to_string(), codec::encode(value)?)])
            .await
    }

    /// Write pre-encoded fields in one atomic HSET
    pub async fn put_fields(&self, fields: Vec<(String, Vec<u8>)>) -> CertsResult<()> {
        self.kv.hset_multi(&self.hash_key, &fields).await
    }

    /// Write pre-encoded fields and bump a counter field in one atomic
    /// pipeline; returns the post-increment counter value
    pub async fn put_fields_and_incr(
        &self,
        fields: Vec<(String, Vec<u8>)>,
        counter_field: &str,
        delta: i64,
    ) -> CertsResult<i64> {
        self.kv
            .hset_multi_incr(&self.hash_key, &fields, counter_field, delta)
            .await
    }

    /// Read and decode one field; decode failures count as absent
    pub async fn get<T: DeserializeOwned>(&self, field: &str) -> CertsResult<Option<T>> {
        let raw = self.kv.hget(&self.hash_key, field).await?;
        Ok(raw.and_then(|bytes| self.decode_field(field, &bytes)))
    }

    /// Multi-field raw read preserving request order
    pub async fn get_raw_many(&self, fields: &[&str]) -> CertsResult<Vec<Option<Vec<u8>>>> {
        self.kv.hmget(&self.hash_key, fields).await
    }

    /// Decode one previously-read field, mapping decode failure to absent
    pub fn decode_field<T: DeserializeOwned>(&self, field: &str, bytes: &[u8]) -> Option<T> {
        match codec::decode(bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(field = %field, error = %e, "Undecodable settings field, treating as absent");
                None
            }
        }
    }

    pub async fn has(&self, field: &str) -> CertsResult<bool> {
        self.kv.hexists(&self.hash_key, field).await
    }

    /// Remove fields; returns the number actually removed
    pub async fn delete(&self, fields: &[&str]) -> CertsResult<usize> {
        self.kv.hdel(&self.hash_key, fields).await
    }

    /// Current integer value of a counter field (0 when unset)
    pub async fn counter(&self, field: &str) -> CertsResult<i64> {
        let raw = self.kv.hget(&self.hash_key, field).await?;
        Ok(raw
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .and_then(|s| s.parse().ok())
            .unwrap_or(0))
    }
}

impl std::fmt::Debug for SettingsStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingsStore")
            .field("hash_key", &self.hash_key)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use serde::Deserialize;
    use std::collections::BTreeMap;

    fn store() -> SettingsStore {
        SettingsStore::new(Arc::new(MemoryKv::new()), "test:certs:")
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        name: String,
        #[serde(with = "serde_bytes")]
        blob: Vec<u8>,
        when: i64,
        nested: BTreeMap<String, Vec<i64>>,
        missing: Option<bool>,
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let settings = store();

        let mut nested = BTreeMap::new();
        nested.insert("k".to_string(), vec![1, 2, 3]);
        let sample = Sample {
            name: "value".to_string(),
            blob: vec![1, 0, 255],
            when: 1_700_000_000_000,
            nested,
            missing: None,
        };

        settings.put("field", &sample).await.unwrap();
        let back: Sample = settings.get("field").await.unwrap().unwrap();
        assert_eq!(back, sample);
    }

    #[tokio::test]
    async fn test_get_absent_field() {
        let settings = store();
        assert!(settings.get::<Sample>("nope").await.unwrap().is_none());
        assert!(!settings.has("nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_undecodable_field_is_absent() {
        let settings = store();
        settings
            .put_fields(vec![("broken".to_string(), vec![0xc1])])
            .await
            .unwrap();

        assert!(settings.has("broken").await.unwrap());
        assert!(settings.get::<Sample>("broken").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_multi_field_write_and_ordered_read() {
        let settings = store();
        settings
            .put_fields(vec![
                ("a".to_string(), codec::encode(&1i64).unwrap()),
                ("b".to_string(), codec::encode(&2i64).unwrap()),
            ])
            .await
            .unwrap();

        let raw = settings.get_raw_many(&["b", "zz", "a"]).await.unwrap();
        assert!(raw[0].is_some());
        assert!(raw[1].is_none());
        assert!(raw[2].is_some());

        let b: i64 = settings.decode_field("b", raw[0].as_ref().unwrap()).unwrap();
        assert_eq!(b, 2);
    }

    #[tokio::test]
    async fn test_delete_counts_removed() {
        let settings = store();
        settings.put("x", &1i64).await.unwrap();
        settings.put("y", &2i64).await.unwrap();
        assert_eq!(settings.delete(&["x", "y", "z"]).await.unwrap(), 2);
        assert!(!settings.has("x").await.unwrap());
    }

    #[tokio::test]
    async fn test_counter_and_incr() {
        let settings = store();
        assert_eq!(settings.counter("v").await.unwrap(), 0);

        let n = settings
            .put_fields_and_incr(vec![("d".to_string(), b"x".to_vec())], "v", 1)
            .await
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(settings.counter("v").await.unwrap(), 1);
    }
}
