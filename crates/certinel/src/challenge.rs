//! HTTP-01 challenge store
//!
//! Challenge answers are kept server-side under short-lived flat keys so
//! the process that serves `/.well-known/acme-challenge/<token>` does not
//! have to be the process that ordered the certificate. Records expire via
//! store TTL; a lookup that finds an expired or hollow record deletes it
//! and reports absence, so stale answers never satisfy the CA.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::acme::{ChallengeQuery, ChallengeResponder, ChallengeSet};
use crate::codec;
use crate::domain::normalize;
use crate::errors::{CertsError, CertsResult};
use crate::kv::Kv;
use crate::settings::SettingsStore;
use crate::types::now_ms;

/// Default challenge record lifetime (2 hours)
pub const DEFAULT_CHALLENGE_TTL_MS: u64 = 2 * 60 * 60 * 1000;

/// Stored challenge record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChallengeRecord {
    pub acme: AcmeChallenge,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcmeChallenge {
    pub token: String,
    #[serde(default)]
    pub secret: Option<ChallengeSecret>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChallengeSecret {
    /// The key authorization served back to the CA
    pub value: String,
    pub created: i64,
    pub expires: i64,
}

/// Redis-backed challenge store
///
/// Implements the `set`/`get`/`remove` plugin contract the ACME backend
/// drives during authorization.
pub struct ChallengeStore {
    kv: Arc<dyn Kv>,
    settings: SettingsStore,
    namespace: String,
    ttl_ms: u64,
}

impl ChallengeStore {
    pub fn new(kv: Arc<dyn Kv>, settings: SettingsStore, namespace: &str, ttl_ms: u64) -> Self {
        Self {
            kv,
            settings,
            namespace: namespace.to_string(),
            ttl_ms,
        }
    }

    fn key(&self, domain: &str, token: &str) -> String {
        format!("{}challenge:{}:{}", self.namespace, domain, token)
    }

    /// Encode and write a record with its TTL in one atomic pipeline
    pub async fn put(&self, domain: &str, token: &str, record: &ChallengeRecord) -> CertsResult<()> {
        let bytes = codec::encode(record)?;
        self.kv
            .set_with_expiry(&self.key(domain, token), &bytes, self.ttl_ms)
            .await?;
        debug!(domain = %domain, token = %token, ttl_ms = self.ttl_ms, "Stored challenge record");
        Ok(())
    }

    /// Read a record; missing or empty keys are absent
    pub async fn fetch(&self, domain: &str, token: &str) -> CertsResult<Option<ChallengeRecord>> {
        let raw = self.kv.get(&self.key(domain, token)).await?;
        match raw {
            None => Ok(None),
            Some(bytes) if bytes.is_empty() => Ok(None),
            Some(bytes) => Ok(Some(codec::decode(&bytes)?)),
        }
    }

    /// Delete a record
    pub async fn remove_record(&self, domain: &str, token: &str) -> CertsResult<()> {
        self.kv.del(&self.key(domain, token)).await?;
        trace!(domain = %domain, token = %token, "Removed challenge record");
        Ok(())
    }

    /// Resolve the key authorization for a live challenge
    ///
    /// An expired or hollow record is deleted on sight and reported absent.
    pub async fn resolve(&self, domain: &str, token: &str) -> CertsResult<Option<String>> {
        let Some(record) = self.fetch(domain, token).await? else {
            return Ok(None);
        };

        match record.acme.secret {
            Some(secret) if secret.expires >= now_ms() => Ok(Some(secret.value)),
            _ => {
                debug!(domain = %domain, token = %token, "Dropping expired challenge record");
                self.remove_record(domain, token).await?;
                Ok(None)
            }
        }
    }
}

// The CA library hands identifiers back in their A-label form; records
// are keyed by the normalized Unicode form the rest of the store uses,
// so every plugin entry point normalizes first.
#[async_trait]
impl ChallengeResponder for ChallengeStore {
    async fn set(&self, challenge: ChallengeSet) -> CertsResult<()> {
        let domain = normalize(&challenge.domain)?;

        let data_field = format!("domain:{domain}:data");
        if !self.settings.has(&data_field).await? {
            return Err(CertsError::UnknownDomain { domain });
        }

        let created = now_ms();
        let record = ChallengeRecord {
            acme: AcmeChallenge {
                token: challenge.token.clone(),
                secret: Some(ChallengeSecret {
                    value: challenge.key_authorization,
                    created,
                    expires: created + self.ttl_ms as i64,
                }),
            },
        };

        self.put(&domain, &challenge.token, &record).await
    }

    async fn get(&self, query: ChallengeQuery) -> CertsResult<Option<String>> {
        let domain = normalize(&query.domain)?;
        self.resolve(&domain, &query.token).await
    }

    async fn remove(&self, query: ChallengeQuery) -> CertsResult<()> {
        let domain = normalize(&query.domain)?;
        self.remove_record(&domain, &query.token).await
    }
}

impl std::fmt::Debug for ChallengeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChallengeStore")
            .field("namespace", &self.namespace)
            .field("ttl_ms", &self.ttl_ms)
            .finish_non_exhaustive()
    }
}
