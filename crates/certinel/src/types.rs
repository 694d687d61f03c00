//! Persisted record types
//!
//! Wire field names are camelCase: the settings hash is shared with other
//! tooling that reads the raw MessagePack maps. Timestamps are UTC
//! milliseconds since the epoch.

use serde::{Deserialize, Serialize};

/// Certificate state for a domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertStatus {
    /// Record exists but no certificate has been issued yet
    Pending,
    /// A certificate has been issued
    Valid,
}

/// Stored certificate data (`domain:<D>:data` settings field)
///
/// Keys and certificate material are stored in sibling fields; a record in
/// `pending` state legitimately has no `cert`. Readers must tolerate
/// partial records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertData {
    pub domain: String,
    pub status: CertStatus,
    #[serde(default)]
    pub cert: Option<String>,
    /// Ordered PEM intermediates, leaf excluded
    #[serde(default)]
    pub ca: Vec<String>,
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub fingerprint: Option<String>,
    #[serde(default)]
    pub alt_names: Vec<String>,
    #[serde(default)]
    pub valid_from: Option<i64>,
    #[serde(default)]
    pub valid_to: Option<i64>,
}

impl CertData {
    /// Minimal record written when issuance starts for a fresh domain
    pub fn pending(domain: &str) -> Self {
        Self {
            domain: domain.to_string(),
            status: CertStatus::Pending,
            cert: None,
            ca: Vec::new(),
            serial_number: None,
            fingerprint: None,
            alt_names: Vec::new(),
            valid_from: None,
            valid_to: None,
        }
    }
}

/// Last issuance failure (`domain:<D>:lastError` settings field)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastError {
    pub err: String,
    pub code: String,
    pub time: i64,
}

/// Stored ACME account (`account:<env>` settings field)
///
/// `private_key` is the CA credential blob, opaque and encrypted at rest
/// via the injected transform. `account` is whatever account record the CA
/// returned (kid, status, contact).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRecord {
    #[serde(with = "serde_bytes")]
    pub private_key: Vec<u8>,
    pub account: serde_json::Value,
}

/// Fully-merged per-domain view returned to callers
#[derive(Debug, Clone, PartialEq)]
pub struct CertRecord {
    pub domain: String,
    pub status: CertStatus,
    pub cert: Option<String>,
    pub ca: Vec<String>,
    /// Decrypted PEM; only populated for callers, never stored plaintext
    pub private_key: Option<String>,
    pub serial_number: Option<String>,
    pub fingerprint: Option<String>,
    pub alt_names: Vec<String>,
    pub valid_from: Option<i64>,
    pub valid_to: Option<i64>,
    pub last_check: Option<i64>,
    pub last_error: Option<LastError>,
    pub cert_version: i64,
}

impl CertRecord {
    /// Whether this record holds a certificate usable at `now_ms`
    ///
    /// `valid_to == now` counts as expired.
    pub fn is_valid_at(&self, now_ms: i64) -> bool {
        self.status == CertStatus::Valid
            && self.cert.is_some()
            && self.valid_to.is_some_and(|valid_to| valid_to > now_ms)
    }
}

/// Current UTC time in epoch milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
