//! Certificate lifecycle coordinator
//!
//! Owns the per-domain state machine (absent → pending → valid →
//! renewing → error-backoff) and serializes issuance across processes
//! with the op lock. `get_certificate` is the hot path: a valid stored
//! record returns without locking; everything else funnels into
//! `acquire_cert`, which re-checks freshness under the lock so competing
//! processes cannot double-order.
//!
//! Failure discipline: any issuance error arms the fail-safe lock (short
//! TTL) and is recorded on the domain's `lastError`; callers holding a
//! previous certificate keep serving it.

use std::collections::HashMap;
use std::sync::Arc;

use serde_bytes::ByteBuf;
use tracing::{debug, error, info, warn};

use crate::account::{AccountManager, AcmeAccount};
use crate::acme::{AcmeBackend, InstantAcmeBackend, OrderRequest};
use crate::cert;
use crate::challenge::ChallengeStore;
use crate::cipher::KeyCipher;
use crate::codec;
use crate::config::CertsOptions;
use crate::domain::{self, normalize};
use crate::errors::{CertsError, CertsResult};
use crate::keys;
use crate::kv::Kv;
use crate::lock::LockService;
use crate::settings::SettingsStore;
use crate::types::{now_ms, CertData, CertRecord, CertStatus, LastError};
use crate::validate::{CaaLookup, DnsCaaLookup, DomainValidator};

/// Maximum accepted challenge token length
const MAX_TOKEN_LEN: usize = 256;

/// The certificate lifecycle coordinator
pub struct Certs {
    kv: Arc<dyn Kv>,
    settings: SettingsStore,
    challenges: Arc<ChallengeStore>,
    locks: LockService,
    accounts: AccountManager,
    backend: Arc<dyn AcmeBackend>,
    validator: DomainValidator,
    cipher: Arc<dyn KeyCipher>,
    prefix: String,
    key_bits: usize,
    key_exponent: u64,
    renew_window_ms: i64,
    block_renew_after_error_ms: u64,
    lock_lease: std::time::Duration,
    lock_wait_budget: std::time::Duration,
}

impl Certs {
    /// Build a coordinator from options
    pub fn new(options: CertsOptions) -> Self {
        let prefix = options.prefix();
        let kv = options.kv;

        let settings = SettingsStore::new(kv.clone(), &prefix);
        let challenges = Arc::new(ChallengeStore::new(
            kv.clone(),
            settings.clone(),
            &prefix,
            options.challenge_ttl.as_millis() as u64,
        ));
        let locks = LockService::new(kv.clone(), &prefix);

        let backend: Arc<dyn AcmeBackend> = options
            .backend
            .unwrap_or_else(|| Arc::new(InstantAcmeBackend::new()));

        let accounts = AccountManager::new(
            settings.clone(),
            backend.clone(),
            options.cipher.clone(),
            &options.acme.environment,
            &options.acme.email,
            &options.acme.directory_url,
        );

        let caa_lookup: Option<Arc<dyn CaaLookup>> = options.caa_lookup.or_else(|| {
            match DnsCaaLookup::new() {
                Ok(lookup) => Some(Arc::new(lookup) as Arc<dyn CaaLookup>),
                Err(e) => {
                    warn!(error = %e, "No CAA resolver available, CAA checking disabled");
                    None
                }
            }
        });
        let validator = DomainValidator::new(caa_lookup, options.acme.caa_domains.clone());

        Self {
            kv,
            settings,
            challenges,
            locks,
            accounts,
            backend,
            validator,
            cipher: options.cipher,
            prefix,
            key_bits: options.key_bits,
            key_exponent: options.key_exponent,
            renew_window_ms: options.renew_window.as_millis() as i64,
            block_renew_after_error_ms: options.block_renew_after_error.as_millis() as u64,
            lock_lease: options.lock_lease,
            lock_wait_budget: options.lock_wait_budget,
        }
    }

    /// The settings store backing this coordinator
    ///
    /// Domain membership (`domain:<D>:data`) is written here by admin
    /// tooling; the coordinator only requires the field to exist.
    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    /// The challenge store, for hosting servers that serve challenge
    /// responses through their own plumbing
    pub fn challenge_store(&self) -> Arc<ChallengeStore> {
        Arc::clone(&self.challenges)
    }

    fn data_field(domain: &str) -> String {
        format!("domain:{domain}:data")
    }

    fn last_check_field(domain: &str) -> String {
        format!("domain:{domain}:lastCheck")
    }

    fn private_key_field(domain: &str) -> String {
        format!("domain:{domain}:privateKey")
    }

    fn last_error_field(domain: &str) -> String {
        format!("domain:{domain}:lastError")
    }

    fn cert_version_field(domain: &str) -> String {
        format!("domain:{domain}:certVersion")
    }

    fn op_lock_key(&self, domain: &str) -> String {
        format!("{}lock:op:{}", self.prefix, domain)
    }

    fn safe_lock_key(&self, domain: &str) -> String {
        format!("{}lock:safe:{}", self.prefix, domain)
    }

    // =========================================================================
    // Public entry points
    // =========================================================================

    /// Return a currently-valid certificate for `domain`, provisioning or
    /// renewing as needed
    pub async fn get_certificate(&self, domain: &str) -> CertsResult<Option<CertRecord>> {
        let domain = normalize(domain)?;

        if let Some(record) = self.load_record(&domain).await? {
            if record.is_valid_at(now_ms()) {
                debug!(domain = %domain, valid_to = ?record.valid_to, "Serving stored certificate");
                return Ok(Some(record));
            }
        }

        self.acquire_cert_normalized(&domain).await
    }

    /// Run the renewal procedure for `domain`
    pub async fn acquire_cert(&self, domain: &str) -> CertsResult<Option<CertRecord>> {
        let domain = normalize(domain)?;
        self.acquire_cert_normalized(&domain).await
    }

    /// Resolve the key authorization body for a challenge request
    pub async fn route_handler(&self, host: &str, token: &str) -> CertsResult<String> {
        let mut details = HashMap::new();

        let host = host.trim();
        let normalized = if host.is_empty() {
            details.insert("host".to_string(), "missing host".to_string());
            String::new()
        } else {
            match normalize(host).and_then(|h| {
                DomainValidator::validate_syntax(&h)?;
                Ok(h)
            }) {
                Ok(normalized) => normalized,
                Err(e) => {
                    details.insert("host".to_string(), e.to_string());
                    String::new()
                }
            }
        };
        if token.is_empty() {
            details.insert("token".to_string(), "must not be empty".to_string());
        } else if token.len() > MAX_TOKEN_LEN {
            details.insert(
                "token".to_string(),
                format!("longer than {MAX_TOKEN_LEN} characters"),
            );
        }
        if !details.is_empty() {
            return Err(CertsError::InputValidation { details });
        }

        match self.challenges.resolve(&normalized, token).await {
            Ok(Some(key_authorization)) => Ok(key_authorization),
            Ok(None) => Err(CertsError::ChallengeNotFound { domain: normalized }),
            Err(e) => Err(CertsError::ChallengeFail {
                code: e.code().to_string(),
                message: e.to_string(),
            }),
        }
    }

    /// The environment's ACME account, provisioning it on first use
    pub async fn get_acme_account(&self) -> CertsResult<AcmeAccount> {
        self.accounts.get_account().await
    }

    // =========================================================================
    // Renewal procedure
    // =========================================================================

    async fn acquire_cert_normalized(&self, domain: &str) -> CertsResult<Option<CertRecord>> {
        let existing = self.load_record(domain).await?;

        // Recent failure: do nothing, not even validation, until the
        // fail-safe lock expires.
        if self.kv.exists(&self.safe_lock_key(domain)).await? {
            info!(domain = %domain, "Renewal suppressed by fail-safe lock");
            return Ok(existing);
        }

        if let Err(e) = self.validator.validate(domain).await {
            warn!(domain = %domain, code = e.code(), error = %e, "Domain validation failed");
            self.record_failure(domain, &e).await;
            return Ok(existing);
        }

        let Some(lock) = self
            .locks
            .acquire(&self.op_lock_key(domain), self.lock_lease, self.lock_wait_budget)
            .await?
        else {
            debug!(domain = %domain, "Issuance lock not acquired within wait budget");
            return Ok(existing);
        };

        let outcome = self.issue_under_lock(domain).await;

        // The lease is released on every exit path; a failed release only
        // delays the next issuance by the lease TTL.
        if let Err(e) = self.locks.release(lock).await {
            warn!(domain = %domain, error = %e, "Failed to release issuance lock");
        }

        match outcome {
            Ok(record) => Ok(record),
            Err(e) => {
                self.record_failure(domain, &e).await;

                if matches!(e, CertsError::AccountUnavailable(_)) {
                    return Ok(None);
                }
                match existing {
                    Some(record) if record.cert.is_some() => {
                        warn!(
                            domain = %domain,
                            code = e.code(),
                            error = %e,
                            "Issuance failed, serving previous certificate"
                        );
                        Ok(Some(record))
                    }
                    _ => Err(e),
                }
            }
        }
    }

    /// Steps performed while holding the op lock
    async fn issue_under_lock(&self, domain: &str) -> CertsResult<Option<CertRecord>> {
        let now = now_ms();

        // Another holder may have renewed while we waited on the lock.
        if let Some(record) = self.load_record(domain).await? {
            if record.cert.is_some()
                && record
                    .valid_to
                    .is_some_and(|valid_to| valid_to > now + self.renew_window_ms)
            {
                debug!(domain = %domain, "Certificate already fresh, skipping issuance");
                return Ok(Some(record));
            }
        }

        let key_pem = self.ensure_domain_key(domain).await?;

        // Store keys use the Unicode form; the CSR SAN and the ACME
        // identifier must carry the A-label form.
        let order_domain = domain::to_ascii(domain)?;
        let csr_der = keys::create_csr(&order_domain, &key_pem)?;

        let account = self.accounts.get_account().await.map_err(|e| match e {
            CertsError::AccountUnavailable(_) => e,
            other => CertsError::AccountUnavailable(other.to_string()),
        })?;

        let domains = vec![order_domain];
        let chain = self
            .backend
            .order_certificate(
                OrderRequest {
                    credentials: &account.credentials,
                    csr_der: &csr_der,
                    domains: &domains,
                },
                self.challenges.as_ref(),
            )
            .await?;

        let Some(chain) = chain else {
            warn!(domain = %domain, "CA returned no certificate, keeping existing record");
            return self.load_record(domain).await;
        };

        let info = cert::parse_chain(&chain)?;
        let version = self.persist_issued(domain, &info).await?;

        info!(
            domain = %domain,
            cert_version = version,
            valid_to = info.valid_to,
            "Certificate issued and stored"
        );

        self.load_record(domain).await
    }

    /// Load or create the domain's RSA key, returning the plaintext PEM
    async fn ensure_domain_key(&self, domain: &str) -> CertsResult<String> {
        let field = Self::private_key_field(domain);
        if let Some(encrypted) = self.settings.get::<ByteBuf>(&field).await? {
            let plaintext = self.cipher.decrypt(encrypted.into_vec()).await?;
            return String::from_utf8(plaintext)
                .map_err(|e| CertsError::Cipher(format!("decrypted key is not UTF-8: {e}")));
        }

        info!(domain = %domain, bits = self.key_bits, "Generating certificate key");
        let key_pem = keys::generate_rsa_key(self.key_bits, self.key_exponent).await?;
        let encrypted = self.cipher.encrypt(key_pem.clone().into_bytes()).await?;

        // Keep whatever the membership tooling wrote, flip it to pending,
        // and clear any stale error, in one write.
        let data = match self.settings.get::<CertData>(&Self::data_field(domain)).await? {
            Some(mut data) => {
                data.status = CertStatus::Pending;
                data
            }
            None => CertData::pending(domain),
        };

        self.settings
            .put_fields(vec![
                (Self::data_field(domain), codec::encode(&data)?),
                (field, codec::encode(&ByteBuf::from(encrypted))?),
                (
                    Self::last_error_field(domain),
                    codec::encode(&Option::<LastError>::None)?,
                ),
            ])
            .await?;

        Ok(key_pem)
    }

    /// Persist the issued chain and bump the version counter atomically
    async fn persist_issued(&self, domain: &str, info: &cert::CertInfo) -> CertsResult<i64> {
        let data = CertData {
            domain: domain.to_string(),
            status: CertStatus::Valid,
            cert: Some(info.leaf_pem.clone()),
            ca: info.chain.clone(),
            serial_number: Some(info.serial_number.clone()),
            fingerprint: Some(info.fingerprint.clone()),
            alt_names: info.alt_names.clone(),
            valid_from: Some(info.valid_from),
            valid_to: Some(info.valid_to),
        };

        self.settings
            .put_fields_and_incr(
                vec![
                    (Self::data_field(domain), codec::encode(&data)?),
                    (Self::last_check_field(domain), codec::encode(&now_ms())?),
                    (
                        Self::last_error_field(domain),
                        codec::encode(&Option::<LastError>::None)?,
                    ),
                ],
                &Self::cert_version_field(domain),
                1,
            )
            .await
    }

    /// Arm the fail-safe lock and record the failure on the domain
    async fn record_failure(&self, domain: &str, err: &CertsError) {
        error!(domain = %domain, code = err.code(), error = %err, "Certificate operation failed");

        if let Err(e) = self
            .kv
            .set_with_expiry(&self.safe_lock_key(domain), b"1", self.block_renew_after_error_ms)
            .await
        {
            warn!(domain = %domain, error = %e, "Failed to arm fail-safe lock");
        }

        let last_error = LastError {
            err: err.to_string(),
            code: err.code().to_string(),
            time: now_ms(),
        };
        match self.settings.has(&Self::data_field(domain)).await {
            Ok(true) => {
                if let Err(e) = self
                    .settings
                    .put(&Self::last_error_field(domain), &last_error)
                    .await
                {
                    warn!(domain = %domain, error = %e, "Failed to record lastError");
                }
            }
            Ok(false) => {}
            Err(e) => {
                warn!(domain = %domain, error = %e, "Failed to read domain record for lastError");
            }
        }
    }

    // =========================================================================
    // Record assembly
    // =========================================================================

    /// Merge the per-domain settings fields into a [`CertRecord`]
    async fn load_record(&self, domain: &str) -> CertsResult<Option<CertRecord>> {
        let data_field = Self::data_field(domain);
        let last_check_field = Self::last_check_field(domain);
        let private_key_field = Self::private_key_field(domain);
        let last_error_field = Self::last_error_field(domain);
        let cert_version_field = Self::cert_version_field(domain);

        let raw = self
            .settings
            .get_raw_many(&[
                &data_field,
                &last_check_field,
                &private_key_field,
                &last_error_field,
                &cert_version_field,
            ])
            .await?;

        let Some(data) = raw[0]
            .as_ref()
            .and_then(|bytes| self.settings.decode_field::<CertData>(&data_field, bytes))
        else {
            return Ok(None);
        };

        let last_check = raw[1]
            .as_ref()
            .and_then(|bytes| self.settings.decode_field::<i64>(&last_check_field, bytes));

        let private_key = match raw[2].as_ref().and_then(|bytes| {
            self.settings
                .decode_field::<ByteBuf>(&private_key_field, bytes)
        }) {
            Some(encrypted) => {
                let plaintext = self.cipher.decrypt(encrypted.into_vec()).await?;
                Some(String::from_utf8(plaintext).map_err(|e| {
                    CertsError::Cipher(format!("decrypted key is not UTF-8: {e}"))
                })?)
            }
            None => None,
        };

        let last_error = raw[3]
            .as_ref()
            .and_then(|bytes| {
                self.settings
                    .decode_field::<Option<LastError>>(&last_error_field, bytes)
            })
            .flatten();

        let cert_version = raw[4]
            .as_ref()
            .and_then(|bytes| std::str::from_utf8(bytes).ok())
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);

        Ok(Some(CertRecord {
            domain: data.domain,
            status: data.status,
            cert: data.cert,
            ca: data.ca,
            private_key,
            serial_number: data.serial_number,
            fingerprint: data.fingerprint,
            alt_names: data.alt_names,
            valid_from: data.valid_from,
            valid_to: data.valid_to,
            last_check,
            last_error,
            cert_version,
        }))
    }
}

impl std::fmt::Debug for Certs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Certs")
            .field("prefix", &self.prefix)
            .field("key_bits", &self.key_bits)
            .field("renew_window_ms", &self.renew_window_ms)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use crate::validate::CaaRecord;
    use async_trait::async_trait;

    struct NoCaa;

    #[async_trait]
    impl CaaLookup for NoCaa {
        async fn lookup_caa(&self, _name: &str) -> CertsResult<Vec<CaaRecord>> {
            Ok(Vec::new())
        }
    }

    fn certs() -> Certs {
        let kv = Arc::new(MemoryKv::new());
        Certs::new(CertsOptions::new(kv).with_caa_lookup(Arc::new(NoCaa)))
    }

    #[tokio::test]
    async fn test_route_handler_rejects_bad_arguments() {
        let certs = certs();

        let err = certs.route_handler("", "TKN").await.unwrap_err();
        let CertsError::InputValidation { details } = &err else {
            panic!("expected InputValidation, got {err:?}");
        };
        assert!(details.contains_key("host"));
        assert_eq!(err.http_status(), 400);

        let err = certs.route_handler("example.com", "").await.unwrap_err();
        let CertsError::InputValidation { details } = &err else {
            panic!("expected InputValidation, got {err:?}");
        };
        assert!(details.contains_key("token"));
    }

    #[tokio::test]
    async fn test_route_handler_token_length_boundary() {
        let certs = certs();

        // 256 characters is accepted (lookup then misses), 257 is rejected.
        let ok_token = "a".repeat(256);
        let err = certs.route_handler("example.com", &ok_token).await.unwrap_err();
        assert_eq!(err.code(), "challenge_not_found");

        let long_token = "a".repeat(257);
        let err = certs.route_handler("example.com", &long_token).await.unwrap_err();
        assert_eq!(err.code(), "invalid_input");
    }

    #[tokio::test]
    async fn test_route_handler_normalizes_host() {
        let certs = certs();
        // Uppercase host keys the same record as its normalized form.
        let err = certs.route_handler("EXAMPLE.com", "TKN").await.unwrap_err();
        let CertsError::ChallengeNotFound { domain } = err else {
            panic!("expected ChallengeNotFound");
        };
        assert_eq!(domain, "example.com");
    }

    #[tokio::test]
    async fn test_load_record_absent_domain() {
        let certs = certs();
        assert!(certs.load_record("example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_record_tolerates_partial_record() {
        let certs = certs();
        certs
            .settings()
            .put("domain:example.com:data", &CertData::pending("example.com"))
            .await
            .unwrap();

        let record = certs.load_record("example.com").await.unwrap().unwrap();
        assert_eq!(record.status, CertStatus::Pending);
        assert!(record.cert.is_none());
        assert!(record.private_key.is_none());
        assert_eq!(record.cert_version, 0);
    }
}
