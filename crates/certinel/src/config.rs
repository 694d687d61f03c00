//! Coordinator configuration
//!
//! Built with a consuming builder so the required KV handle is the only
//! positional argument. Defaults mirror a development deployment: staging
//! directory, identity cipher, 10 s error backoff. Production tunes
//! `block_renew_after_error` into the hours.

use std::sync::Arc;
use std::time::Duration;

use crate::acme::{AcmeBackend, LETSENCRYPT_STAGING};
use crate::challenge::DEFAULT_CHALLENGE_TTL_MS;
use crate::cipher::{IdentityCipher, KeyCipher};
use crate::keys::{DEFAULT_KEY_BITS, DEFAULT_KEY_EXPONENT};
use crate::kv::Kv;
use crate::validate::CaaLookup;

/// Default namespace prefix component
pub const DEFAULT_NAMESPACE: &str = "certinel";

/// Renewal window: certificates are renewed once within 30 days (plus a
/// 10 s guard so a re-check under the lock cannot flap) of expiry
pub const RENEW_WINDOW: Duration = Duration::from_secs(30 * 24 * 3600 + 10);

/// CA-facing settings
#[derive(Debug, Clone)]
pub struct AcmeOptions {
    /// Environment label; keys the stored account (`account:<env>`)
    pub environment: String,
    /// ACME directory URL
    pub directory_url: String,
    /// Subscriber email for account registration
    pub email: String,
    /// Issuers our deployment expects CAA records to authorize; empty
    /// disables CAA checking
    pub caa_domains: Vec<String>,
}

impl Default for AcmeOptions {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            directory_url: LETSENCRYPT_STAGING.to_string(),
            email: String::new(),
            caa_domains: Vec::new(),
        }
    }
}

/// Options for [`Certs`](crate::Certs)
pub struct CertsOptions {
    pub(crate) kv: Arc<dyn Kv>,
    pub(crate) namespace: String,
    pub(crate) cipher: Arc<dyn KeyCipher>,
    pub(crate) key_bits: usize,
    pub(crate) key_exponent: u64,
    pub(crate) acme: AcmeOptions,
    pub(crate) renew_window: Duration,
    pub(crate) block_renew_after_error: Duration,
    pub(crate) challenge_ttl: Duration,
    pub(crate) lock_lease: Duration,
    pub(crate) lock_wait_budget: Duration,
    pub(crate) backend: Option<Arc<dyn AcmeBackend>>,
    pub(crate) caa_lookup: Option<Arc<dyn CaaLookup>>,
}

impl CertsOptions {
    /// Options over the given KV backend, everything else defaulted
    pub fn new(kv: Arc<dyn Kv>) -> Self {
        Self {
            kv,
            namespace: DEFAULT_NAMESPACE.to_string(),
            cipher: Arc::new(IdentityCipher),
            key_bits: DEFAULT_KEY_BITS,
            key_exponent: DEFAULT_KEY_EXPONENT,
            acme: AcmeOptions::default(),
            renew_window: RENEW_WINDOW,
            block_renew_after_error: Duration::from_secs(10),
            challenge_ttl: Duration::from_millis(DEFAULT_CHALLENGE_TTL_MS),
            lock_lease: Duration::from_secs(10 * 60),
            lock_wait_budget: Duration::from_secs(3 * 60),
            backend: None,
            caa_lookup: None,
        }
    }

    /// Installation-wide namespace; becomes the `<namespace>:certs:` prefix
    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = namespace.to_string();
        self
    }

    /// At-rest transform for private key material
    pub fn with_cipher(mut self, cipher: Arc<dyn KeyCipher>) -> Self {
        self.cipher = cipher;
        self
    }

    /// RSA parameters for per-domain certificate keys
    pub fn with_key_params(mut self, bits: usize, exponent: u64) -> Self {
        self.key_bits = bits;
        self.key_exponent = exponent;
        self
    }

    pub fn with_acme(mut self, acme: AcmeOptions) -> Self {
        self.acme = acme;
        self
    }

    /// Renewal window before expiry
    pub fn with_renew_window(mut self, window: Duration) -> Self {
        self.renew_window = window;
        self
    }

    /// How long the fail-safe lock suppresses renewal after an error
    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.block_renew_after_error = backoff;
        self
    }

    /// Lifetime of stored challenge answers
    pub fn with_challenge_ttl(mut self, ttl: Duration) -> Self {
        self.challenge_ttl = ttl;
        self
    }

    /// Issuance lock lease and acquisition wait budget
    pub fn with_lock_timing(mut self, lease: Duration, wait_budget: Duration) -> Self {
        self.lock_lease = lease;
        self.lock_wait_budget = wait_budget;
        self
    }

    /// Replace the CA backend (tests, alternative ACME clients)
    pub fn with_backend(mut self, backend: Arc<dyn AcmeBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Replace the CAA record source
    pub fn with_caa_lookup(mut self, lookup: Arc<dyn CaaLookup>) -> Self {
        self.caa_lookup = Some(lookup);
        self
    }

    /// The full key prefix, `<namespace>:certs:`
    pub(crate) fn prefix(&self) -> String {
        format!("{}:certs:", self.namespace)
    }
}
