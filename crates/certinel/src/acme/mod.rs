//! ACME backend contract
//!
//! The coordinator does not speak ACME itself: JWS signing, nonces,
//! directory traversal, and order polling all belong to the backend behind
//! [`AcmeBackend`]. The shipped implementation wraps `instant-acme`
//! ([`InstantAcmeBackend`]); tests drive the coordinator with scripted
//! backends instead.
//!
//! During authorization the backend calls back into the coordinator's
//! challenge store through [`ChallengeResponder`] so the answer is visible
//! to whichever process the CA happens to hit.

mod instant;

pub use instant::InstantAcmeBackend;

use async_trait::async_trait;

use crate::errors::CertsResult;

/// Let's Encrypt production directory URL
pub const LETSENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";
/// Let's Encrypt staging directory URL
pub const LETSENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

/// Challenge registration pushed to the responder before validation
#[derive(Debug, Clone)]
pub struct ChallengeSet {
    pub domain: String,
    pub token: String,
    pub key_authorization: String,
}

/// Challenge lookup/removal key
#[derive(Debug, Clone)]
pub struct ChallengeQuery {
    pub domain: String,
    pub token: String,
}

/// HTTP-01 challenge plugin contract consumed by the backend
#[async_trait]
pub trait ChallengeResponder: Send + Sync {
    async fn set(&self, challenge: ChallengeSet) -> CertsResult<()>;

    async fn get(&self, query: ChallengeQuery) -> CertsResult<Option<String>>;

    async fn remove(&self, query: ChallengeQuery) -> CertsResult<()>;
}

/// Account creation request
#[derive(Debug, Clone)]
pub struct NewAccountRequest {
    pub email: String,
    pub directory_url: String,
}

/// Result of account creation
///
/// `credentials` is the CA client's opaque serialized key material; the
/// account manager encrypts it at rest. `account` is the CA's account
/// record (kid, status, contact) as returned.
pub struct NewAccountOutcome {
    pub credentials: Vec<u8>,
    pub account: serde_json::Value,
}

/// Certificate order request
///
/// `domains` carry the A-label (ASCII) form; RFC 8555 identifiers do not
/// accept Unicode labels.
pub struct OrderRequest<'a> {
    pub credentials: &'a [u8],
    pub csr_der: &'a [u8],
    pub domains: &'a [String],
}

/// CA-side ACME operations
#[async_trait]
pub trait AcmeBackend: Send + Sync {
    /// Provision a new account with the CA
    async fn create_account(&self, request: NewAccountRequest) -> CertsResult<NewAccountOutcome>;

    /// Run a full order: authorize via HTTP-01 (through `responder`),
    /// finalize with the caller's CSR, and return the PEM chain.
    ///
    /// `Ok(None)` means the CA returned no certificate; the caller keeps
    /// whatever record it already has.
    async fn order_certificate(
        &self,
        request: OrderRequest<'_>,
        responder: &dyn ChallengeResponder,
    ) -> CertsResult<Option<String>>;
}
