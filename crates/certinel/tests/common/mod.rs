//! Shared test harness: scripted ACME backend, CAA fakes, record seeding

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use certinel::acme::{
    AcmeBackend, ChallengeQuery, ChallengeResponder, ChallengeSet, NewAccountOutcome,
    NewAccountRequest, OrderRequest,
};
use certinel::errors::{CertsError, CertsResult};
use certinel::kv::MemoryKv;
use certinel::types::{now_ms, CertData, CertStatus};
use certinel::validate::{CaaLookup, CaaRecord};
use certinel::{AcmeOptions, Certs, CertsOptions};

pub const NS: &str = "test";
pub const PREFIX: &str = "test:certs:";

/// What the scripted backend should do with the next order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderBehavior {
    /// Issue a self-signed certificate for the requested domain
    Issue,
    /// Fail the order with an ACME error
    Fail,
    /// Return no certificate
    Empty,
}

/// Scripted [`AcmeBackend`] driving the challenge responder like a CA
pub struct MockAcme {
    pub behavior: Mutex<OrderBehavior>,
    pub orders: AtomicU32,
    pub accounts_created: AtomicU32,
    /// Key authorization observed via `responder.get` during the last
    /// order, i.e. what the CA's validation fetch would have seen
    pub observed_auth: Mutex<Option<String>>,
    /// Identifier list of the last order, as submitted to the CA
    pub last_order_domains: Mutex<Vec<String>>,
}

impl MockAcme {
    pub fn new() -> Self {
        Self {
            behavior: Mutex::new(OrderBehavior::Issue),
            orders: AtomicU32::new(0),
            accounts_created: AtomicU32::new(0),
            observed_auth: Mutex::new(None),
            last_order_domains: Mutex::new(Vec::new()),
        }
    }

    pub fn set_behavior(&self, behavior: OrderBehavior) {
        *self.behavior.lock() = behavior;
    }

    pub fn order_count(&self) -> u32 {
        self.orders.load(Ordering::SeqCst)
    }
}

/// Self-signed PEM for a domain (rcgen default validity, far future)
pub fn self_signed_pem(domain: &str) -> String {
    let key = rcgen::KeyPair::generate().unwrap();
    let params = rcgen::CertificateParams::new(vec![domain.to_string()]).unwrap();
    params.self_signed(&key).unwrap().pem()
}

#[async_trait]
impl AcmeBackend for MockAcme {
    async fn create_account(&self, _request: NewAccountRequest) -> CertsResult<NewAccountOutcome> {
        self.accounts_created.fetch_add(1, Ordering::SeqCst);
        Ok(NewAccountOutcome {
            credentials: br#"{"id":"https://acme.invalid/acct/1"}"#.to_vec(),
            account: serde_json::json!({
                "key": { "kid": "https://acme.invalid/acct/1" },
                "status": "valid",
            }),
        })
    }

    async fn order_certificate(
        &self,
        request: OrderRequest<'_>,
        responder: &dyn ChallengeResponder,
    ) -> CertsResult<Option<String>> {
        self.orders.fetch_add(1, Ordering::SeqCst);
        *self.last_order_domains.lock() = request.domains.to_vec();

        match *self.behavior.lock() {
            OrderBehavior::Fail => {
                return Err(CertsError::Acme("order rejected by CA".to_string()))
            }
            OrderBehavior::Empty => return Ok(None),
            OrderBehavior::Issue => {}
        }

        let domain = request.domains[0].clone();
        let token = "mock-token".to_string();

        // Same sequence a real CA drives: register, validate, settle.
        responder
            .set(ChallengeSet {
                domain: domain.clone(),
                token: token.clone(),
                key_authorization: format!("{token}.thumbprint"),
            })
            .await?;

        let seen = responder
            .get(ChallengeQuery {
                domain: domain.clone(),
                token: token.clone(),
            })
            .await?;
        *self.observed_auth.lock() = seen;

        responder
            .remove(ChallengeQuery {
                domain: domain.clone(),
                token,
            })
            .await?;

        Ok(Some(self_signed_pem(&domain)))
    }
}

/// CAA source answering nothing anywhere
pub struct EmptyCaa;

#[async_trait]
impl CaaLookup for EmptyCaa {
    async fn lookup_caa(&self, _name: &str) -> CertsResult<Vec<CaaRecord>> {
        Ok(Vec::new())
    }
}

/// CAA source with a fixed answer at one name
pub struct FixedCaa {
    pub name: String,
    pub records: Vec<CaaRecord>,
}

#[async_trait]
impl CaaLookup for FixedCaa {
    async fn lookup_caa(&self, name: &str) -> CertsResult<Vec<CaaRecord>> {
        if name == self.name {
            Ok(self.records.clone())
        } else {
            Ok(Vec::new())
        }
    }
}

/// A coordinator over MemoryKv wired to the scripted backend
pub struct Harness {
    pub kv: Arc<MemoryKv>,
    pub acme: Arc<MockAcme>,
    pub certs: Arc<Certs>,
}

pub fn harness() -> Harness {
    harness_with(|options| options)
}

pub fn harness_with(customize: impl FnOnce(CertsOptions) -> CertsOptions) -> Harness {
    let kv = Arc::new(MemoryKv::new());
    let acme = Arc::new(MockAcme::new());

    let options = CertsOptions::new(kv.clone())
        .with_namespace(NS)
        .with_backend(acme.clone())
        .with_caa_lookup(Arc::new(EmptyCaa))
        .with_acme(AcmeOptions {
            email: "ops@example.com".to_string(),
            ..Default::default()
        })
        // Generous wait budget: debug-mode RSA keygen can hold the lock a
        // while, and losers must still observe the fresh record.
        .with_lock_timing(Duration::from_secs(60), Duration::from_secs(30));

    let certs = Arc::new(Certs::new(customize(options)));
    Harness { kv, acme, certs }
}

impl Harness {
    /// Write the membership record admin tooling would create
    pub async fn seed_domain(&self, domain: &str) {
        self.certs
            .settings()
            .put(&format!("domain:{domain}:data"), &CertData::pending(domain))
            .await
            .unwrap();
    }

    /// Seed a full valid record expiring `valid_for_ms` from now
    pub async fn seed_valid_cert(&self, domain: &str, valid_for_ms: i64) {
        let now = now_ms();
        let data = CertData {
            domain: domain.to_string(),
            status: CertStatus::Valid,
            cert: Some(self_signed_pem(domain)),
            ca: Vec::new(),
            serial_number: Some("01".to_string()),
            fingerprint: Some("AA".to_string()),
            alt_names: vec![domain.to_string()],
            valid_from: Some(now - 1_000),
            valid_to: Some(now + valid_for_ms),
        };
        self.certs
            .settings()
            .put(&format!("domain:{domain}:data"), &data)
            .await
            .unwrap();
    }

    pub async fn fence_counter_used(&self) -> bool {
        use certinel::kv::Kv;
        self.kv
            .get(&format!("{PREFIX}acme:lock:fence"))
            .await
            .unwrap()
            .is_some()
    }

    pub async fn safe_lock_armed(&self, domain: &str) -> bool {
        use certinel::kv::Kv;
        self.kv
            .exists(&format!("{PREFIX}lock:safe:{domain}"))
            .await
            .unwrap()
    }
}

pub const DAY_MS: i64 = 24 * 3600 * 1000;
