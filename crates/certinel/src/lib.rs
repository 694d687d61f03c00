//! Certinel — distributed ACME certificate lifecycle coordinator
//!
//! Automates acquisition, renewal, and serving of TLS certificates for a
//! dynamic set of domains against an RFC 8555 CA such as Let's Encrypt.
//! A shared Redis holds account material, per-domain certificate state,
//! and in-flight HTTP-01 challenge answers, so any number of stateless
//! frontend processes can cooperate: issuance is serialized per domain
//! with a distributed lock, failures arm a short fail-safe backoff, and
//! any process can serve any challenge.
//!
//! # Components
//!
//! - [`Certs`] - The coordinator: per-domain state machine and entry points
//! - [`kv`] - KV backend trait with Redis and in-memory implementations
//! - [`SettingsStore`] - Typed MessagePack facade over the settings hash
//! - [`ChallengeStore`] - TTL'd challenge answers, shared across processes
//! - [`LockService`] - Lease locks with fencing tokens
//! - [`AccountManager`] - Per-environment CA account provisioning
//! - [`DomainValidator`] - Syntax and CAA policy checks
//! - [`acme`] - CA backend contract and the `instant-acme` implementation
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use certinel::{AcmeOptions, Certs, CertsOptions, RedisKv};
//!
//! let kv = Arc::new(RedisKv::connect("redis://127.0.0.1:6379").await?);
//! let certs = Certs::new(
//!     CertsOptions::new(kv)
//!         .with_namespace("edge")
//!         .with_acme(AcmeOptions {
//!             email: "ops@example.com".into(),
//!             caa_domains: vec!["letsencrypt.org".into()],
//!             ..Default::default()
//!         }),
//! );
//!
//! // Transparently provisions or renews as needed.
//! let record = certs.get_certificate("example.com").await?;
//! ```

// ============================================================================
// Module Declarations
// ============================================================================

pub mod account;
pub mod acme;
pub mod cert;
pub mod challenge;
pub mod challenge_server;
pub mod cipher;
pub mod codec;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod errors;
pub mod keys;
pub mod kv;
pub mod lock;
pub mod settings;
pub mod types;
pub mod validate;

// ============================================================================
// Public API Re-exports
// ============================================================================

// Coordinator
pub use coordinator::Certs;

// Configuration
pub use config::{AcmeOptions, CertsOptions, RENEW_WINDOW};

// Errors
pub use errors::{CertsError, CertsResult};

// Stores and services
pub use challenge::ChallengeStore;
pub use kv::{Kv, MemoryKv, RedisKv};
pub use lock::{LockHandle, LockService};
pub use settings::SettingsStore;

// Accounts and crypto seams
pub use account::{AccountManager, AcmeAccount};
pub use cipher::{IdentityCipher, KeyCipher};

// Validation
pub use validate::{CaaLookup, CaaRecord, DomainValidator};

// Records
pub use types::{CertRecord, CertStatus, LastError};

// Challenge serving
pub use challenge_server::{run_challenge_server, ACME_CHALLENGE_PREFIX};
