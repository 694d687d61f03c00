//! ACME account provisioning
//!
//! One CA account per environment, cached in the settings hash. Cold-start
//! provisioning is the one place a thundering herd is deliberately
//! collapsed: within a process, concurrent first callers queue behind a
//! single provisioning attempt; a failure is not cached, so the next
//! caller retries. Across processes the last settings write wins — both
//! accounts remain serviceable, and stale ones cost nothing.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::acme::{AcmeBackend, NewAccountRequest};
use crate::cipher::KeyCipher;
use crate::errors::{CertsError, CertsResult};
use crate::settings::SettingsStore;
use crate::types::AccountRecord;

/// A usable CA account: decrypted credentials plus the CA's account record
#[derive(Debug, Clone)]
pub struct AcmeAccount {
    pub credentials: Vec<u8>,
    pub account: serde_json::Value,
}

/// Provisions and caches the per-environment CA account
pub struct AccountManager {
    settings: SettingsStore,
    backend: Arc<dyn AcmeBackend>,
    cipher: Arc<dyn KeyCipher>,
    environment: String,
    email: String,
    directory_url: String,
    provision: Mutex<()>,
}

impl AccountManager {
    pub fn new(
        settings: SettingsStore,
        backend: Arc<dyn AcmeBackend>,
        cipher: Arc<dyn KeyCipher>,
        environment: &str,
        email: &str,
        directory_url: &str,
    ) -> Self {
        Self {
            settings,
            backend,
            cipher,
            environment: environment.to_string(),
            email: email.to_string(),
            directory_url: directory_url.to_string(),
            provision: Mutex::new(()),
        }
    }

    fn field(&self) -> String {
        format!("account:{}", self.environment)
    }

    /// Return the environment's account, provisioning it on first use
    pub async fn get_account(&self) -> CertsResult<AcmeAccount> {
        // Queue concurrent callers so a cold start provisions exactly once
        // per process; the guard is dropped before returning, so a failed
        // attempt is retried by whoever queues next.
        let _guard = self.provision.lock().await;

        if let Some(record) = self.settings.get::<AccountRecord>(&self.field()).await? {
            debug!(environment = %self.environment, "Using stored ACME account");
            let credentials = self.cipher.decrypt(record.private_key).await?;
            return Ok(AcmeAccount {
                credentials,
                account: record.account,
            });
        }

        info!(environment = %self.environment, email = %self.email, "Provisioning new ACME account");

        let outcome = self
            .backend
            .create_account(NewAccountRequest {
                email: self.email.clone(),
                directory_url: self.directory_url.clone(),
            })
            .await
            .map_err(|e| CertsError::AccountUnavailable(e.to_string()))?;

        let encrypted = self.cipher.encrypt(outcome.credentials.clone()).await?;

        // Awaited before returning so an immediate re-read cannot miss it.
        self.settings
            .put(
                &self.field(),
                &AccountRecord {
                    private_key: encrypted,
                    account: outcome.account.clone(),
                },
            )
            .await?;

        info!(environment = %self.environment, "ACME account stored");

        Ok(AcmeAccount {
            credentials: outcome.credentials,
            account: outcome.account,
        })
    }
}

impl std::fmt::Debug for AccountManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountManager")
            .field("environment", &self.environment)
            .field("email", &self.email)
            .field("directory_url", &self.directory_url)
            .finish_non_exhaustive()
    }
}
