//! ACME backend over `instant-acme`
//!
//! Account keys live inside the library's serialized credentials; orders
//! are driven end-to-end here, with the challenge responder called before
//! validation and after settlement. Timeouts below bound CA polling; the
//! library's own retry policy applies to individual round-trips and no
//! extra retry layer is added.

use std::time::Duration;

use async_trait::async_trait;
use instant_acme::{
    Account, AccountCredentials, AuthorizationStatus, ChallengeType, Identifier, NewAccount,
    NewOrder, Order, OrderStatus,
};
use tracing::{debug, error, info, trace};

use super::{
    AcmeBackend, ChallengeQuery, ChallengeResponder, ChallengeSet, NewAccountOutcome,
    NewAccountRequest, OrderRequest,
};
use crate::errors::{CertsError, CertsResult};

/// Timeout for certificate issuance after finalization
const FINALIZE_TIMEOUT: Duration = Duration::from_secs(60);
/// Timeout for challenge validation
const CHALLENGE_TIMEOUT: Duration = Duration::from_secs(120);

/// Pending HTTP-01 challenge collected from an order's authorizations
#[derive(Debug, Clone)]
struct PendingChallenge {
    domain: String,
    token: String,
    key_authorization: String,
    url: String,
}

/// `instant-acme` backed [`AcmeBackend`]
#[derive(Debug, Default)]
pub struct InstantAcmeBackend;

impl InstantAcmeBackend {
    pub fn new() -> Self {
        Self
    }

    async fn account_from_credentials(credentials: &[u8]) -> CertsResult<Account> {
        let credentials: AccountCredentials = serde_json::from_slice(credentials)
            .map_err(|e| CertsError::Acme(format!("undecodable account credentials: {e}")))?;

        Account::builder()
            .map_err(|e| CertsError::Acme(e.to_string()))?
            .from_credentials(credentials)
            .await
            .map_err(|e| CertsError::Acme(e.to_string()))
    }

    /// Collect the pending HTTP-01 challenge of every authorization
    async fn collect_challenges(order: &mut Order) -> CertsResult<Vec<PendingChallenge>> {
        let mut pending = Vec::new();
        let mut authorizations = order.authorizations();

        while let Some(result) = authorizations.next().await {
            let mut authz =
                result.map_err(|e| CertsError::Acme(format!("authorization fetch failed: {e}")))?;

            let identifier = authz.identifier();
            let domain = match &identifier.identifier {
                Identifier::Dns(domain) => domain.clone(),
                _ => continue,
            };

            debug!(domain = %domain, status = ?authz.status, "Processing authorization");

            if authz.status == AuthorizationStatus::Valid {
                debug!(domain = %domain, "Authorization already valid");
                continue;
            }

            let challenge = authz.challenge(ChallengeType::Http01).ok_or_else(|| {
                CertsError::Acme(format!("no HTTP-01 challenge offered for '{domain}'"))
            })?;
            let key_authorization = challenge.key_authorization();

            pending.push(PendingChallenge {
                domain,
                token: challenge.token.clone(),
                key_authorization: key_authorization.as_str().to_string(),
                url: challenge.url.clone(),
            });
        }

        Ok(pending)
    }

    /// Mark the challenge at `challenge_url` ready for validation
    async fn set_ready(order: &mut Order, challenge_url: &str) -> CertsResult<()> {
        let mut authorizations = order.authorizations();

        while let Some(result) = authorizations.next().await {
            let mut authz =
                result.map_err(|e| CertsError::Acme(format!("authorization fetch failed: {e}")))?;

            let matching_type = authz
                .challenges
                .iter()
                .find(|c| c.url == challenge_url)
                .map(|c| c.r#type.clone());

            if let Some(challenge_type) = matching_type {
                if let Some(mut challenge) = authz.challenge(challenge_type) {
                    challenge
                        .set_ready()
                        .await
                        .map_err(|e| CertsError::Acme(e.to_string()))?;
                    return Ok(());
                }
            }
        }

        Err(CertsError::Acme(format!(
            "challenge not found for URL: {challenge_url}"
        )))
    }

    /// Poll until the order is ready for finalization
    async fn wait_for_order_ready(order: &mut Order) -> CertsResult<()> {
        let deadline = tokio::time::Instant::now() + CHALLENGE_TIMEOUT;

        loop {
            let state = order
                .refresh()
                .await
                .map_err(|e| CertsError::Acme(format!("order refresh failed: {e}")))?;

            match state.status {
                OrderStatus::Ready | OrderStatus::Valid => return Ok(()),
                OrderStatus::Invalid => {
                    error!("Order became invalid during validation");
                    return Err(CertsError::Acme("order became invalid".to_string()));
                }
                OrderStatus::Pending | OrderStatus::Processing => {
                    if tokio::time::Instant::now() > deadline {
                        return Err(CertsError::Acme(
                            "timed out waiting for order to become ready".to_string(),
                        ));
                    }
                    trace!(status = ?state.status, "Order not ready yet, waiting");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    }

    /// Finalize with the CSR and poll for the issued chain
    async fn finalize(order: &mut Order, csr_der: &[u8]) -> CertsResult<Option<String>> {
        order
            .finalize_csr(csr_der)
            .await
            .map_err(|e| CertsError::Acme(format!("finalize failed: {e}")))?;

        let deadline = tokio::time::Instant::now() + FINALIZE_TIMEOUT;
        loop {
            let state = order
                .refresh()
                .await
                .map_err(|e| CertsError::Acme(format!("order refresh failed: {e}")))?;

            match state.status {
                OrderStatus::Valid => {
                    let chain = order
                        .certificate()
                        .await
                        .map_err(|e| CertsError::Acme(format!("certificate fetch failed: {e}")))?;
                    return Ok(chain);
                }
                OrderStatus::Invalid => {
                    return Err(CertsError::Acme(
                        "order became invalid during finalization".to_string(),
                    ));
                }
                _ => {
                    if tokio::time::Instant::now() > deadline {
                        return Err(CertsError::Acme(
                            "timed out waiting for certificate".to_string(),
                        ));
                    }
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }
}

#[async_trait]
impl AcmeBackend for InstantAcmeBackend {
    async fn create_account(&self, request: NewAccountRequest) -> CertsResult<NewAccountOutcome> {
        info!(email = %request.email, directory = %request.directory_url, "Creating ACME account");

        let (_, credentials) = Account::builder()
            .map_err(|e| CertsError::Acme(e.to_string()))?
            .create(
                &NewAccount {
                    contact: &[&format!("mailto:{}", request.email)],
                    terms_of_service_agreed: true,
                    only_return_existing: false,
                },
                request.directory_url.clone(),
                None,
            )
            .await
            .map_err(|e| CertsError::Acme(format!("account creation failed: {e}")))?;

        let credentials_json = serde_json::to_vec(&credentials)
            .map_err(|e| CertsError::Acme(format!("credential serialization failed: {e}")))?;

        // Surface the account id (kid) from the serialized credentials so
        // callers can reference the account without the key material.
        let parsed: serde_json::Value = serde_json::from_slice(&credentials_json)
            .map_err(|e| CertsError::Acme(e.to_string()))?;
        let account = serde_json::json!({
            "key": { "kid": parsed.get("id").cloned().unwrap_or(serde_json::Value::Null) },
            "status": "valid",
            "contact": [format!("mailto:{}", request.email)],
        });

        info!("ACME account created");
        Ok(NewAccountOutcome {
            credentials: credentials_json,
            account,
        })
    }

    async fn order_certificate(
        &self,
        request: OrderRequest<'_>,
        responder: &dyn ChallengeResponder,
    ) -> CertsResult<Option<String>> {
        let account = Self::account_from_credentials(request.credentials).await?;

        let identifiers: Vec<Identifier> = request
            .domains
            .iter()
            .map(|d| Identifier::Dns(d.clone()))
            .collect();

        info!(domains = ?request.domains, "Creating certificate order");

        let mut order = account
            .new_order(&NewOrder::new(&identifiers))
            .await
            .map_err(|e| CertsError::Acme(format!("order creation failed: {e}")))?;

        let pending = Self::collect_challenges(&mut order).await?;

        for challenge in &pending {
            responder
                .set(ChallengeSet {
                    domain: challenge.domain.clone(),
                    token: challenge.token.clone(),
                    key_authorization: challenge.key_authorization.clone(),
                })
                .await?;
        }

        for challenge in &pending {
            Self::set_ready(&mut order, &challenge.url).await?;
        }

        let validation = Self::wait_for_order_ready(&mut order).await;

        // Challenge answers are single-use; drop them regardless of outcome.
        for challenge in &pending {
            responder
                .remove(ChallengeQuery {
                    domain: challenge.domain.clone(),
                    token: challenge.token.clone(),
                })
                .await?;
        }
        validation?;

        let chain = Self::finalize(&mut order, request.csr_der).await?;
        if chain.is_some() {
            info!(domains = ?request.domains, "Certificate issued");
        }
        Ok(chain)
    }
}
