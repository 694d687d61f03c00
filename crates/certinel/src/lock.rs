//! Distributed locks over the KV store
//!
//! SET-NX-PX leases with a holder uuid and a monotonic fencing counter.
//! Acquisition polls until the wait budget runs out; a budget miss is a
//! normal outcome, not an error. Release is compare-and-delete on the
//! holder uuid, so an expired holder can never drop a successor's lease.
//! Process death without release is covered by the lease TTL.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::errors::CertsResult;
use crate::kv::Kv;

/// Delay between acquisition attempts while the lease is contended
const RETRY_INTERVAL: Duration = Duration::from_millis(150);

/// A held lease
///
/// The fencing token increases monotonically across all acquisitions in
/// the namespace; stale holders can be detected by comparing tokens.
#[derive(Debug)]
pub struct LockHandle {
    key: String,
    holder: String,
    pub fencing_token: i64,
}

impl LockHandle {
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Lease-based lock service shared by all coordinator processes
#[derive(Clone)]
pub struct LockService {
    kv: Arc<dyn Kv>,
    fence_key: String,
}

impl LockService {
    pub fn new(kv: Arc<dyn Kv>, namespace: &str) -> Self {
        Self {
            kv,
            fence_key: format!("{namespace}acme:lock:fence"),
        }
    }

    /// Try to acquire `key` for `lease`, waiting up to `wait_budget`
    ///
    /// Returns `None` when the budget elapses without acquisition.
    pub async fn acquire(
        &self,
        key: &str,
        lease: Duration,
        wait_budget: Duration,
    ) -> CertsResult<Option<LockHandle>> {
        let holder = Uuid::new_v4().to_string();
        let deadline = Instant::now() + wait_budget;

        loop {
            let acquired = self
                .kv
                .set_nx_px(key, holder.as_bytes(), lease.as_millis() as u64)
                .await?;

            if acquired {
                let fencing_token = self.kv.incr(&self.fence_key).await?;
                debug!(key = %key, fencing_token, "Acquired lock");
                return Ok(Some(LockHandle {
                    key: key.to_string(),
                    holder,
                    fencing_token,
                }));
            }

            if Instant::now() + RETRY_INTERVAL > deadline {
                trace!(key = %key, "Lock wait budget exhausted");
                return Ok(None);
            }
            tokio::time::sleep(RETRY_INTERVAL).await;
        }
    }

    /// Release a held lease
    ///
    /// Idempotent; a lease that already expired (and was possibly taken
    /// over) is left untouched.
    pub async fn release(&self, handle: LockHandle) -> CertsResult<()> {
        let released = self
            .kv
            .del_if_equals(&handle.key, handle.holder.as_bytes())
            .await?;
        if released {
            debug!(key = %handle.key, "Released lock");
        } else {
            warn!(key = %handle.key, "Lease no longer held at release time");
        }
        Ok(())
    }
}

impl std::fmt::Debug for LockService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockService")
            .field("fence_key", &self.fence_key)
            .finish_non_exhaustive()
    }
}
