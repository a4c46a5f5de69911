// Per-account sync leases
//
// At most one sync holds an account at a time. A lease expires after `ttl`
// unless renewed, so a stalled holder cannot block the account forever; the
// next caller takes it over and the stale holder fails its next renewal.

use log::warn;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::error::SyncError;

#[derive(Debug, Clone, Copy)]
struct Lease {
    token: Uuid,
    expires_at: Instant,
}

#[derive(Clone)]
pub struct AccountLocks {
    leases: Arc<Mutex<HashMap<String, Lease>>>,
    ttl: Duration,
}

impl AccountLocks {
    pub fn new(ttl: Duration) -> Self {
        AccountLocks {
            leases: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    /// Fail fast with `SyncInProgress` if a live lease exists
    pub fn try_acquire(&self, account_id: &str) -> Result<LeaseGuard, SyncError> {
        let now = Instant::now();
        let mut leases = lock_map(&self.leases);

        if let Some(existing) = leases.get(account_id) {
            if existing.expires_at > now {
                return Err(SyncError::SyncInProgress {
                    account_id: account_id.to_string(),
                });
            }
            warn!(
                "Lease for account {} expired without release, taking over",
                account_id
            );
        }

        let token = Uuid::new_v4();
        leases.insert(
            account_id.to_string(),
            Lease {
                token,
                expires_at: now + self.ttl,
            },
        );

        Ok(LeaseGuard {
            leases: Arc::clone(&self.leases),
            account_id: account_id.to_string(),
            token,
            ttl: self.ttl,
        })
    }

    pub fn is_locked(&self, account_id: &str) -> bool {
        lock_map(&self.leases)
            .get(account_id)
            .map(|lease| lease.expires_at > Instant::now())
            .unwrap_or(false)
    }
}

// A panic while holding the map can't leave a lease half-written, so a
// poisoned mutex is still safe to use.
fn lock_map(leases: &Mutex<HashMap<String, Lease>>) -> MutexGuard<'_, HashMap<String, Lease>> {
    leases.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Held for the duration of one sync run; released on drop
pub struct LeaseGuard {
    leases: Arc<Mutex<HashMap<String, Lease>>>,
    account_id: String,
    token: Uuid,
    ttl: Duration,
}

impl LeaseGuard {
    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// Push the expiry out by another ttl. False if the lease was taken over.
    pub fn renew(&self) -> bool {
        let mut leases = lock_map(&self.leases);
        match leases.get_mut(&self.account_id) {
            Some(lease) if lease.token == self.token => {
                lease.expires_at = Instant::now() + self.ttl;
                true
            }
            _ => false,
        }
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        let mut leases = lock_map(&self.leases);
        // Only release our own lease, never a successor's
        if leases
            .get(&self.account_id)
            .map(|lease| lease.token == self.token)
            .unwrap_or(false)
        {
            leases.remove(&self.account_id);
        }
    }
}
