use std::{sync::Arc, time::Duration};

use futures::future::try_join_all;
use tokio::time::Instant;
use tracing::{debug, info};

use super::{Lease, LeaseStore};
use crate::error::Result;

/// How often a conditional write is retried after losing a token race to a writer that did not
/// change the outcome (for example a concurrent renewal by the owner).
const MAX_CONFLICT_ATTEMPTS: usize = 3;

/// Acquire, renew, release and steal semantics for this host on top of a [`LeaseStore`].
///
/// Operations take the caller's copy of a lease and overwrite it with the stored result when they
/// succeed. A `false` result means another host won; store failures come back as errors.
pub struct LeaseManager {
    host_name: String,
    store: Arc<dyn LeaseStore>,
    lease_duration: Duration,
    lease_renew_interval: Duration,
}

impl LeaseManager {
    pub fn new(
        host_name: impl Into<String>,
        store: Arc<dyn LeaseStore>,
        lease_duration: Duration,
        lease_renew_interval: Duration,
    ) -> Self {
        Self {
            host_name: host_name.into(),
            store,
            lease_duration,
            lease_renew_interval,
        }
    }

    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    pub fn lease_duration(&self) -> Duration {
        self.lease_duration
    }

    pub fn lease_renew_interval(&self) -> Duration {
        self.lease_renew_interval
    }

    pub async fn lease_store_exists(&self) -> Result<bool> {
        self.store.store_exists().await
    }

    pub async fn create_lease_store_if_not_exists(&self) -> Result<bool> {
        self.store.create_store_if_not_exists().await
    }

    pub async fn delete_lease_store(&self) -> Result<bool> {
        self.store.delete_store().await
    }

    pub async fn get_lease(&self, partition_id: &str) -> Result<Option<Lease>> {
        self.store.get_lease(partition_id).await
    }

    /// Reads the leases of every listed partition concurrently. Partitions without a lease are
    /// left out.
    pub async fn get_all_leases(&self, partition_ids: &[String]) -> Result<Vec<Lease>> {
        let leases = try_join_all(partition_ids.iter().map(|id| self.store.get_lease(id))).await?;
        Ok(leases.into_iter().flatten().collect())
    }

    pub async fn create_lease_if_not_exists(&self, partition_id: &str) -> Result<Lease> {
        self.store.create_lease_if_not_exists(partition_id).await
    }

    pub async fn delete_lease(&self, lease: &Lease) -> Result<()> {
        self.store.delete_lease(lease.partition_id()).await
    }

    /// Takes a lease that is unowned, expired, or already held by this host.
    pub async fn acquire_lease(&self, lease: &mut Lease) -> Result<bool> {
        for _ in 0..MAX_CONFLICT_ATTEMPTS {
            let current = match self.store.get_lease(lease.partition_id()).await? {
                Some(current) => current,
                None => return Ok(false),
            };
            let held_by_self = current.is_owned_by(&self.host_name);
            if current.is_owned() && !current.is_expired() && !held_by_self {
                debug!(
                    host = %self.host_name,
                    partition_id = %current.partition_id(),
                    owner = %current.owner(),
                    "Lease held by another host"
                );
                return Ok(false);
            }

            let mut updated = current.clone();
            if !held_by_self || current.is_expired() {
                updated.set_epoch(current.epoch() + 1);
            }
            updated.set_owner(self.host_name.as_str());
            updated.set_expiration_time(Some(self.next_expiration()));

            if let Some(stored) = self.store.try_replace_lease(current.token(), updated).await? {
                info!(
                    host = %self.host_name,
                    partition_id = %stored.partition_id(),
                    epoch = stored.epoch(),
                    "Acquired lease"
                );
                *lease = stored;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Extends a lease this host is recorded as owning, even if it has already expired.
    pub async fn renew_lease(&self, lease: &mut Lease) -> Result<bool> {
        for _ in 0..MAX_CONFLICT_ATTEMPTS {
            let current = match self.store.get_lease(lease.partition_id()).await? {
                Some(current) => current,
                None => return Ok(false),
            };
            if !current.is_owned_by(&self.host_name) {
                debug!(
                    host = %self.host_name,
                    partition_id = %current.partition_id(),
                    owner = %current.owner(),
                    "Cannot renew lease owned by another host"
                );
                return Ok(false);
            }

            let mut updated = current.clone();
            updated.set_expiration_time(Some(self.next_expiration()));

            if let Some(stored) = self.store.try_replace_lease(current.token(), updated).await? {
                debug!(
                    host = %self.host_name,
                    partition_id = %stored.partition_id(),
                    "Renewed lease"
                );
                *lease = stored;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Gives up a fresh lease held by this host. Expired leases cannot be released.
    pub async fn release_lease(&self, lease: &mut Lease) -> Result<bool> {
        for _ in 0..MAX_CONFLICT_ATTEMPTS {
            let current = match self.store.get_lease(lease.partition_id()).await? {
                Some(current) => current,
                None => return Ok(false),
            };
            if !current.is_owned_by(&self.host_name) || current.is_expired() {
                return Ok(false);
            }

            let mut updated = current.clone();
            updated.set_owner("");
            updated.set_expiration_time(None);

            if let Some(stored) = self.store.try_replace_lease(current.token(), updated).await? {
                info!(
                    host = %self.host_name,
                    partition_id = %stored.partition_id(),
                    "Released lease"
                );
                *lease = stored;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Takes over `lease` from whichever host holds it, provided the store still holds exactly the
    /// version the caller read. Any write since then (a renewal, another steal) makes this fail.
    pub async fn steal_lease(&self, lease: &mut Lease) -> Result<bool> {
        let mut updated = lease.clone();
        updated.set_owner(self.host_name.as_str());
        updated.set_epoch(lease.epoch() + 1);
        updated.set_expiration_time(Some(self.next_expiration()));

        match self.store.try_replace_lease(lease.token(), updated).await? {
            Some(stored) => {
                info!(
                    host = %self.host_name,
                    partition_id = %stored.partition_id(),
                    previous_owner = %lease.owner(),
                    epoch = stored.epoch(),
                    "Stole lease"
                );
                *lease = stored;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Renews the lease, then persists the caller's epoch.
    pub async fn update_lease(&self, lease: &mut Lease) -> Result<bool> {
        let epoch = lease.epoch();
        if !self.renew_lease(lease).await? {
            return Ok(false);
        }

        let mut updated = lease.clone();
        updated.set_epoch(epoch);
        match self.store.try_replace_lease(lease.token(), updated).await? {
            Some(stored) => {
                *lease = stored;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn next_expiration(&self) -> Instant {
        Instant::now() + self.lease_duration
    }
}
