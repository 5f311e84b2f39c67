use async_trait::async_trait;

use super::Lease;
use crate::error::Result;

/// Durable storage for partition leases.
///
/// Implementations only need one atomic primitive, [`LeaseStore::try_replace_lease`]; the
/// acquire, renew, release and steal rules live in [`super::LeaseManager`]. Every read must return
/// an owned copy of the stored record.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    async fn store_exists(&self) -> Result<bool>;

    /// Idempotent. Returns `true` if this call created the store.
    async fn create_store_if_not_exists(&self) -> Result<bool>;

    /// Returns `true` if a store was deleted.
    async fn delete_store(&self) -> Result<bool>;

    async fn get_lease(&self, partition_id: &str) -> Result<Option<Lease>>;

    /// Creates an unowned lease at epoch 0 unless one exists; returns the stored lease either way.
    async fn create_lease_if_not_exists(&self, partition_id: &str) -> Result<Lease>;

    async fn delete_lease(&self, partition_id: &str) -> Result<()>;

    /// Atomically replaces the stored lease for `lease.partition_id()` if the stored token still
    /// equals `expected_token`. On success the store issues a new token and returns the stored
    /// copy. Returns `None` when the token no longer matches or the lease does not exist.
    async fn try_replace_lease(&self, expected_token: &str, lease: Lease)
        -> Result<Option<Lease>>;
}
