//! Volatile lease and checkpoint stores.
//!
//! Each store instance is its own isolated "backend": hosts that should coordinate share one
//! instance through an `Arc`. Records are held by the store and every read hands back a clone.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{
    checkpoint::{Checkpoint, CheckpointStore},
    error::{Error, Result},
    lease::{Lease, LeaseStore},
};

const LEASE_STORE_NAME: &str = "in-memory lease store";
const CHECKPOINT_STORE_NAME: &str = "in-memory checkpoint store";

fn new_token() -> String {
    format!("{:016x}", rand::random::<u64>())
}

#[derive(Default)]
pub struct InMemoryLeaseStore {
    leases: Mutex<Option<HashMap<String, Lease>>>,
}

impl InMemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LeaseStore for InMemoryLeaseStore {
    async fn store_exists(&self) -> Result<bool> {
        Ok(self.leases.lock().await.is_some())
    }

    async fn create_store_if_not_exists(&self) -> Result<bool> {
        let mut leases = self.leases.lock().await;
        if leases.is_some() {
            return Ok(false);
        }
        *leases = Some(HashMap::new());
        Ok(true)
    }

    async fn delete_store(&self) -> Result<bool> {
        Ok(self.leases.lock().await.take().is_some())
    }

    async fn get_lease(&self, partition_id: &str) -> Result<Option<Lease>> {
        let leases = self.leases.lock().await;
        let leases = leases
            .as_ref()
            .ok_or_else(|| Error::StoreNotFound(LEASE_STORE_NAME.to_string()))?;
        let lease = leases.get(partition_id).cloned();
        if lease.is_none() {
            info!(partition_id, "No lease found");
        }
        Ok(lease)
    }

    async fn create_lease_if_not_exists(&self, partition_id: &str) -> Result<Lease> {
        let mut leases = self.leases.lock().await;
        let leases = leases
            .as_mut()
            .ok_or_else(|| Error::StoreNotFound(LEASE_STORE_NAME.to_string()))?;
        let lease = leases.entry(partition_id.to_string()).or_insert_with(|| {
            debug!(partition_id, "Creating lease");
            let mut lease = Lease::new(partition_id);
            lease.set_token(new_token());
            lease
        });
        Ok(lease.clone())
    }

    async fn delete_lease(&self, partition_id: &str) -> Result<()> {
        if let Some(leases) = self.leases.lock().await.as_mut() {
            leases.remove(partition_id);
        }
        Ok(())
    }

    async fn try_replace_lease(
        &self,
        expected_token: &str,
        mut lease: Lease,
    ) -> Result<Option<Lease>> {
        let mut leases = self.leases.lock().await;
        let leases = leases
            .as_mut()
            .ok_or_else(|| Error::StoreNotFound(LEASE_STORE_NAME.to_string()))?;
        match leases.get_mut(lease.partition_id()) {
            Some(stored) if stored.token() == expected_token => {
                lease.set_token(new_token());
                *stored = lease.clone();
                Ok(Some(lease))
            }
            _ => Ok(None),
        }
    }
}

#[derive(Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: Mutex<Option<HashMap<String, Checkpoint>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn store_exists(&self) -> Result<bool> {
        Ok(self.checkpoints.lock().await.is_some())
    }

    async fn create_store_if_not_exists(&self) -> Result<bool> {
        let mut checkpoints = self.checkpoints.lock().await;
        if checkpoints.is_some() {
            return Ok(false);
        }
        *checkpoints = Some(HashMap::new());
        Ok(true)
    }

    async fn delete_store(&self) -> Result<bool> {
        Ok(self.checkpoints.lock().await.take().is_some())
    }

    async fn get_checkpoint(&self, partition_id: &str) -> Result<Option<Checkpoint>> {
        let checkpoints = self.checkpoints.lock().await;
        let checkpoints = checkpoints
            .as_ref()
            .ok_or_else(|| Error::StoreNotFound(CHECKPOINT_STORE_NAME.to_string()))?;
        Ok(checkpoints.get(partition_id).cloned())
    }

    async fn create_checkpoint_if_not_exists(&self, partition_id: &str) -> Result<Checkpoint> {
        let mut checkpoints = self.checkpoints.lock().await;
        let checkpoints = checkpoints
            .as_mut()
            .ok_or_else(|| Error::StoreNotFound(CHECKPOINT_STORE_NAME.to_string()))?;
        Ok(checkpoints
            .entry(partition_id.to_string())
            .or_insert_with(|| Checkpoint::uninitialized(partition_id))
            .clone())
    }

    async fn update_checkpoint(&self, checkpoint: &Checkpoint) -> Result<bool> {
        let mut checkpoints = self.checkpoints.lock().await;
        let checkpoints = checkpoints
            .as_mut()
            .ok_or_else(|| Error::StoreNotFound(CHECKPOINT_STORE_NAME.to_string()))?;
        match checkpoints.get_mut(checkpoint.partition_id()) {
            Some(stored) => {
                *stored = checkpoint.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_checkpoint(&self, partition_id: &str) -> Result<()> {
        if let Some(checkpoints) = self.checkpoints.lock().await.as_mut() {
            checkpoints.remove(partition_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lease_store_lifecycle() {
        let store = InMemoryLeaseStore::new();
        assert!(!store.store_exists().await.unwrap());
        assert!(matches!(
            store.get_lease("0").await,
            Err(Error::StoreNotFound(_))
        ));

        assert!(store.create_store_if_not_exists().await.unwrap());
        assert!(!store.create_store_if_not_exists().await.unwrap());
        assert!(store.store_exists().await.unwrap());

        assert!(store.delete_store().await.unwrap());
        assert!(!store.delete_store().await.unwrap());
    }

    #[tokio::test]
    async fn test_create_lease_is_idempotent() {
        let store = InMemoryLeaseStore::new();
        store.create_store_if_not_exists().await.unwrap();

        let first = store.create_lease_if_not_exists("0").await.unwrap();
        assert!(!first.is_owned());
        assert_eq!(first.epoch(), 0);
        assert!(!first.token().is_empty());

        let again = store.create_lease_if_not_exists("0").await.unwrap();
        assert_eq!(first, again);
    }

    #[tokio::test]
    async fn test_replace_requires_matching_token() {
        let store = InMemoryLeaseStore::new();
        store.create_store_if_not_exists().await.unwrap();
        let lease = store.create_lease_if_not_exists("0").await.unwrap();

        let mut update = lease.clone();
        update.set_epoch(5);
        let stored = store
            .try_replace_lease(lease.token(), update.clone())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.epoch(), 5);
        assert_ne!(stored.token(), lease.token());

        assert_eq!(
            store.try_replace_lease(lease.token(), update).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_replace_missing_lease_fails() {
        let store = InMemoryLeaseStore::new();
        store.create_store_if_not_exists().await.unwrap();
        let orphan = Lease::new("9");
        assert_eq!(store.try_replace_lease("", orphan).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_checkpoint_store_update_requires_record() {
        let store = InMemoryCheckpointStore::new();
        store.create_store_if_not_exists().await.unwrap();

        let checkpoint = Checkpoint::new("0", Some("100".to_string()), 12);
        assert!(!store.update_checkpoint(&checkpoint).await.unwrap());

        store.create_checkpoint_if_not_exists("0").await.unwrap();
        assert!(store.update_checkpoint(&checkpoint).await.unwrap());
        assert_eq!(store.get_checkpoint("0").await.unwrap(), Some(checkpoint));

        store.delete_checkpoint("0").await.unwrap();
        assert_eq!(store.get_checkpoint("0").await.unwrap(), None);
    }
}
