use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::{error::Result, lease::Lease};

/// Sequence number of a checkpoint record that has been created but never written.
pub const UNINITIALIZED_SEQUENCE_NUMBER: i64 = -1;

/// Durable read position within one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    partition_id: String,
    offset: Option<String>,
    sequence_number: i64,
}

impl Checkpoint {
    pub fn new(
        partition_id: impl Into<String>,
        offset: Option<String>,
        sequence_number: i64,
    ) -> Self {
        Self {
            partition_id: partition_id.into(),
            offset,
            sequence_number,
        }
    }

    /// The placeholder record a store creates for each partition.
    pub fn uninitialized(partition_id: impl Into<String>) -> Self {
        Self::new(partition_id, None, UNINITIALIZED_SEQUENCE_NUMBER)
    }

    pub fn partition_id(&self) -> &str {
        &self.partition_id
    }

    pub fn offset(&self) -> Option<&str> {
        self.offset.as_deref()
    }

    pub fn sequence_number(&self) -> i64 {
        self.sequence_number
    }

    pub fn is_initialized(&self) -> bool {
        self.sequence_number != UNINITIALIZED_SEQUENCE_NUMBER
    }
}

/// Durable storage for checkpoints. May share a backend with the lease store or not.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn store_exists(&self) -> Result<bool>;
    async fn create_store_if_not_exists(&self) -> Result<bool>;
    async fn delete_store(&self) -> Result<bool>;

    /// Returns the raw record, placeholders included.
    async fn get_checkpoint(&self, partition_id: &str) -> Result<Option<Checkpoint>>;

    /// Creates the placeholder record unless one exists; returns the stored record.
    async fn create_checkpoint_if_not_exists(&self, partition_id: &str) -> Result<Checkpoint>;

    /// Overwrites an existing record. Returns `false` if there is no record for the partition.
    async fn update_checkpoint(&self, checkpoint: &Checkpoint) -> Result<bool>;

    async fn delete_checkpoint(&self, partition_id: &str) -> Result<()>;
}

pub struct CheckpointManager {
    store: Arc<dyn CheckpointStore>,
}

impl CheckpointManager {
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self { store }
    }

    pub async fn checkpoint_store_exists(&self) -> Result<bool> {
        self.store.store_exists().await
    }

    pub async fn create_checkpoint_store_if_not_exists(&self) -> Result<bool> {
        self.store.create_store_if_not_exists().await
    }

    pub async fn delete_checkpoint_store(&self) -> Result<bool> {
        self.store.delete_store().await
    }

    /// Returns `None` for a missing record and for a placeholder that was never written.
    pub async fn get_checkpoint(&self, partition_id: &str) -> Result<Option<Checkpoint>> {
        Ok(self
            .store
            .get_checkpoint(partition_id)
            .await?
            .filter(Checkpoint::is_initialized))
    }

    /// Makes sure the placeholder record exists. Never hands back a checkpoint: the placeholder is
    /// not a usable position.
    pub async fn create_checkpoint_if_not_exists(
        &self,
        partition_id: &str,
    ) -> Result<Option<Checkpoint>> {
        self.store.create_checkpoint_if_not_exists(partition_id).await?;
        Ok(None)
    }

    /// Writes `checkpoint` on behalf of the holder of `lease`. The caller is responsible for having
    /// proven ownership of the lease first.
    pub async fn update_checkpoint(&self, lease: &Lease, checkpoint: &Checkpoint) -> Result<()> {
        if self.store.update_checkpoint(checkpoint).await? {
            debug!(
                partition_id = %checkpoint.partition_id(),
                offset = ?checkpoint.offset(),
                sequence_number = checkpoint.sequence_number(),
                epoch = lease.epoch(),
                "Checkpoint updated"
            );
        } else {
            warn!(
                partition_id = %checkpoint.partition_id(),
                "No checkpoint record to update"
            );
        }
        Ok(())
    }

    pub async fn delete_checkpoint(&self, partition_id: &str) -> Result<()> {
        self.store.delete_checkpoint(partition_id).await
    }
}
