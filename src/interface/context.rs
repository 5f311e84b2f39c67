use std::sync::Arc;

use tokio::sync::Mutex;

use super::record::{EventData, EventPosition};
use crate::{
    checkpoint::Checkpoint,
    config::HostOptions,
    error::{Error, Result},
    lease::Lease,
    HostContext,
};

/// What a processor knows about the partition it is working on.
///
/// The lease inside is the pump's working copy. Renewals and checkpoints lock it, so they never
/// interleave for the same partition.
pub struct PartitionContext {
    host: Arc<HostContext>,
    partition_id: String,
    lease: Mutex<Lease>,
}

impl PartitionContext {
    pub(crate) fn new(host: Arc<HostContext>, lease: Lease) -> Self {
        Self {
            host,
            partition_id: lease.partition_id().to_string(),
            lease: Mutex::new(lease),
        }
    }

    pub fn partition_id(&self) -> &str {
        &self.partition_id
    }

    pub fn owner(&self) -> &str {
        &self.host.host_name
    }

    pub async fn lease(&self) -> Lease {
        self.lease.lock().await.clone()
    }

    /// The checkpointed position, or the configured initial position if there is no checkpoint.
    pub async fn initial_position(&self) -> Result<EventPosition> {
        let checkpoint = self
            .host
            .checkpoint_manager
            .get_checkpoint(&self.partition_id)
            .await?;
        Ok(match checkpoint {
            Some(checkpoint) => EventPosition::from_checkpoint(&checkpoint),
            None => self.host.options.initial_position.clone(),
        })
    }

    /// Records progress for this partition. Fails with [`Error::LeaseLost`] if this host no longer
    /// holds the lease.
    pub async fn checkpoint(&self, offset: impl Into<String>, sequence_number: i64) -> Result<()> {
        let checkpoint = Checkpoint::new(
            self.partition_id.as_str(),
            Some(offset.into()),
            sequence_number,
        );

        let mut lease = self.lease.lock().await;
        if !self.host.lease_manager.renew_lease(&mut lease).await? {
            return Err(Error::lease_lost(&self.partition_id));
        }
        self.host
            .checkpoint_manager
            .update_checkpoint(&lease, &checkpoint)
            .await
    }

    pub async fn checkpoint_event(&self, event: &EventData) -> Result<()> {
        self.checkpoint(event.offset.as_str(), event.sequence_number)
            .await
    }

    pub(crate) fn options(&self) -> &HostOptions {
        &self.host.options
    }

    pub(crate) async fn renew_lease(&self) -> Result<bool> {
        let mut lease = self.lease.lock().await;
        self.host.lease_manager.renew_lease(&mut lease).await
    }

    pub(crate) async fn release_lease(&self) -> Result<bool> {
        let mut lease = self.lease.lock().await;
        self.host.lease_manager.release_lease(&mut lease).await
    }

    pub(crate) async fn replace_lease(&self, lease: Lease) {
        *self.lease.lock().await = lease;
    }
}
