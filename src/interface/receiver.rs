use async_trait::async_trait;

use super::record::{EventData, EventPosition};
use crate::error::Result;

/// Receive side of the event transport for one partition.
///
/// A receiver that was superseded by one opened with a higher epoch should fail with
/// [`crate::Error::ReceiverDisconnected`]; the pump treats that as a lost lease.
#[async_trait]
pub trait PartitionReceiver: Send {
    /// Waits for up to `max_count` events.
    async fn receive(&mut self, max_count: usize) -> Result<Vec<EventData>>;

    async fn close(&mut self) -> Result<()>;
}

#[async_trait]
pub trait ReceiverFactory: Send + Sync {
    /// `epoch` is the lease's fencing token, passed through to the transport unchanged.
    async fn create_receiver(
        &self,
        partition_id: &str,
        position: EventPosition,
        epoch: i64,
    ) -> Result<Box<dyn PartitionReceiver>>;
}
