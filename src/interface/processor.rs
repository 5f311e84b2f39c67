use async_trait::async_trait;

use super::{context::PartitionContext, record::EventData};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// The host is shutting down. The lease is released after the processor closes.
    Shutdown,
    /// Another host took the partition.
    LeaseLost,
}

/// Application callbacks for one owned partition. A fresh processor is created every time this
/// host takes the partition.
#[async_trait]
pub trait EventProcessor: Send + Sync {
    async fn open(&self, context: &PartitionContext) -> Result<()>;
    async fn close(&self, context: &PartitionContext, reason: CloseReason) -> Result<()>;
    async fn process_events(&self, context: &PartitionContext, events: Vec<EventData>)
        -> Result<()>;

    /// Transport failures, processor failures and [`Error::LeaseLost`] all arrive here.
    async fn process_error(&self, context: &PartitionContext, error: &Error);
}

pub trait EventProcessorFactory: Send + Sync {
    fn create_event_processor(&self, context: &PartitionContext) -> Box<dyn EventProcessor>;
}
