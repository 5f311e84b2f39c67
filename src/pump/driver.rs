use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

use super::ClosingSignal;
use crate::{
    error::{Error, Result},
    interface::{
        context::PartitionContext,
        processor::{CloseReason, EventProcessor, EventProcessorFactory},
        receiver::{PartitionReceiver, ReceiverFactory},
        record::EventData,
    },
};

/// Pause after a failed receive before trying again.
const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// The work a partition pump does while it owns a partition.
#[async_trait]
pub trait PumpDriver: Send + Sync {
    async fn open(&self, context: &PartitionContext) -> Result<()>;

    /// Runs until `closing` fires, or returns early with the reason the driver cannot go on.
    async fn run(&self, context: &PartitionContext, closing: ClosingSignal)
        -> Option<CloseReason>;

    /// Called once after `run` returns, or after `open` failed.
    async fn close(&self, context: &PartitionContext, reason: CloseReason);
}

/// Creates the driver for every new partition pump.
pub trait PumpFactory: Send + Sync {
    fn create_driver(&self, partition_id: &str) -> Box<dyn PumpDriver>;

    /// Called after a pump closed because another host took its partition.
    fn on_lease_lost(&self, _partition_id: &str) {}
}

/// Feeds events from a [`ReceiverFactory`] receiver to processors from an
/// [`EventProcessorFactory`].
pub struct ProcessorPumpFactory {
    processors: Arc<dyn EventProcessorFactory>,
    receivers: Arc<dyn ReceiverFactory>,
}

impl ProcessorPumpFactory {
    pub fn new(
        processors: Arc<dyn EventProcessorFactory>,
        receivers: Arc<dyn ReceiverFactory>,
    ) -> Self {
        Self {
            processors,
            receivers,
        }
    }
}

impl PumpFactory for ProcessorPumpFactory {
    fn create_driver(&self, _partition_id: &str) -> Box<dyn PumpDriver> {
        Box::new(ProcessorDriver {
            processors: Arc::clone(&self.processors),
            receivers: Arc::clone(&self.receivers),
            processor: OnceCell::new(),
            receiver: Mutex::new(None),
        })
    }
}

struct ProcessorDriver {
    processors: Arc<dyn EventProcessorFactory>,
    receivers: Arc<dyn ReceiverFactory>,
    processor: OnceCell<Box<dyn EventProcessor>>,
    receiver: Mutex<Option<Box<dyn PartitionReceiver>>>,
}

impl ProcessorDriver {
    async fn deliver(
        &self,
        processor: &dyn EventProcessor,
        context: &PartitionContext,
        events: Vec<EventData>,
    ) {
        if let Err(e) = processor.process_events(context, events).await {
            warn!(
                partition_id = %context.partition_id(),
                error = %e,
                "Event processor failed to process events"
            );
            processor.process_error(context, &e).await;
        }
    }
}

#[async_trait]
impl PumpDriver for ProcessorDriver {
    async fn open(&self, context: &PartitionContext) -> Result<()> {
        let processor = self
            .processor
            .get_or_init(|| async { self.processors.create_event_processor(context) })
            .await;
        processor.open(context).await?;

        let opened: Result<Box<dyn PartitionReceiver>> = async {
            let position = context.initial_position().await?;
            let epoch = context.lease().await.epoch();
            debug!(
                partition_id = %context.partition_id(),
                ?position,
                epoch,
                "Creating receiver"
            );
            self.receivers
                .create_receiver(context.partition_id(), position, epoch)
                .await
        }
        .await;

        match opened {
            Ok(receiver) => {
                *self.receiver.lock().await = Some(receiver);
                Ok(())
            }
            Err(e) => {
                processor.process_error(context, &e).await;
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        context: &PartitionContext,
        closing: ClosingSignal,
    ) -> Option<CloseReason> {
        let processor = self.processor.get()?;
        let mut guard = self.receiver.lock().await;
        let receiver = guard.as_mut()?;
        let options = context.options();

        loop {
            let received = tokio::select! {
                _ = closing.closing() => return None,
                received = tokio::time::timeout(
                    options.receive_timeout,
                    receiver.receive(options.max_batch_size),
                ) => received,
            };

            match received {
                Ok(Ok(events)) => {
                    if !events.is_empty() || options.invoke_processor_after_receive_timeout {
                        self.deliver(&**processor, context, events).await;
                    }
                }
                Ok(Err(Error::ReceiverDisconnected { reason, .. })) => {
                    info!(
                        partition_id = %context.partition_id(),
                        %reason,
                        "Receiver disconnected by a newer owner"
                    );
                    return Some(CloseReason::LeaseLost);
                }
                Ok(Err(e)) => {
                    warn!(
                        partition_id = %context.partition_id(),
                        error = %e,
                        "Receive failed"
                    );
                    processor.process_error(context, &e).await;
                    tokio::select! {
                        _ = closing.closing() => return None,
                        _ = tokio::time::sleep(RECEIVE_ERROR_BACKOFF) => {}
                    }
                }
                Err(_elapsed) => {
                    if options.invoke_processor_after_receive_timeout {
                        self.deliver(&**processor, context, Vec::new()).await;
                    }
                }
            }
        }
    }

    async fn close(&self, context: &PartitionContext, reason: CloseReason) {
        let receiver = self.receiver.lock().await.take();
        if let Some(mut receiver) = receiver {
            if let Err(e) = receiver.close().await {
                warn!(
                    partition_id = %context.partition_id(),
                    error = %e,
                    "Failed to close receiver"
                );
            }
        }

        if let Some(processor) = self.processor.get() {
            if reason == CloseReason::LeaseLost {
                processor
                    .process_error(context, &Error::lease_lost(context.partition_id()))
                    .await;
            }
            if let Err(e) = processor.close(context, reason).await {
                warn!(
                    partition_id = %context.partition_id(),
                    error = %e,
                    "Event processor failed to close"
                );
            }
        }
    }
}

/// Owns partitions without reading anything. Used to exercise lease balancing on its own.
#[derive(Debug, Default, Clone, Copy)]
pub struct DummyPumpFactory;

impl PumpFactory for DummyPumpFactory {
    fn create_driver(&self, _partition_id: &str) -> Box<dyn PumpDriver> {
        Box::new(DummyDriver)
    }
}

struct DummyDriver;

#[async_trait]
impl PumpDriver for DummyDriver {
    async fn open(&self, _context: &PartitionContext) -> Result<()> {
        Ok(())
    }

    async fn run(
        &self,
        _context: &PartitionContext,
        closing: ClosingSignal,
    ) -> Option<CloseReason> {
        closing.closing().await;
        None
    }

    async fn close(&self, _context: &PartitionContext, _reason: CloseReason) {}
}
