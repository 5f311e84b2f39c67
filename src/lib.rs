//! Coordinates a group of hosts consuming one partitioned event stream.
//!
//! Every host runs an [`EventProcessorHost`] over shared lease and checkpoint stores. Hosts take
//! leases on partitions until the partitions are spread evenly, and run one pump per owned
//! partition. A pump feeds events to an [`EventProcessor`] which records its progress through
//! [`PartitionContext::checkpoint`].

use std::{collections::HashSet, sync::Arc};

use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{info, warn};

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod interface;
pub mod lease;
pub mod memory;
pub(crate) mod partition;
pub mod pump;
pub mod telemetry;
pub(crate) mod util;

pub use checkpoint::{Checkpoint, CheckpointManager, CheckpointStore};
pub use config::HostOptions;
pub use error::{Error, Result};
pub use interface::{
    context::PartitionContext,
    processor::{CloseReason, EventProcessor, EventProcessorFactory},
    receiver::{PartitionReceiver, ReceiverFactory},
    record::{EventData, EventPosition},
};
pub use lease::{Lease, LeaseManager, LeaseStore};
pub use pump::{DummyPumpFactory, ProcessorPumpFactory, PumpDriver, PumpFactory};

use partition::PartitionManager;
use util::{shutdown_channel, ShutdownTrigger};

/// Everything a host's components share.
pub(crate) struct HostContext {
    pub(crate) host_name: String,
    pub(crate) partition_ids: Vec<String>,
    pub(crate) options: HostOptions,
    pub(crate) lease_manager: LeaseManager,
    pub(crate) checkpoint_manager: CheckpointManager,
}

enum Registration {
    Unregistered,
    Running {
        manager: Arc<PartitionManager>,
        trigger: ShutdownTrigger,
        task: JoinHandle<Result<()>>,
    },
    Stopped,
}

pub struct EventProcessorHost {
    host: Arc<HostContext>,
    registration: Mutex<Registration>,
}

impl EventProcessorHost {
    pub fn new(
        host_name: impl Into<String>,
        partition_ids: Vec<String>,
        lease_store: Arc<dyn LeaseStore>,
        checkpoint_store: Arc<dyn CheckpointStore>,
        options: HostOptions,
    ) -> Result<Self> {
        let host_name = host_name.into();
        if host_name.is_empty() {
            return Err(Error::InvalidArgument("host name must not be empty".into()));
        }
        if partition_ids.is_empty() {
            return Err(Error::InvalidArgument(
                "at least one partition id is required".into(),
            ));
        }
        if partition_ids.iter().any(String::is_empty) {
            return Err(Error::InvalidArgument("partition ids must not be empty".into()));
        }
        let unique: HashSet<&String> = partition_ids.iter().collect();
        if unique.len() != partition_ids.len() {
            return Err(Error::InvalidArgument("partition ids must be unique".into()));
        }
        options.validate()?;

        let lease_manager = LeaseManager::new(
            host_name.as_str(),
            lease_store,
            options.lease_duration,
            options.lease_renew_interval,
        );
        Ok(Self {
            host: Arc::new(HostContext {
                host_name,
                partition_ids,
                options,
                lease_manager,
                checkpoint_manager: CheckpointManager::new(checkpoint_store),
            }),
            registration: Mutex::new(Registration::Unregistered),
        })
    }

    /// `prefix` followed by a random suffix, unique enough to tell hosts apart.
    pub fn create_host_name(prefix: &str) -> String {
        format!("{}-{:016x}", prefix, rand::random::<u64>())
    }

    pub fn host_name(&self) -> &str {
        &self.host.host_name
    }

    pub fn lease_manager(&self) -> &LeaseManager {
        &self.host.lease_manager
    }

    pub fn checkpoint_manager(&self) -> &CheckpointManager {
        &self.host.checkpoint_manager
    }

    /// Starts taking partitions, with one processor per owned partition.
    pub async fn register_event_processor_factory(
        &self,
        processors: Arc<dyn EventProcessorFactory>,
        receivers: Arc<dyn ReceiverFactory>,
    ) -> Result<()> {
        self.register_pump_factory(Arc::new(ProcessorPumpFactory::new(processors, receivers)))
            .await
    }

    /// Starts taking partitions, with pumps built by `factory`. A host can be registered once.
    pub async fn register_pump_factory(&self, factory: Arc<dyn PumpFactory>) -> Result<()> {
        let mut registration = self.registration.lock().await;
        match *registration {
            Registration::Unregistered => {}
            Registration::Running { .. } => {
                return Err(Error::InvalidOperation(format!(
                    "host {} is already registered",
                    self.host.host_name
                )))
            }
            Registration::Stopped => {
                return Err(Error::InvalidOperation(format!(
                    "host {} has been unregistered",
                    self.host.host_name
                )))
            }
        }

        let (trigger, signal) = shutdown_channel();
        let manager = Arc::new(PartitionManager::new(
            Arc::clone(&self.host),
            factory,
            signal,
        ));
        let task = tokio::spawn(Arc::clone(&manager).run());
        info!(host = %self.host.host_name, "Host registered");

        *registration = Registration::Running {
            manager,
            trigger,
            task,
        };
        Ok(())
    }

    /// Stops scanning, closes every pump and releases its lease. Waits at most
    /// [`HostOptions::shutdown_timeout`]; calling it on a host that is not running does nothing.
    pub async fn unregister(&self) -> Result<()> {
        let previous = {
            let mut registration = self.registration.lock().await;
            std::mem::replace(&mut *registration, Registration::Stopped)
        };
        let (manager, trigger, mut task) = match previous {
            Registration::Running {
                manager,
                trigger,
                task,
            } => (manager, trigger, task),
            _ => return Ok(()),
        };

        info!(host = %self.host.host_name, "Unregistering host");
        trigger.trigger();

        match tokio::time::timeout(self.host.options.shutdown_timeout, &mut task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(Error::InvalidOperation(format!(
                "partition manager task failed: {}",
                e
            ))),
            Err(_) => {
                warn!(host = %self.host.host_name, "Shutdown timed out, aborting");
                task.abort();
                manager.close_pumps_now().await;
                Err(Error::Timeout(format!(
                    "host {} did not shut down within {:?}",
                    self.host.host_name, self.host.options.shutdown_timeout
                )))
            }
        }
    }

    /// Partitions this host is currently pumping, sorted.
    pub async fn owned_partitions(&self) -> Vec<String> {
        let manager = match &*self.registration.lock().await {
            Registration::Running { manager, .. } => Arc::clone(manager),
            _ => return Vec::new(),
        };
        manager.owned_partitions().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryCheckpointStore, InMemoryLeaseStore};
    use std::time::Duration;

    fn host(
        name: &str,
        partition_ids: &[&str],
        options: HostOptions,
    ) -> Result<EventProcessorHost> {
        EventProcessorHost::new(
            name,
            partition_ids.iter().map(|id| id.to_string()).collect(),
            Arc::new(InMemoryLeaseStore::new()),
            Arc::new(InMemoryCheckpointStore::new()),
            options,
        )
    }

    #[test]
    fn test_rejects_invalid_arguments() {
        let options = HostOptions::default();
        assert!(matches!(
            host("", &["0"], options.clone()),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            host("a", &[], options.clone()),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            host("a", &["0", ""], options.clone()),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            host("a", &["0", "0"], options.clone()),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            host(
                "a",
                &["0"],
                options.with_lease_renew_interval(Duration::from_secs(60))
            ),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_host_names_are_unique() {
        let a = EventProcessorHost::create_host_name("host");
        let b = EventProcessorHost::create_host_name("host");
        assert!(a.starts_with("host-"));
        assert_ne!(a, b);
    }

    #[tokio::test(start_paused = true)]
    async fn test_registration_lifecycle() {
        let host = host("a", &["0", "1"], HostOptions::default()).unwrap();
        assert!(host.owned_partitions().await.is_empty());

        host.register_pump_factory(Arc::new(DummyPumpFactory))
            .await
            .unwrap();
        assert!(matches!(
            host.register_pump_factory(Arc::new(DummyPumpFactory)).await,
            Err(Error::InvalidOperation(_))
        ));

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(host.owned_partitions().await, vec!["0", "1"]);

        host.unregister().await.unwrap();
        assert!(host.owned_partitions().await.is_empty());
        assert!(matches!(
            host.register_pump_factory(Arc::new(DummyPumpFactory)).await,
            Err(Error::InvalidOperation(_))
        ));
        host.unregister().await.unwrap();
    }
}
