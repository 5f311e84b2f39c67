use std::{collections::HashMap, sync::Arc, time::Duration};

use futures::future::join_all;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::{
    error::Result,
    interface::{context::PartitionContext, processor::CloseReason},
    lease::{renewer::LeaseRenewer, Lease},
    util::RunAtFixedInterval,
    HostContext,
};

pub mod driver;

pub use driver::{DummyPumpFactory, ProcessorPumpFactory, PumpDriver, PumpFactory};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PumpStatus {
    Created,
    Opening,
    Running,
    Closing,
    Closed,
}

#[derive(Clone)]
pub struct ClosingSignal {
    rx: watch::Receiver<Option<CloseReason>>,
}

impl ClosingSignal {
    pub fn reason(&self) -> Option<CloseReason> {
        *self.rx.borrow()
    }

    pub fn is_closing(&self) -> bool {
        self.reason().is_some()
    }

    pub async fn closing(&self) -> CloseReason {
        let mut rx = self.rx.clone();
        let reason = match rx.wait_for(Option::is_some).await {
            Ok(reason) => *reason,
            Err(_) => None,
        };
        reason.unwrap_or(CloseReason::Shutdown)
    }
}

/// Lifecycle of one owned partition: `Created -> Opening -> Running -> Closing -> Closed`.
///
/// A pump is never reopened. When this host takes a partition again it gets a new pump.
pub struct PartitionPump {
    context: Arc<PartitionContext>,
    driver: Box<dyn PumpDriver>,
    factory: Arc<dyn PumpFactory>,
    renew_interval: Duration,
    status: watch::Sender<PumpStatus>,
    close_reason: watch::Sender<Option<CloseReason>>,
}

impl PartitionPump {
    pub(crate) fn new(host: Arc<HostContext>, factory: Arc<dyn PumpFactory>, lease: Lease) -> Self {
        let renew_interval = host.lease_manager.lease_renew_interval();
        let driver = factory.create_driver(lease.partition_id());
        Self {
            context: Arc::new(PartitionContext::new(host, lease)),
            driver,
            factory,
            renew_interval,
            status: watch::channel(PumpStatus::Created).0,
            close_reason: watch::channel(None).0,
        }
    }

    pub fn partition_id(&self) -> &str {
        self.context.partition_id()
    }

    pub fn context(&self) -> &Arc<PartitionContext> {
        &self.context
    }

    pub fn status(&self) -> PumpStatus {
        *self.status.borrow()
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self.status(),
            PumpStatus::Created | PumpStatus::Opening | PumpStatus::Running
        )
            && self.close_reason.borrow().is_none()
    }

    pub fn closing_signal(&self) -> ClosingSignal {
        ClosingSignal {
            rx: self.close_reason.subscribe(),
        }
    }

    /// The first reason given wins.
    pub fn request_close(&self, reason: CloseReason) {
        let requested = self.close_reason.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        });
        if requested {
            debug!(partition_id = %self.partition_id(), ?reason, "Pump close requested");
        }
    }

    pub async fn close(&self, reason: CloseReason) {
        self.request_close(reason);
        self.wait_closed().await;
    }

    pub async fn wait_closed(&self) {
        let mut status = self.status.subscribe();
        let _ = status
            .wait_for(|status| *status == PumpStatus::Closed)
            .await;
    }

    /// Renews the lease. Returns `false`, and starts closing the pump, once the lease is gone.
    /// A store failure is not a loss: the lease is retried on the next tick.
    pub(crate) async fn renew_lease(&self) -> bool {
        match self.context.renew_lease().await {
            Ok(true) => true,
            Ok(false) => {
                info!(
                    host = %self.context.owner(),
                    partition_id = %self.partition_id(),
                    "Lease lost, closing partition pump"
                );
                self.request_close(CloseReason::LeaseLost);
                false
            }
            Err(e) => {
                warn!(
                    partition_id = %self.partition_id(),
                    error = %e,
                    "Failed to renew lease, will retry"
                );
                true
            }
        }
    }

    pub(crate) fn renew_interval(&self) -> Duration {
        self.renew_interval
    }

    pub(crate) fn start(self: &Arc<Self>) {
        let pump = Arc::clone(self);
        tokio::spawn(async move { pump.run().await });
    }

    async fn run(self: Arc<Self>) {
        self.status.send_replace(PumpStatus::Opening);

        let renewer = match self.driver.open(&self.context).await {
            Ok(()) => {
                let renewer = LeaseRenewer::new(Arc::clone(&self));
                let handle = tokio::spawn(async move { renewer.run().await });
                self.status.send_replace(PumpStatus::Running);
                info!(
                    host = %self.context.owner(),
                    partition_id = %self.partition_id(),
                    "Partition pump running"
                );

                if let Some(reason) = self.driver.run(&self.context, self.closing_signal()).await {
                    self.request_close(reason);
                }
                Some(handle)
            }
            Err(e) => {
                warn!(
                    partition_id = %self.partition_id(),
                    error = %e,
                    "Failed to open partition pump"
                );
                self.request_close(CloseReason::Shutdown);
                None
            }
        };

        self.status.send_replace(PumpStatus::Closing);
        if let Some(handle) = renewer {
            if let Err(e) = handle.await {
                warn!(partition_id = %self.partition_id(), error = %e, "Lease renewer failed");
            }
        }

        let reason = self.closing_signal().reason().unwrap_or(CloseReason::Shutdown);
        self.driver.close(&self.context, reason).await;

        match reason {
            CloseReason::Shutdown => self.release_lease().await,
            CloseReason::LeaseLost => self.factory.on_lease_lost(self.partition_id()),
        }

        self.status.send_replace(PumpStatus::Closed);
        info!(
            host = %self.context.owner(),
            partition_id = %self.partition_id(),
            ?reason,
            "Partition pump closed"
        );
    }

    async fn release_lease(&self) {
        let released: Result<bool> = self.context.release_lease().await;
        match released {
            Ok(true) => {}
            Ok(false) => debug!(
                partition_id = %self.partition_id(),
                "Lease no longer held at release"
            ),
            Err(e) => warn!(
                partition_id = %self.partition_id(),
                error = %e,
                "Failed to release lease"
            ),
        }
    }
}

pub(crate) struct Pump {
    host: Arc<HostContext>,
    factory: Arc<dyn PumpFactory>,
    pumps: Mutex<HashMap<String, Arc<PartitionPump>>>,
}

impl Pump {
    pub(crate) fn new(host: Arc<HostContext>, factory: Arc<dyn PumpFactory>) -> Self {
        Self {
            host,
            factory,
            pumps: Mutex::new(HashMap::new()),
        }
    }

    /// Starts a pump for a lease this host just took. An active pump keeps running only if the
    /// lease is the same generation it was opened with; otherwise the partition changed hands in
    /// between and the old pump is closed as lost.
    pub(crate) async fn add_pump(&self, lease: Lease) {
        let partition_id = lease.partition_id().to_string();
        let existing = self.pumps.lock().await.get(&partition_id).cloned();

        if let Some(existing) = existing {
            if existing.is_active() {
                let epoch = existing.context().lease().await.epoch();
                if epoch == lease.epoch() {
                    existing.context().replace_lease(lease).await;
                    return;
                }
                info!(
                    partition_id = %partition_id,
                    old_epoch = epoch,
                    new_epoch = lease.epoch(),
                    "Partition changed hands since its pump opened, replacing the pump"
                );
                existing.request_close(CloseReason::LeaseLost);
            }
            existing.wait_closed().await;
        }

        let pump = Arc::new(PartitionPump::new(
            Arc::clone(&self.host),
            Arc::clone(&self.factory),
            lease,
        ));
        pump.start();
        self.pumps.lock().await.insert(partition_id, pump);
    }

    pub(crate) async fn active_pump(&self, partition_id: &str) -> Option<Arc<PartitionPump>> {
        self.pumps
            .lock()
            .await
            .get(partition_id)
            .filter(|pump| pump.is_active())
            .cloned()
    }

    pub(crate) async fn active_partitions(&self) -> Vec<String> {
        let mut partitions: Vec<String> = self
            .pumps
            .lock()
            .await
            .values()
            .filter(|pump| pump.is_active())
            .map(|pump| pump.partition_id().to_string())
            .collect();
        partitions.sort();
        partitions
    }

    pub(crate) async fn purge_closed(&self) {
        self.pumps
            .lock()
            .await
            .retain(|_, pump| pump.status() != PumpStatus::Closed);
    }

    /// Asks every pump to close without waiting. Their renewal timers stop right away.
    pub(crate) async fn request_close_all(&self, reason: CloseReason) {
        for pump in self.pumps.lock().await.values() {
            pump.request_close(reason);
        }
    }

    pub(crate) async fn remove_all_pumps(&self, reason: CloseReason) {
        let pumps: Vec<Arc<PartitionPump>> = self
            .pumps
            .lock()
            .await
            .drain()
            .map(|(_, pump)| pump)
            .collect();
        join_all(pumps.iter().map(|pump| pump.close(reason))).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        checkpoint::CheckpointManager,
        config::HostOptions,
        lease::LeaseManager,
        memory::{InMemoryCheckpointStore, InMemoryLeaseStore},
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingFactory {
        lost: AtomicUsize,
    }

    impl PumpFactory for CountingFactory {
        fn create_driver(&self, partition_id: &str) -> Box<dyn PumpDriver> {
            DummyPumpFactory.create_driver(partition_id)
        }

        fn on_lease_lost(&self, _partition_id: &str) {
            self.lost.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn host(name: &str, store: Arc<InMemoryLeaseStore>) -> Arc<HostContext> {
        let options = HostOptions::default();
        let checkpoints = Arc::new(InMemoryCheckpointStore::new());
        let host = HostContext {
            host_name: name.to_string(),
            partition_ids: vec!["0".to_string()],
            lease_manager: LeaseManager::new(
                name,
                store,
                options.lease_duration,
                options.lease_renew_interval,
            ),
            checkpoint_manager: CheckpointManager::new(checkpoints),
            options,
        };
        host.lease_manager
            .create_lease_store_if_not_exists()
            .await
            .unwrap();
        host.checkpoint_manager
            .create_checkpoint_store_if_not_exists()
            .await
            .unwrap();
        host.lease_manager.create_lease_if_not_exists("0").await.unwrap();
        Arc::new(host)
    }

    async fn acquired(host: &HostContext) -> Lease {
        let mut lease = host.lease_manager.get_lease("0").await.unwrap().unwrap();
        assert!(host.lease_manager.acquire_lease(&mut lease).await.unwrap());
        lease
    }

    async fn wait_for_status(pump: &PartitionPump, status: PumpStatus) {
        let mut rx = pump.status.subscribe();
        rx.wait_for(|current| *current == status).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_releases_lease() {
        let store = Arc::new(InMemoryLeaseStore::new());
        let host = host("a", store).await;
        let factory = Arc::new(CountingFactory::default());
        let pump = Pump::new(Arc::clone(&host), factory.clone());

        pump.add_pump(acquired(&host).await).await;
        let partition = pump.active_pump("0").await.unwrap();
        wait_for_status(&partition, PumpStatus::Running).await;
        assert_eq!(pump.active_partitions().await, vec!["0".to_string()]);

        pump.remove_all_pumps(CloseReason::Shutdown).await;
        assert_eq!(partition.status(), PumpStatus::Closed);
        assert!(!host.lease_manager.get_lease("0").await.unwrap().unwrap().is_owned());
        assert_eq!(factory.lost.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_renewal_failure_closes_pump_as_lease_lost() {
        let store = Arc::new(InMemoryLeaseStore::new());
        let host_a = host("a", store.clone()).await;
        let host_b = host("b", store).await;
        let factory = Arc::new(CountingFactory::default());
        let pump = Pump::new(Arc::clone(&host_a), factory.clone());

        pump.add_pump(acquired(&host_a).await).await;
        let partition = pump.active_pump("0").await.unwrap();
        wait_for_status(&partition, PumpStatus::Running).await;

        let mut snapshot = host_b.lease_manager.get_lease("0").await.unwrap().unwrap();
        assert!(host_b.lease_manager.steal_lease(&mut snapshot).await.unwrap());

        // The next renewal tick notices the steal.
        partition.wait_closed().await;
        assert_eq!(partition.closing_signal().reason(), Some(CloseReason::LeaseLost));
        assert_eq!(factory.lost.load(Ordering::SeqCst), 1);
        assert!(pump.active_pump("0").await.is_none());

        // The new owner keeps the lease; a lost pump does not release it.
        let lease = host_b.lease_manager.get_lease("0").await.unwrap().unwrap();
        assert!(lease.is_owned_by("b"));

        pump.purge_closed().await;
        assert!(pump.active_partitions().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reacquired_partition_gets_new_pump() {
        let store = Arc::new(InMemoryLeaseStore::new());
        let host = host("a", store).await;
        let pump = Pump::new(Arc::clone(&host), Arc::new(DummyPumpFactory));

        pump.add_pump(acquired(&host).await).await;
        let first = pump.active_pump("0").await.unwrap();
        wait_for_status(&first, PumpStatus::Running).await;
        first.close(CloseReason::Shutdown).await;

        pump.add_pump(acquired(&host).await).await;
        let second = pump.active_pump("0").await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(first.status(), PumpStatus::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_adding_owned_partition_keeps_active_pump() {
        let store = Arc::new(InMemoryLeaseStore::new());
        let host = host("a", store).await;
        let pump = Pump::new(Arc::clone(&host), Arc::new(DummyPumpFactory));

        let lease = acquired(&host).await;
        pump.add_pump(lease.clone()).await;
        let first = pump.active_pump("0").await.unwrap();
        wait_for_status(&first, PumpStatus::Running).await;

        pump.add_pump(acquired(&host).await).await;
        let second = pump.active_pump("0").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test(start_paused = true)]
    async fn test_partition_that_changed_hands_gets_new_pump() {
        let store = Arc::new(InMemoryLeaseStore::new());
        let host_a = host("a", store.clone()).await;
        let host_b = host("b", store).await;
        let factory = Arc::new(CountingFactory::default());
        let pump = Pump::new(Arc::clone(&host_a), factory.clone());

        pump.add_pump(acquired(&host_a).await).await;
        let first = pump.active_pump("0").await.unwrap();
        wait_for_status(&first, PumpStatus::Running).await;

        let mut snapshot = host_b.lease_manager.get_lease("0").await.unwrap().unwrap();
        assert!(host_b.lease_manager.steal_lease(&mut snapshot).await.unwrap());
        assert!(host_b.lease_manager.release_lease(&mut snapshot).await.unwrap());

        // Still active: no renewal has run since the steal.
        assert!(first.is_active());
        pump.add_pump(acquired(&host_a).await).await;

        let second = pump.active_pump("0").await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(first.status(), PumpStatus::Closed);
        assert_eq!(first.closing_signal().reason(), Some(CloseReason::LeaseLost));
        assert_eq!(factory.lost.load(Ordering::SeqCst), 1);
        assert!(host_a.lease_manager.get_lease("0").await.unwrap().unwrap().is_owned_by("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_close_all_stops_pumps_without_waiting() {
        let store = Arc::new(InMemoryLeaseStore::new());
        let host = host("a", store).await;
        let pump = Pump::new(Arc::clone(&host), Arc::new(DummyPumpFactory));

        pump.add_pump(acquired(&host).await).await;
        let partition = pump.active_pump("0").await.unwrap();
        wait_for_status(&partition, PumpStatus::Running).await;

        pump.request_close_all(CloseReason::Shutdown).await;
        assert!(!partition.is_active());
        partition.wait_closed().await;
        assert!(!host.lease_manager.get_lease("0").await.unwrap().unwrap().is_owned());
    }

    #[tokio::test]
    async fn test_first_close_reason_wins() {
        let store = Arc::new(InMemoryLeaseStore::new());
        let host = host("a", store).await;
        let pump = PartitionPump::new(host, Arc::new(DummyPumpFactory), Lease::new("0"));
        assert_eq!(pump.status(), PumpStatus::Created);

        pump.request_close(CloseReason::LeaseLost);
        pump.request_close(CloseReason::Shutdown);
        assert_eq!(pump.closing_signal().reason(), Some(CloseReason::LeaseLost));
        assert!(!pump.is_active());
    }
}
