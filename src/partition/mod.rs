use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use tracing::{debug, error, info, warn};

use crate::{
    error::Result,
    interface::processor::CloseReason,
    lease::{
        taker::{LeaseTaker, TakeAction},
        Lease,
    },
    pump::{Pump, PumpFactory},
    util::{
        retry::retry_with_fixed_delay,
        runnable::{run_with_fixed_delay, PeriodicRunnable},
        ShutdownSignal,
    },
    HostContext,
};

/// Drives this host's share of the partitions: sets up the stores, then scans the leases on a
/// fixed delay until shutdown, starting and stopping pumps as ownership changes.
pub(crate) struct PartitionManager {
    host: Arc<HostContext>,
    pump: Pump,
    shutdown: ShutdownSignal,
}

impl PartitionManager {
    pub(crate) fn new(
        host: Arc<HostContext>,
        factory: Arc<dyn PumpFactory>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            pump: Pump::new(Arc::clone(&host), factory),
            host,
            shutdown,
        }
    }

    pub(crate) async fn run(self: Arc<Self>) -> Result<()> {
        if let Err(e) = self.initialize_stores().await {
            error!(host = %self.host.host_name, error = %e, "Failed to initialize stores");
            return Err(e);
        }
        info!(
            host = %self.host.host_name,
            partitions = self.host.partition_ids.len(),
            "Stores initialized, starting partition scans"
        );

        let interval = self.host.options.scan_interval();
        let shutdown = self.shutdown.clone();
        run_with_fixed_delay(self, interval, shutdown).await;
        Ok(())
    }

    pub(crate) async fn owned_partitions(&self) -> Vec<String> {
        self.pump.active_partitions().await
    }

    /// For when the scan loop cannot finish shutting down on its own: tells every pump to close
    /// and release its lease without waiting for any of them.
    pub(crate) async fn close_pumps_now(&self) {
        self.pump.request_close_all(CloseReason::Shutdown).await;
    }

    async fn initialize_stores(&self) -> Result<()> {
        let attempts = self.host.options.store_retry_attempts;
        let delay = self.host.options.store_retry_delay;
        let leases = &self.host.lease_manager;
        let checkpoints = &self.host.checkpoint_manager;

        retry_with_fixed_delay("create lease store", attempts, delay, move || {
            leases.create_lease_store_if_not_exists()
        })
        .await?;
        retry_with_fixed_delay("create checkpoint store", attempts, delay, move || {
            checkpoints.create_checkpoint_store_if_not_exists()
        })
        .await?;

        try_join_all(self.host.partition_ids.iter().map(|partition_id| async move {
            retry_with_fixed_delay("create lease", attempts, delay, move || {
                leases.create_lease_if_not_exists(partition_id)
            })
            .await?;
            retry_with_fixed_delay("create checkpoint", attempts, delay, move || {
                checkpoints.create_checkpoint_if_not_exists(partition_id)
            })
            .await
        }))
        .await?;
        Ok(())
    }

    /// One pass over every lease: keep what we hold, then take at most one more.
    async fn scan(&self) -> Result<()> {
        let leases = self
            .host
            .lease_manager
            .get_all_leases(&self.host.partition_ids)
            .await?;
        let total = leases.len();
        let taker = LeaseTaker::new(self.host.host_name.as_str(), leases);

        let mut owned = 0;
        for lease in taker.owned_leases() {
            if self.keep_lease(lease.clone()).await {
                owned += 1;
            }
        }

        let action = {
            let mut rng = rand::thread_rng();
            taker.next_action(total, owned, &mut rng)
        };
        debug!(
            host = %self.host.host_name,
            total,
            owned,
            hosts = taker.host_count(),
            ?action,
            "Scanned leases"
        );

        match action {
            TakeAction::Acquire(mut lease) => {
                if self.host.lease_manager.acquire_lease(&mut lease).await? {
                    self.pump.add_pump(lease).await;
                }
            }
            TakeAction::Steal(mut lease) => {
                if self.host.lease_manager.steal_lease(&mut lease).await? {
                    self.pump.add_pump(lease).await;
                }
            }
            TakeAction::Idle => {}
        }

        self.pump.purge_closed().await;
        Ok(())
    }

    /// Renews a lease recorded as ours, through its pump if one is running. A lease without a
    /// running pump gets a new one.
    async fn keep_lease(&self, mut lease: Lease) -> bool {
        if let Some(pump) = self.pump.active_pump(lease.partition_id()).await {
            return pump.renew_lease().await;
        }

        match self.host.lease_manager.renew_lease(&mut lease).await {
            Ok(true) => {
                self.pump.add_pump(lease).await;
                true
            }
            Ok(false) => false,
            Err(e) => {
                warn!(
                    host = %self.host.host_name,
                    partition_id = %lease.partition_id(),
                    error = %e,
                    "Failed to renew lease during scan"
                );
                false
            }
        }
    }
}

#[async_trait]
impl PeriodicRunnable for PartitionManager {
    async fn run_once(&self) {
        if let Err(e) = self.scan().await {
            warn!(host = %self.host.host_name, error = %e, "Partition scan failed");
        }
    }

    async fn before_shutdown_complete(&self) {
        info!(host = %self.host.host_name, "Closing all partition pumps");
        self.pump.remove_all_pumps(CloseReason::Shutdown).await;
    }
}
