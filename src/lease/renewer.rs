use async_trait::async_trait;
use std::{sync::Arc, time::Duration};

use crate::{pump::PartitionPump, util::RunAtFixedInterval};

/// Keeps one pump's lease alive for as long as the pump runs. Stops as soon as the pump starts
/// closing, including when a renewal finds the lease gone.
pub(crate) struct LeaseRenewer {
    pump: Arc<PartitionPump>,
}

impl LeaseRenewer {
    pub(crate) fn new(pump: Arc<PartitionPump>) -> Self {
        Self { pump }
    }
}

#[async_trait]
impl RunAtFixedInterval for LeaseRenewer {
    fn should_shutdown(&self) -> bool {
        self.pump.closing_signal().is_closing()
    }

    async fn await_shutdown_signal(&self) {
        self.pump.closing_signal().closing().await;
    }

    async fn run_once(&self) {
        self.pump.renew_lease().await;
    }

    fn get_interval(&self) -> Duration {
        self.pump.renew_interval()
    }
}
