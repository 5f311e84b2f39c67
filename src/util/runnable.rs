use std::{sync::Arc, time::Duration};

use async_trait::async_trait;

use super::ShutdownSignal;

/// Runs `runnable` forever with `delay` between the end of one run and the start of the next.
///
/// A run in progress is allowed to finish when shutdown is signalled, so store operations it
/// started settle before `before_shutdown_complete` runs.
pub(crate) async fn run_with_fixed_delay<T: PeriodicRunnable + ?Sized>(
    runnable: Arc<T>,
    delay: Duration,
    shutdown: ShutdownSignal,
) {
    while !shutdown.is_triggered() {
        runnable.run_once().await;

        tokio::select! {
            _ = shutdown.triggered() => {}
            _ = tokio::time::sleep(delay) => {}
        }
    }

    runnable.before_shutdown_complete().await;
}

#[async_trait]
pub(crate) trait PeriodicRunnable: Send + Sync {
    async fn run_once(&self);
    async fn before_shutdown_complete(&self) {}
}
