use std::time::Duration;

use async_trait::async_trait;
use tokio::{sync::watch, time::Instant};

pub(crate) mod retry;
pub(crate) mod runnable;

#[async_trait]
pub(crate) trait RunAtFixedInterval: Send + Sync {
    fn should_shutdown(&self) -> bool;
    async fn await_shutdown_signal(&self);
    async fn before_shutdown_complete(&self) {}

    /// Executes the logic that will occur at a fixed interval
    async fn run_once(&self);

    fn get_interval(&self) -> Duration;

    async fn run(&self) {
        let mut last_loop_time = Instant::now();
        while !self.should_shutdown() {
            self.run_once().await;

            let next_loop_time = last_loop_time + self.get_interval();
            if Instant::now() < next_loop_time && !self.should_shutdown() {
                tokio::select! {
                    _ = self.await_shutdown_signal() => {}
                    _ = tokio::time::sleep_until(next_loop_time) => {}
                }
            }
            last_loop_time = Instant::now();
        }

        self.before_shutdown_complete().await;
    }
}

/// Creates a one-shot shutdown signal. Every clone of the receiving half observes the trigger,
/// including clones taken after it fired.
pub(crate) fn shutdown_channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, ShutdownSignal { rx })
}

pub(crate) struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub(crate) fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

#[derive(Clone)]
pub(crate) struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub(crate) fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    pub(crate) async fn triggered(&self) {
        let mut rx = self.rx.clone();
        // A dropped trigger can never fire, so treat it as a shutdown.
        let _ = rx.wait_for(|triggered| *triggered).await;
    }
}
