use std::time::Duration;

use crate::{
    error::{Error, Result},
    interface::record::EventPosition,
};

pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(30);
pub const DEFAULT_LEASE_RENEW_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_BATCH_SIZE: usize = 10;
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_STORE_RETRY_ATTEMPTS: usize = 5;
pub const DEFAULT_STORE_RETRY_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Tuning for one [`crate::EventProcessorHost`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostOptions {
    /// How long an acquired or renewed lease stays valid.
    pub lease_duration: Duration,

    /// How often a partition pump renews its lease. Must be shorter than `lease_duration`.
    pub lease_renew_interval: Duration,

    /// Delay between partition scans. Defaults to `lease_renew_interval`.
    pub scan_interval: Option<Duration>,

    pub max_batch_size: usize,
    pub receive_timeout: Duration,

    /// Deliver an empty batch to the processor when a receive times out.
    pub invoke_processor_after_receive_timeout: bool,

    /// Where to start reading a partition that has no checkpoint.
    pub initial_position: EventPosition,

    /// Attempts per store initialization step before the host gives up.
    pub store_retry_attempts: usize,
    pub store_retry_delay: Duration,

    /// Upper bound on how long unregistering waits for pumps and the scan loop.
    pub shutdown_timeout: Duration,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            lease_duration: DEFAULT_LEASE_DURATION,
            lease_renew_interval: DEFAULT_LEASE_RENEW_INTERVAL,
            scan_interval: None,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
            invoke_processor_after_receive_timeout: false,
            initial_position: EventPosition::StartOfStream,
            store_retry_attempts: DEFAULT_STORE_RETRY_ATTEMPTS,
            store_retry_delay: DEFAULT_STORE_RETRY_DELAY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl HostOptions {
    pub fn with_lease_duration(mut self, lease_duration: Duration) -> Self {
        self.lease_duration = lease_duration;
        self
    }

    pub fn with_lease_renew_interval(mut self, lease_renew_interval: Duration) -> Self {
        self.lease_renew_interval = lease_renew_interval;
        self
    }

    pub fn with_scan_interval(mut self, scan_interval: Duration) -> Self {
        self.scan_interval = Some(scan_interval);
        self
    }

    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    pub fn with_receive_timeout(mut self, receive_timeout: Duration) -> Self {
        self.receive_timeout = receive_timeout;
        self
    }

    pub fn with_invoke_processor_after_receive_timeout(mut self, invoke: bool) -> Self {
        self.invoke_processor_after_receive_timeout = invoke;
        self
    }

    pub fn with_initial_position(mut self, initial_position: EventPosition) -> Self {
        self.initial_position = initial_position;
        self
    }

    pub fn with_store_retry(mut self, attempts: usize, delay: Duration) -> Self {
        self.store_retry_attempts = attempts;
        self.store_retry_delay = delay;
        self
    }

    pub fn with_shutdown_timeout(mut self, shutdown_timeout: Duration) -> Self {
        self.shutdown_timeout = shutdown_timeout;
        self
    }

    pub fn scan_interval(&self) -> Duration {
        self.scan_interval.unwrap_or(self.lease_renew_interval)
    }

    pub fn validate(&self) -> Result<()> {
        if self.lease_duration.is_zero() {
            return Err(Error::InvalidArgument(
                "lease_duration must be greater than zero".into(),
            ));
        }
        if self.lease_renew_interval.is_zero() || self.lease_renew_interval >= self.lease_duration {
            return Err(Error::InvalidArgument(format!(
                "lease_renew_interval ({:?}) must be non-zero and below lease_duration ({:?})",
                self.lease_renew_interval, self.lease_duration
            )));
        }
        let scan_interval = self.scan_interval();
        if scan_interval.is_zero() || scan_interval >= self.lease_duration {
            return Err(Error::InvalidArgument(format!(
                "scan_interval ({:?}) must be non-zero and below lease_duration ({:?})",
                scan_interval, self.lease_duration
            )));
        }
        if self.max_batch_size == 0 {
            return Err(Error::InvalidArgument(
                "max_batch_size must be greater than zero".into(),
            ));
        }
        if self.receive_timeout.is_zero() {
            return Err(Error::InvalidArgument(
                "receive_timeout must be greater than zero".into(),
            ));
        }
        if self.store_retry_attempts == 0 {
            return Err(Error::InvalidArgument(
                "store_retry_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let options = HostOptions::default();
        assert!(options.validate().is_ok());
        assert_eq!(options.scan_interval(), DEFAULT_LEASE_RENEW_INTERVAL);
    }

    #[test]
    fn test_renew_interval_must_be_shorter_than_duration() {
        let options = HostOptions::default().with_lease_renew_interval(Duration::from_secs(30));
        assert!(matches!(options.validate(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_scan_interval_must_be_shorter_than_duration() {
        let options = HostOptions::default().with_scan_interval(Duration::from_secs(45));
        assert!(matches!(options.validate(), Err(Error::InvalidArgument(_))));

        let options = HostOptions::default().with_scan_interval(Duration::from_secs(5));
        assert!(options.validate().is_ok());
        assert_eq!(options.scan_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_rejects_zero_sizes() {
        assert!(HostOptions::default()
            .with_max_batch_size(0)
            .validate()
            .is_err());
        assert!(HostOptions::default()
            .with_store_retry(0, Duration::from_secs(1))
            .validate()
            .is_err());
        assert!(HostOptions::default()
            .with_receive_timeout(Duration::ZERO)
            .validate()
            .is_err());
    }
}
