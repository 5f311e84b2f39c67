use tokio::time::Instant;

pub(crate) mod manager;
pub(crate) mod renewer;
pub(crate) mod store;
pub(crate) mod taker;

pub use manager::LeaseManager;
pub use store::LeaseStore;

/// Ownership record for one partition.
///
/// A `Lease` is always an owned copy of what a store holds. Owner and expiration only change
/// through [`LeaseManager`] operations, which write them back to the store explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    partition_id: String,
    owner: String,
    epoch: i64,
    token: String,
    expiration_time: Option<Instant>,
}

impl Lease {
    pub fn new(partition_id: impl Into<String>) -> Self {
        Self {
            partition_id: partition_id.into(),
            owner: String::new(),
            epoch: 0,
            token: String::new(),
            expiration_time: None,
        }
    }

    /// Rebuilds a lease from a store record. Intended for [`LeaseStore`] implementations.
    pub fn from_parts(
        partition_id: impl Into<String>,
        owner: impl Into<String>,
        epoch: i64,
        token: impl Into<String>,
        expiration_time: Option<Instant>,
    ) -> Self {
        Self {
            partition_id: partition_id.into(),
            owner: owner.into(),
            epoch,
            token: token.into(),
            expiration_time,
        }
    }

    pub fn partition_id(&self) -> &str {
        &self.partition_id
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn epoch(&self) -> i64 {
        self.epoch
    }

    pub fn set_epoch(&mut self, epoch: i64) {
        self.epoch = epoch;
    }

    /// Store-specific concurrency token. Opaque outside the store that issued it.
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn set_token(&mut self, token: impl Into<String>) {
        self.token = token.into();
    }

    pub fn expiration_time(&self) -> Option<Instant> {
        self.expiration_time
    }

    pub fn is_owned(&self) -> bool {
        !self.owner.is_empty()
    }

    pub fn is_owned_by(&self, host_name: &str) -> bool {
        self.is_owned() && self.owner == host_name
    }

    pub fn is_expired(&self) -> bool {
        match self.expiration_time {
            Some(expiration_time) => Instant::now() >= expiration_time,
            None => true,
        }
    }

    pub(crate) fn set_owner(&mut self, owner: impl Into<String>) {
        self.owner = owner.into();
    }

    pub(crate) fn set_expiration_time(&mut self, expiration_time: Option<Instant>) {
        self.expiration_time = expiration_time;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_new_lease_is_unowned_and_expired() {
        let lease = Lease::new("0");
        assert_eq!(lease.partition_id(), "0");
        assert!(!lease.is_owned());
        assert!(!lease.is_owned_by(""));
        assert_eq!(lease.epoch(), 0);
        assert!(lease.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_follows_clock() {
        let lease = Lease::from_parts(
            "1",
            "host-a",
            3,
            "t",
            Some(Instant::now() + Duration::from_secs(30)),
        );
        assert!(lease.is_owned_by("host-a"));
        assert!(!lease.is_expired());

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(lease.is_expired());
    }
}
