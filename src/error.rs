use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the host, its managers and the stores behind them.
///
/// Losing a race for a lease is not an error: those operations report `false`
/// or `None` instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A construction or registration argument was rejected.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The API was used in a state that does not allow the call.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// The backing store has not been created (or was deleted).
    #[error("store '{0}' does not exist")]
    StoreNotFound(String),

    /// The backing store could not be reached. Retried on the next cycle.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// This host no longer holds the lease for the partition.
    #[error("lease for partition {partition_id} was lost")]
    LeaseLost { partition_id: String },

    /// The transport closed the receiver because a newer epoch took over.
    #[error("receiver for partition {partition_id} was disconnected: {reason}")]
    ReceiverDisconnected {
        partition_id: String,
        reason: String,
    },

    #[error("transport error: {0}")]
    Transport(String),

    /// An event processor callback failed.
    #[error("event processor error: {0}")]
    Processor(String),

    #[error("operation timed out: {0}")]
    Timeout(String),
}

impl Error {
    pub(crate) fn lease_lost(partition_id: &str) -> Self {
        Error::LeaseLost {
            partition_id: partition_id.to_string(),
        }
    }

    /// Whether retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::StoreUnavailable(_) | Error::Transport(_) | Error::Timeout(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::StoreUnavailable("down".into()).is_retryable());
        assert!(Error::Timeout("get lease".into()).is_retryable());
        assert!(!Error::InvalidArgument("host name".into()).is_retryable());
        assert!(!Error::lease_lost("3").is_retryable());
    }

    #[test]
    fn test_lease_lost_display_names_partition() {
        assert_eq!(
            Error::lease_lost("7").to_string(),
            "lease for partition 7 was lost"
        );
    }
}
