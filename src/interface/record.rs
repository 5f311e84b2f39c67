use bytes::Bytes;

use crate::checkpoint::Checkpoint;

/// One event read from a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventData {
    pub body: Bytes,
    pub offset: String,
    pub sequence_number: i64,
    pub partition_key: Option<String>,
}

impl EventData {
    pub fn new(body: impl Into<Bytes>, offset: impl Into<String>, sequence_number: i64) -> Self {
        Self {
            body: body.into(),
            offset: offset.into(),
            sequence_number,
            partition_key: None,
        }
    }

    pub fn with_partition_key(mut self, partition_key: impl Into<String>) -> Self {
        self.partition_key = Some(partition_key.into());
        self
    }
}

/// Where a receiver starts reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPosition {
    StartOfStream,
    EndOfStream,
    Offset { offset: String, inclusive: bool },
    SequenceNumber(i64),
}

impl EventPosition {
    /// Resumes right after the checkpointed event.
    pub fn from_checkpoint(checkpoint: &Checkpoint) -> Self {
        match checkpoint.offset() {
            Some(offset) => EventPosition::Offset {
                offset: offset.to_string(),
                inclusive: false,
            },
            None => EventPosition::SequenceNumber(checkpoint.sequence_number()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_from_checkpoint_prefers_offset() {
        let checkpoint = Checkpoint::new("0", Some("512".to_string()), 9);
        assert_eq!(
            EventPosition::from_checkpoint(&checkpoint),
            EventPosition::Offset {
                offset: "512".to_string(),
                inclusive: false
            }
        );

        let checkpoint = Checkpoint::new("0", None, 9);
        assert_eq!(
            EventPosition::from_checkpoint(&checkpoint),
            EventPosition::SequenceNumber(9)
        );
    }
}
