//! Offset Tracker - Tracks the next committable offset per partition
//!
//! A partition worker marks `offset + 1` only after every emission of that
//! record has been dispatched, so committing what this tracker reports never
//! skips over a record whose results were lost. It also remembers what was
//! last committed so idle partitions are not committed over and over.

use std::collections::HashMap;

use dashmap::DashMap;
use tracing::{debug, warn};

/// State tracked per partition
#[derive(Debug, Clone, Copy)]
struct PartitionState {
    /// The next offset to consume (highest processed + 1)
    processed_offset: i64,
    /// The last offset handed to a successful commit
    committed_offset: Option<i64>,
}

/// Thread-safe tracker for processed offsets per partition.
#[derive(Debug, Default)]
pub struct OffsetTracker {
    partition_state: DashMap<i32, PartitionState>,
}

impl OffsetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a record as processed. `next_offset` is the record's offset + 1.
    /// The tracked offset only ever advances.
    pub fn mark_processed(&self, partition: i32, next_offset: i64) {
        self.partition_state
            .entry(partition)
            .and_modify(|state| {
                if next_offset > state.processed_offset {
                    state.processed_offset = next_offset;
                } else {
                    warn!(
                        partition = partition,
                        current_offset = state.processed_offset,
                        offset = next_offset,
                        "Ignoring offset that does not advance the partition"
                    );
                }
            })
            .or_insert_with(|| {
                debug!(
                    partition = partition,
                    offset = next_offset,
                    "Initializing partition offset"
                );
                PartitionState {
                    processed_offset: next_offset,
                    committed_offset: None,
                }
            });
    }

    /// Offsets that advanced since the last successful commit.
    pub fn get_committable_offsets(&self) -> HashMap<i32, i64> {
        self.partition_state
            .iter()
            .filter(|entry| entry.committed_offset != Some(entry.processed_offset))
            .map(|entry| (*entry.key(), entry.processed_offset))
            .collect()
    }

    /// Every tracked offset, committed or not.
    pub fn get_all_offsets(&self) -> HashMap<i32, i64> {
        self.partition_state
            .iter()
            .map(|entry| (*entry.key(), entry.processed_offset))
            .collect()
    }

    /// Record that `offsets` were committed.
    pub fn mark_committed(&self, offsets: &HashMap<i32, i64>) {
        for (partition, offset) in offsets {
            if let Some(mut state) = self.partition_state.get_mut(partition) {
                state.committed_offset = Some(*offset);
            }
        }
    }

    /// Get the next offset to consume for a specific partition
    pub fn get_partition_offset(&self, partition: i32) -> Option<i64> {
        self.partition_state
            .get(&partition)
            .map(|r| r.value().processed_offset)
    }
}
