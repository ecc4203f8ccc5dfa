//! Partition contract for tsmem.

use crate::{DataPoint, Result, Row};
use std::fmt;
use std::sync::Arc;

/// Lifecycle phase of a partition.
///
/// Phases only ever move forward: Writable -> ReadOnly -> Persisted.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PartitionPhase {
    /// Accepts inserts.
    Writable = 0,
    /// Time span exceeded the partition duration; inserts are rejected.
    ReadOnly = 1,
    /// Handed off to the persistence backend.
    Persisted = 2,
}

impl PartitionPhase {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => PartitionPhase::Writable,
            1 => PartitionPhase::ReadOnly,
            _ => PartitionPhase::Persisted,
        }
    }
}

impl fmt::Display for PartitionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PartitionPhase::Writable => "writable",
            PartitionPhase::ReadOnly => "read-only",
            PartitionPhase::Persisted => "persisted",
        };
        f.write_str(name)
    }
}

/// A partition is a chunk of time-series data with a bounded timestamp range.
///
/// Partitions act as fully independent stores containing all data points
/// for their time range. Reads keep being served in every phase.
pub trait Partition: Send + Sync {
    /// Inserts a non-empty batch of rows.
    fn insert_rows(&self, rows: &[Row]) -> Result<()>;

    /// Inserts rows replayed from the write-ahead log.
    /// Default behavior matches normal inserts; partitions can override to skip WAL appends.
    fn insert_rows_recovery(&self, rows: &[Row]) -> Result<()> {
        self.insert_rows(rows)
    }

    /// Selects data points for a metric with `start <= timestamp < end`.
    /// Unknown metrics yield an empty result.
    fn select_rows(&self, metric: &str, start: i64, end: i64) -> Vec<DataPoint>;

    /// Returns every stored row. Order across metrics is unspecified.
    fn select_all(&self) -> Vec<Row>;

    /// Returns true once the partition no longer accepts inserts.
    fn read_only(&self) -> bool;

    /// Returns true once the partition may be handed off for persistence.
    fn ready_to_be_persisted(&self) -> bool;

    /// Returns the minimum timestamp in the partition (0 while unset).
    ///
    /// 0 doubles as the unset sentinel, so a batch containing timestamp 0
    /// leaves the minimum unset. A later batch can then raise it, after which
    /// it no longer bounds the stored 0 point.
    fn min_timestamp(&self) -> i64;

    /// Returns the maximum timestamp in the partition (0 while unset).
    fn max_timestamp(&self) -> i64;

    /// Returns the number of data points in the partition.
    fn size(&self) -> usize;
}

/// Type alias for a shared partition reference.
pub type SharedPartition = Arc<dyn Partition>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_ordering() {
        assert!(PartitionPhase::Writable < PartitionPhase::ReadOnly);
        assert!(PartitionPhase::ReadOnly < PartitionPhase::Persisted);
        for phase in [
            PartitionPhase::Writable,
            PartitionPhase::ReadOnly,
            PartitionPhase::Persisted,
        ] {
            assert_eq!(PartitionPhase::from_u8(phase as u8), phase);
        }
        assert_eq!(PartitionPhase::ReadOnly.to_string(), "read-only");
    }
}
