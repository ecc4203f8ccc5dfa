//! Memory partition implementation.

use crate::config::{PartitionConfig, WalFailurePolicy};
use crate::directory::MetricDirectory;
use crate::partition::{Partition, PartitionPhase};
use crate::wal::{NopWal, Wal, WalEntry, WalReader};
use crate::{DataPoint, Result, Row, TsmemError};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU8, AtomicUsize, Ordering};
use tracing::{debug, warn};

/// A memory partition stores data points in heap memory.
///
/// `size`, `min_t` and `max_t` are independent atomics. Concurrent batches
/// may interleave so that an observer pairs the max of one batch with the min
/// of another; each field on its own only ever moves in one direction.
pub struct MemoryPartition {
    /// Number of data points
    num_points: AtomicUsize,
    /// Minimum timestamp, 0 while unset
    min_t: AtomicI64,
    /// Maximum timestamp, 0 while unset
    max_t: AtomicI64,
    metrics: MetricDirectory,
    /// Write-ahead log
    wal: Arc<dyn Wal>,
    /// Partition duration in milliseconds
    partition_duration: i64,
    wal_failure_policy: WalFailurePolicy,
    /// Latched `PartitionPhase`
    phase: AtomicU8,
    wal_failures: AtomicUsize,
}

impl MemoryPartition {
    /// Creates a new memory partition. Without a WAL, inserts are memory-only.
    ///
    /// `config` is expected to be validated; see [`crate::PartitionBuilder`].
    pub fn new(wal: Option<Arc<dyn Wal>>, config: PartitionConfig) -> Self {
        Self {
            num_points: AtomicUsize::new(0),
            min_t: AtomicI64::new(0),
            max_t: AtomicI64::new(0),
            metrics: MetricDirectory::new(),
            wal: wal.unwrap_or_else(|| Arc::new(NopWal) as Arc<dyn Wal>),
            partition_duration: i64::try_from(config.partition_duration_ms).unwrap_or(i64::MAX),
            wal_failure_policy: config.wal_failure_policy,
            phase: AtomicU8::new(PartitionPhase::Writable as u8),
            wal_failures: AtomicUsize::new(0),
        }
    }

    /// Partition duration in milliseconds.
    pub fn partition_duration(&self) -> i64 {
        self.partition_duration
    }

    pub fn wal_failure_policy(&self) -> WalFailurePolicy {
        self.wal_failure_policy
    }

    /// Number of distinct metrics held by the partition.
    pub fn metric_count(&self) -> usize {
        self.metrics.len()
    }

    /// Number of WAL appends that failed since the partition was created.
    pub fn wal_failures(&self) -> usize {
        self.wal_failures.load(Ordering::Relaxed)
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> PartitionPhase {
        match PartitionPhase::from_u8(self.phase.load(Ordering::Acquire)) {
            PartitionPhase::Writable if self.read_only() => PartitionPhase::ReadOnly,
            phase => phase,
        }
    }

    /// Records that the persistence backend took over this partition.
    ///
    /// Fails while the partition is still writable. Calling it again is a no-op.
    pub fn mark_persisted(&self) -> Result<()> {
        if !self.ready_to_be_persisted() {
            return Err(TsmemError::NotReadyToBePersisted {
                min_timestamp: self.min_timestamp(),
                max_timestamp: self.max_timestamp(),
                partition_duration: self.partition_duration,
            });
        }

        let previous = self
            .phase
            .swap(PartitionPhase::Persisted as u8, Ordering::AcqRel);
        if previous != PartitionPhase::Persisted as u8 {
            debug!(
                size = self.size(),
                metrics = self.metric_count(),
                "memory_partition_persisted"
            );
        }
        Ok(())
    }

    /// Replays every row found in the WAL directory `dir` without logging
    /// them again. Returns the number of rows applied.
    pub fn recover_from_wal(&self, dir: impl AsRef<Path>) -> Result<usize> {
        let rows = WalReader::new(dir)?.read_all()?;
        if rows.is_empty() {
            return Ok(0);
        }
        self.insert_rows_recovery(&rows)?;
        Ok(rows.len())
    }

    fn check_writable(&self, rows: &[Row]) -> Result<()> {
        if rows.is_empty() {
            return Err(TsmemError::EmptyBatch);
        }
        if self.read_only() {
            return Err(TsmemError::PartitionReadOnly {
                min_timestamp: self.min_timestamp(),
                max_timestamp: self.max_timestamp(),
                partition_duration: self.partition_duration,
            });
        }
        Ok(())
    }

    /// Applies a batch in memory. The caller has already checked it is non-empty.
    fn apply_rows(&self, rows: &[Row]) {
        let mut min_timestamp = rows[0].timestamp();
        let mut max_timestamp = rows[0].timestamp();
        let mut rows_added = 0usize;

        for row in rows {
            let timestamp = row.timestamp();
            min_timestamp = min_timestamp.min(timestamp);
            max_timestamp = max_timestamp.max(timestamp);

            self.metrics
                .get_or_create(row.metric())
                .append(DataPoint::new(timestamp, row.value()));
            rows_added += 1;
        }

        self.num_points.fetch_add(rows_added, Ordering::SeqCst);
        self.update_min_timestamp(min_timestamp);
        self.update_max_timestamp(max_timestamp);
        self.latch_read_only();
    }

    /// Freezes the partition once its span exceeds the duration. Only the
    /// insert path calls this, after both bounds are published.
    fn latch_read_only(&self) {
        let max = self.max_timestamp();
        let min = self.min_timestamp();
        if max.saturating_sub(min) <= self.partition_duration {
            return;
        }

        if self
            .phase
            .compare_exchange(
                PartitionPhase::Writable as u8,
                PartitionPhase::ReadOnly as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            debug!(
                min_timestamp = min,
                max_timestamp = max,
                partition_duration = self.partition_duration,
                "memory_partition_read_only"
            );
        }
    }

    fn update_min_timestamp(&self, timestamp: i64) {
        let mut current = self.min_t.load(Ordering::Acquire);
        loop {
            if current != 0 && current <= timestamp {
                break;
            }
            match self.min_t.compare_exchange_weak(
                current,
                timestamp,
                Ordering::SeqCst,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    fn update_max_timestamp(&self, timestamp: i64) {
        let mut current = self.max_t.load(Ordering::Acquire);
        while timestamp > current {
            match self.max_t.compare_exchange_weak(
                current,
                timestamp,
                Ordering::SeqCst,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }
}

impl Partition for MemoryPartition {
    fn insert_rows(&self, rows: &[Row]) -> Result<()> {
        self.check_writable(rows)?;

        // A failed append never stops the in-memory write; the policy only
        // decides what the caller sees.
        let wal_result = self.wal.append(&WalEntry::insert(rows));
        if let Err(ref e) = wal_result {
            self.wal_failures.fetch_add(1, Ordering::Relaxed);
            warn!(
                rows = rows.len(),
                error = %e,
                "WAL append failed; applying rows in memory only"
            );
        }

        self.apply_rows(rows);

        match (wal_result, self.wal_failure_policy) {
            (Err(e), WalFailurePolicy::Propagate) => Err(TsmemError::DurabilityLogFailure {
                source: Box::new(e),
            }),
            _ => Ok(()),
        }
    }

    fn insert_rows_recovery(&self, rows: &[Row]) -> Result<()> {
        self.check_writable(rows)?;
        self.apply_rows(rows);
        Ok(())
    }

    fn select_rows(&self, metric: &str, start: i64, end: i64) -> Vec<DataPoint> {
        self.metrics.get_or_create(metric).select_range(start, end)
    }

    fn select_all(&self) -> Vec<Row> {
        let mut rows = Vec::with_capacity(self.size());
        for (name, buffer) in self.metrics.snapshot() {
            rows.extend(
                buffer
                    .points()
                    .into_iter()
                    .map(|point| Row::new(name.clone(), point)),
            );
        }
        rows
    }

    fn read_only(&self) -> bool {
        if self.phase.load(Ordering::Acquire) != PartitionPhase::Writable as u8 {
            return true;
        }

        // Max before min: inserts publish min first, so a max from a batch
        // always pairs with a min that already covers it.
        let max = self.max_timestamp();
        let min = self.min_timestamp();
        max.saturating_sub(min) > self.partition_duration
    }

    fn ready_to_be_persisted(&self) -> bool {
        self.read_only()
    }

    fn min_timestamp(&self) -> i64 {
        self.min_t.load(Ordering::SeqCst)
    }

    fn max_timestamp(&self) -> i64 {
        self.max_t.load(Ordering::SeqCst)
    }

    fn size(&self) -> usize {
        self.num_points.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PartitionBuilder;
    use std::time::Duration;

    fn partition(duration_ms: u64) -> MemoryPartition {
        PartitionBuilder::new()
            .with_partition_duration(Duration::from_millis(duration_ms))
            .build()
            .unwrap()
    }

    #[test]
    fn test_min_only_decreases_and_max_only_increases() {
        let p = partition(10_000);
        p.insert_rows(&[Row::new("m", DataPoint::new(500, 1.0))])
            .unwrap();
        p.insert_rows(&[Row::new("m", DataPoint::new(700, 1.0))])
            .unwrap();
        p.insert_rows(&[Row::new("m", DataPoint::new(600, 1.0))])
            .unwrap();

        assert_eq!(p.min_timestamp(), 500);
        assert_eq!(p.max_timestamp(), 700);

        p.insert_rows(&[Row::new("m", DataPoint::new(100, 1.0))])
            .unwrap();
        assert_eq!(p.min_timestamp(), 100);
        assert_eq!(p.max_timestamp(), 700);
    }

    #[test]
    fn test_phase_latch_survives_min_sentinel_reset() {
        let p = partition(100);
        // A batch containing 0 leaves min at the unset sentinel.
        p.insert_rows(&[
            Row::new("m", DataPoint::new(0, 1.0)),
            Row::new("m", DataPoint::new(500, 1.0)),
        ])
        .unwrap();
        assert!(p.read_only());
        assert_eq!(p.phase(), PartitionPhase::ReadOnly);

        // Min snaps to a later timestamp but the partition stays frozen.
        assert!(matches!(
            p.insert_rows_recovery(&[Row::new("m", DataPoint::new(450, 1.0))]),
            Err(TsmemError::PartitionReadOnly { .. })
        ));
        p.update_min_timestamp(450);
        assert_eq!(p.max_timestamp() - p.min_timestamp(), 50);
        assert!(p.read_only());
    }

    #[test]
    fn test_torn_bounds_do_not_latch_read_only() {
        let p = partition(3_600_000);
        // A reader that observed max before min would see a huge span here.
        p.max_t.store(1_700_000_000_000, Ordering::SeqCst);
        assert!(p.read_only());
        assert_eq!(p.phase(), PartitionPhase::ReadOnly);

        // Nothing latched: once min lands the partition is writable again.
        p.min_t.store(1_700_000_000_000, Ordering::SeqCst);
        assert!(!p.read_only());
        assert_eq!(p.phase(), PartitionPhase::Writable);
        p.insert_rows(&[Row::new("m", DataPoint::new(1_700_000_000_001, 1.0))])
            .unwrap();
        assert!(!p.read_only());
    }

    #[test]
    fn test_mark_persisted() {
        let p = partition(100);
        assert!(matches!(
            p.mark_persisted(),
            Err(TsmemError::NotReadyToBePersisted { .. })
        ));

        p.insert_rows(&[
            Row::new("m", DataPoint::new(1, 1.0)),
            Row::new("m", DataPoint::new(1000, 2.0)),
        ])
        .unwrap();
        p.mark_persisted().unwrap();
        p.mark_persisted().unwrap();
        assert_eq!(p.phase(), PartitionPhase::Persisted);
        assert!(p.read_only());
        assert!(p.ready_to_be_persisted());
        assert_eq!(p.select_rows("m", 0, 2000).len(), 2);
    }

    #[test]
    fn test_select_rows_creates_empty_buffer_for_unknown_metric() {
        let p = partition(100);
        assert!(p.select_rows("ghost", i64::MIN, i64::MAX).is_empty());
        assert_eq!(p.metric_count(), 1);
        assert!(p.select_all().is_empty());
        assert_eq!(p.size(), 0);
    }
}
