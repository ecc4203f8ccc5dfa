//! tsmem - the in-memory write path of a time-series storage engine
//!
//! Rows are buffered per metric inside a [`MemoryPartition`]. The partition
//! tracks its time span and reports when it has aged out of the writable
//! window so an external scheduler can hand it off for persistence.
//!
//! ```
//! use std::time::Duration;
//! use tsmem::partition::Partition;
//! use tsmem::{DataPoint, PartitionBuilder, Row};
//!
//! let partition = PartitionBuilder::new()
//!     .with_partition_duration(Duration::from_secs(1))
//!     .build()
//!     .unwrap();
//!
//! partition
//!     .insert_rows(&[Row::new("cpu", DataPoint::new(1000, 5.0))])
//!     .unwrap();
//! assert_eq!(partition.select_rows("cpu", 0, 2000).len(), 1);
//! assert!(!partition.read_only());
//! ```

pub mod buffer;
pub mod config;
pub mod directory;
pub mod error;
pub mod memory;
pub mod mmap;
pub mod partition;
pub mod wal;

pub use config::{PartitionBuilder, PartitionConfig, WalFailurePolicy};
pub use error::{Result, TsmemError};
pub use memory::MemoryPartition;
pub use partition::{Partition, PartitionPhase, SharedPartition};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents a data point, the smallest unit of time series data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    /// The actual value.
    pub value: f64,
    /// Unix timestamp in milliseconds.
    pub timestamp: i64,
}

impl DataPoint {
    /// Creates a new DataPoint.
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// A row is a data point along with the metric it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    /// The name of the metric.
    metric: String,
    /// The data point.
    data_point: DataPoint,
}

impl Row {
    /// Creates a new Row.
    pub fn new(metric: impl Into<String>, data_point: DataPoint) -> Self {
        Self {
            metric: metric.into(),
            data_point,
        }
    }

    /// Gets the metric name.
    pub fn metric(&self) -> &str {
        &self.metric
    }

    /// Gets the data point.
    pub fn data_point(&self) -> DataPoint {
        self.data_point
    }

    /// Shorthand for `data_point().timestamp`.
    pub fn timestamp(&self) -> i64 {
        self.data_point.timestamp
    }

    /// Shorthand for `data_point().value`.
    pub fn value(&self) -> f64 {
        self.data_point.value
    }

    /// Sets the metric name.
    pub fn set_metric(&mut self, metric: impl Into<String>) {
        self.metric = metric.into();
    }

    /// Sets the data point.
    pub fn set_data_point(&mut self, data_point: DataPoint) {
        self.data_point = data_point;
    }
}

impl fmt::Display for DataPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DataPoint(ts: {}, val: {})", self.timestamp, self.value)
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Row({}, ts: {}, val: {})",
            self.metric, self.data_point.timestamp, self.data_point.value
        )
    }
}
