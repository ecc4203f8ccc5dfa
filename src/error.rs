//! Error types for tsmem.

use thiserror::Error;

/// Result type alias for tsmem operations.
pub type Result<T> = std::result::Result<T, TsmemError>;

/// Main error type for tsmem operations.
#[derive(Error, Debug)]
pub enum TsmemError {
    #[error("No rows given")]
    EmptyBatch,

    #[error(
        "Cannot insert rows into read-only partition spanning [{min_timestamp}, {max_timestamp}] (duration {partition_duration}ms)"
    )]
    PartitionReadOnly {
        min_timestamp: i64,
        max_timestamp: i64,
        partition_duration: i64,
    },

    #[error(
        "Partition spanning [{min_timestamp}, {max_timestamp}] is still writable (duration {partition_duration}ms)"
    )]
    NotReadyToBePersisted {
        min_timestamp: i64,
        max_timestamp: i64,
        partition_duration: i64,
    },

    #[error("Write-ahead log append failed after rows were applied in memory: {source}")]
    DurabilityLogFailure {
        #[source]
        source: Box<TsmemError>,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("WAL error: {operation} failed: {details}")]
    Wal { operation: String, details: String },

    #[error("Memory map error: {details}")]
    MemoryMap { details: String },

    #[error("{operation} is not supported on this platform")]
    Unsupported { operation: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
