//! Partition configuration.

use crate::memory::MemoryPartition;
use crate::wal::Wal;
use crate::{Result, TsmemError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Default partition duration: 1 hour.
pub const DEFAULT_PARTITION_DURATION: Duration = Duration::from_secs(3600);

/// What an insert reports when the write-ahead log append fails.
///
/// The rows are applied in memory either way.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalFailurePolicy {
    /// Log the failure and report success.
    #[default]
    LogAndContinue,
    /// Report `DurabilityLogFailure` once the rows have been applied.
    Propagate,
}

/// Serializable partition settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionConfig {
    /// Maximum allowed span between min and max timestamps, in milliseconds.
    pub partition_duration_ms: u64,
    pub wal_failure_policy: WalFailurePolicy,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            partition_duration_ms: DEFAULT_PARTITION_DURATION.as_millis() as u64,
            wal_failure_policy: WalFailurePolicy::default(),
        }
    }
}

impl PartitionConfig {
    /// Parses a config from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Checks the settings are usable.
    pub fn validate(&self) -> Result<()> {
        if self.partition_duration_ms > i64::MAX as u64 {
            return Err(TsmemError::InvalidConfiguration(format!(
                "partition duration {}ms does not fit in a signed 64-bit timestamp",
                self.partition_duration_ms
            )));
        }
        Ok(())
    }
}

/// Builder for creating a [`MemoryPartition`].
pub struct PartitionBuilder {
    config: PartitionConfig,
    partition_duration: Duration,
    wal: Option<Arc<dyn Wal>>,
}

impl Default for PartitionBuilder {
    fn default() -> Self {
        Self::from_config(PartitionConfig::default())
    }
}

impl PartitionBuilder {
    /// Creates a new PartitionBuilder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from previously loaded settings.
    pub fn from_config(config: PartitionConfig) -> Self {
        Self {
            partition_duration: Duration::from_millis(config.partition_duration_ms),
            config,
            wal: None,
        }
    }

    /// Sets the partition duration.
    pub fn with_partition_duration(mut self, duration: Duration) -> Self {
        self.partition_duration = duration;
        self
    }

    /// Sets the write-ahead log. Without one, inserts are memory-only.
    pub fn with_wal(mut self, wal: Arc<dyn Wal>) -> Self {
        self.wal = Some(wal);
        self
    }

    /// Sets how WAL append failures are reported.
    pub fn with_wal_failure_policy(mut self, policy: WalFailurePolicy) -> Self {
        self.config.wal_failure_policy = policy;
        self
    }

    /// Builds the partition.
    pub fn build(self) -> Result<MemoryPartition> {
        let millis = self.partition_duration.as_millis();
        if millis > i64::MAX as u128 {
            return Err(TsmemError::InvalidConfiguration(format!(
                "partition duration {:?} does not fit in a signed 64-bit timestamp",
                self.partition_duration
            )));
        }

        let config = PartitionConfig {
            partition_duration_ms: millis as u64,
            ..self.config
        };
        config.validate()?;

        Ok(MemoryPartition::new(self.wal, config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::Partition;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = PartitionConfig::default();
        assert_eq!(config.partition_duration_ms, 3_600_000);
        assert_eq!(config.wal_failure_policy, WalFailurePolicy::LogAndContinue);

        let partition = PartitionBuilder::new().build().unwrap();
        assert_eq!(partition.partition_duration(), 3_600_000);
        assert!(!partition.read_only());
    }

    #[test]
    fn test_from_json_str_fills_missing_fields() {
        let config = PartitionConfig::from_json_str(r#"{"partition_duration_ms": 1000}"#).unwrap();
        assert_eq!(config.partition_duration_ms, 1000);
        assert_eq!(config.wal_failure_policy, WalFailurePolicy::LogAndContinue);

        let config =
            PartitionConfig::from_json_str(r#"{"wal_failure_policy": "propagate"}"#).unwrap();
        assert_eq!(config.partition_duration_ms, 3_600_000);
        assert_eq!(config.wal_failure_policy, WalFailurePolicy::Propagate);
    }

    #[test]
    fn test_from_json_rejects_garbage_and_overflow() {
        assert!(matches!(
            PartitionConfig::from_json_str("not json"),
            Err(TsmemError::Json(_))
        ));
        assert!(matches!(
            PartitionConfig::from_json_str(r#"{"partition_duration_ms": 18446744073709551615}"#),
            Err(TsmemError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_from_json_file() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        file.write_all(br#"{"partition_duration_ms": 250, "wal_failure_policy": "propagate"}"#)?;
        file.flush()?;

        let config = PartitionConfig::from_json_file(file.path())?;
        let partition = PartitionBuilder::from_config(config).build()?;
        assert_eq!(partition.partition_duration(), 250);
        assert_eq!(partition.wal_failure_policy(), WalFailurePolicy::Propagate);
        Ok(())
    }

    #[test]
    fn test_builder_rejects_oversized_duration() {
        let result = PartitionBuilder::new()
            .with_partition_duration(Duration::MAX)
            .build();
        assert!(matches!(result, Err(TsmemError::InvalidConfiguration(_))));
    }
}
