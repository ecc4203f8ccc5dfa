//! Concurrent metric-name to point-buffer directory.

use crate::buffer::PointBuffer;
use dashmap::DashMap;
use std::sync::Arc;

/// Maps metric names to their point buffers.
///
/// Buffers are created lazily. Creation goes through the shard-locked entry
/// API, so callers racing on a brand-new name all receive the same buffer.
#[derive(Debug, Default)]
pub struct MetricDirectory {
    metrics: DashMap<String, Arc<PointBuffer>>,
}

impl MetricDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the buffer for `name`, creating an empty one if absent.
    pub fn get_or_create(&self, name: &str) -> Arc<PointBuffer> {
        // Fast path: existing metrics only need a shard read lock.
        if let Some(buffer) = self.metrics.get(name) {
            return buffer.clone();
        }

        self.metrics
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(PointBuffer::new()))
            .clone()
    }

    /// Returns the buffer for `name` without creating it.
    pub fn get(&self, name: &str) -> Option<Arc<PointBuffer>> {
        self.metrics.get(name).map(|entry| entry.clone())
    }

    /// Number of distinct metrics.
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Copies out every (name, buffer) pair so callers can scan buffers
    /// without holding shard locks.
    pub fn snapshot(&self) -> Vec<(String, Arc<PointBuffer>)> {
        self.metrics
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}
