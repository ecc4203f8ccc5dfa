//! Per-metric point buffer.

use crate::DataPoint;
use parking_lot::RwLock;

/// Points of a single metric, kept in arrival order.
///
/// Appends are not sorted, deduplicated or checked for monotonic timestamps.
/// Every append takes the buffer's write lock, so two batches touching the
/// same metric never race on the underlying vector.
#[derive(Debug, Default)]
pub struct PointBuffer {
    inner: RwLock<Points>,
}

#[derive(Debug, Default)]
struct Points {
    data: Vec<DataPoint>,
    /// Index of the most recently appended point
    last_index: Option<usize>,
}

impl PointBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a point at the end of the buffer.
    pub fn append(&self, point: DataPoint) {
        let mut points = self.inner.write();
        points.data.push(point);
        points.last_index = Some(points.data.len() - 1);
    }

    /// Returns every point with `start <= timestamp < end`, in stored order.
    pub fn select_range(&self, start: i64, end: i64) -> Vec<DataPoint> {
        let points = self.inner.read();
        points
            .data
            .iter()
            .filter(|p| p.timestamp >= start && p.timestamp < end)
            .copied()
            .collect()
    }

    /// Copies out every stored point.
    pub fn points(&self) -> Vec<DataPoint> {
        self.inner.read().data.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().data.is_empty()
    }

    /// Position of the most recently appended point, `None` while empty.
    pub fn last_index(&self) -> Option<usize> {
        self.inner.read().last_index
    }

    /// The most recently appended point.
    pub fn last_inserted(&self) -> Option<DataPoint> {
        let points = self.inner.read();
        points.last_index.map(|i| points.data[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_empty_buffer() {
        let buffer = PointBuffer::new();
        assert!(buffer.is_empty());
        assert_eq!(buffer.last_index(), None);
        assert_eq!(buffer.last_inserted(), None);
        assert!(buffer.select_range(i64::MIN, i64::MAX).is_empty());
    }

    #[test]
    fn test_append_keeps_arrival_order() {
        let buffer = PointBuffer::new();
        buffer.append(DataPoint::new(30, 3.0));
        buffer.append(DataPoint::new(10, 1.0));
        buffer.append(DataPoint::new(10, 1.5));
        buffer.append(DataPoint::new(20, 2.0));

        let timestamps: Vec<i64> = buffer.points().iter().map(|p| p.timestamp).collect();
        assert_eq!(timestamps, vec![30, 10, 10, 20]);
        assert_eq!(buffer.last_index(), Some(3));
        assert_eq!(buffer.last_inserted(), Some(DataPoint::new(20, 2.0)));
    }

    #[test]
    fn test_select_range_is_half_open() {
        let buffer = PointBuffer::new();
        for ts in [5, 10, 15, 20, 25] {
            buffer.append(DataPoint::new(ts, ts as f64));
        }

        let selected = buffer.select_range(10, 20);
        assert_eq!(
            selected,
            vec![DataPoint::new(10, 10.0), DataPoint::new(15, 15.0)]
        );
        assert!(buffer.select_range(20, 20).is_empty());
        assert!(buffer.select_range(30, 10).is_empty());
    }

    #[test]
    fn test_select_range_preserves_stored_order() {
        let buffer = PointBuffer::new();
        buffer.append(DataPoint::new(12, 1.0));
        buffer.append(DataPoint::new(11, 2.0));
        buffer.append(DataPoint::new(50, 3.0));

        let selected = buffer.select_range(0, 20);
        assert_eq!(selected[0].timestamp, 12);
        assert_eq!(selected[1].timestamp, 11);
    }

    #[test]
    fn test_concurrent_appends_are_not_lost() {
        let buffer = Arc::new(PointBuffer::new());
        let mut handles = vec![];

        for t in 0..8 {
            let buffer = buffer.clone();
            handles.push(thread::spawn(move || {
                for i in 0..500 {
                    buffer.append(DataPoint::new(t * 1000 + i, i as f64));
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(buffer.len(), 8 * 500);
        assert_eq!(buffer.last_index(), Some(8 * 500 - 1));
    }
}
