//! Bounded per-subject sample history for live display

use super::config::ConfigError;
use super::types::VitalSample;
use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Fixed-capacity circular store of the most recent samples of one subject
///
/// Writers call `add()` from the producer path, readers (UI refresh, HTTP
/// handlers) call `snapshot()` from other threads. Both hold the lock only
/// for a push or a copy, so readers never observe a half-written window.
#[derive(Debug)]
pub struct BoundedSeriesBuffer {
    samples: Mutex<VecDeque<VitalSample>>,
    capacity: usize,
}

impl BoundedSeriesBuffer {
    /// Create a buffer holding at most `capacity` samples
    ///
    /// Fails when `capacity` is zero.
    pub fn new(capacity: usize) -> Result<Self, ConfigError> {
        let capacity = NonZeroUsize::new(capacity).ok_or_else(|| {
            ConfigError::InvalidValue("series buffer capacity must be greater than zero".to_string())
        })?;
        Ok(Self::with_capacity(capacity))
    }

    pub fn with_capacity(capacity: NonZeroUsize) -> Self {
        Self {
            samples: Mutex::new(VecDeque::with_capacity(capacity.get())),
            capacity: capacity.get(),
        }
    }

    /// Capacity for `retention_seconds` of history at `sample_hz`
    pub fn from_retention(retention_seconds: u32, sample_hz: u32) -> Result<Self, ConfigError> {
        Self::new(retention_seconds as usize * sample_hz as usize)
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<VitalSample>> {
        self.samples.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a sample, evicting the oldest once full
    pub fn add(&self, sample: VitalSample) {
        let mut samples = self.lock();
        if samples.len() == self.capacity {
            samples.pop_front();
        }
        samples.push_back(sample);
    }

    /// Independent copy of the window, oldest first
    pub fn snapshot(&self) -> Vec<VitalSample> {
        self.lock().iter().cloned().collect()
    }

    /// Copy of the samples with `timestamp_ms >= from_ms`, oldest first
    ///
    /// Used for windowed charting (e.g. "last 30 seconds").
    pub fn snapshot_since(&self, from_ms: i64) -> Vec<VitalSample> {
        let samples = self.lock();
        // Timestamps are non-decreasing in practice, so scan from the back
        let start = samples
            .iter()
            .rposition(|s| s.timestamp_ms < from_ms)
            .map_or(0, |i| i + 1);
        samples.range(start..).cloned().collect()
    }

    /// Most recent sample, if any
    pub fn latest(&self) -> Option<VitalSample> {
        self.lock().back().cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::Vitals;
    use std::sync::Arc;
    use std::thread;

    fn make_sample(timestamp_ms: i64) -> VitalSample {
        VitalSample::new(
            "patient-1",
            timestamp_ms,
            Vitals {
                temperature: 36.6,
                heart_rate: 70.0 + (timestamp_ms % 10) as f64,
                resp_rate: 14.0,
                systolic_bp: 118.0,
                diastolic_bp: 78.0,
            },
            0.1,
        )
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(BoundedSeriesBuffer::new(0).is_err());
        assert!(BoundedSeriesBuffer::from_retention(0, 5).is_err());
        assert_eq!(BoundedSeriesBuffer::from_retention(60, 5).unwrap().capacity(), 300);
    }

    #[test]
    fn test_snapshot_keeps_last_n_in_order() {
        // Test: After M > N inserts, snapshot holds the last N in insertion order
        let buffer = BoundedSeriesBuffer::new(5).unwrap();

        for ts in 0..12 {
            buffer.add(make_sample(ts * 200));
        }

        let snapshot = buffer.snapshot();
        assert_eq!(snapshot.len(), 5);
        let timestamps: Vec<i64> = snapshot.iter().map(|s| s.timestamp_ms).collect();
        assert_eq!(timestamps, vec![1400, 1600, 1800, 2000, 2200]);
        assert_eq!(buffer.latest().unwrap().timestamp_ms, 2200);
    }

    #[test]
    fn test_under_capacity_keeps_everything() {
        let buffer = BoundedSeriesBuffer::new(10).unwrap();
        assert!(buffer.is_empty());
        assert!(buffer.latest().is_none());

        buffer.add(make_sample(1));
        buffer.add(make_sample(2));

        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.snapshot()[0].timestamp_ms, 1);
    }

    #[test]
    fn test_snapshot_is_independent_copy() {
        let buffer = BoundedSeriesBuffer::new(3).unwrap();
        buffer.add(make_sample(1));

        let snapshot = buffer.snapshot();
        buffer.add(make_sample(2));
        buffer.add(make_sample(3));
        buffer.add(make_sample(4));

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].timestamp_ms, 1);
    }

    #[test]
    fn test_snapshot_since() {
        let buffer = BoundedSeriesBuffer::new(10).unwrap();
        for ts in [1_000, 2_000, 3_000, 4_000] {
            buffer.add(make_sample(ts));
        }

        let recent: Vec<i64> = buffer.snapshot_since(2_500).iter().map(|s| s.timestamp_ms).collect();
        assert_eq!(recent, vec![3_000, 4_000]);
        assert_eq!(buffer.snapshot_since(0).len(), 4);
        assert!(buffer.snapshot_since(5_000).is_empty());
    }

    #[test]
    fn test_concurrent_readers_see_consistent_windows() {
        // Test: Readers on other threads always observe ordered, bounded windows
        let buffer = Arc::new(BoundedSeriesBuffer::new(50).unwrap());

        let writer = {
            let buffer = buffer.clone();
            thread::spawn(move || {
                for ts in 0..5_000 {
                    buffer.add(make_sample(ts));
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let buffer = buffer.clone();
                thread::spawn(move || {
                    for _ in 0..500 {
                        let snapshot = buffer.snapshot();
                        assert!(snapshot.len() <= 50);
                        assert!(snapshot.windows(2).all(|w| w[1].timestamp_ms == w[0].timestamp_ms + 1));
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }

        assert_eq!(buffer.len(), 50);
        assert_eq!(buffer.latest().unwrap().timestamp_ms, 4_999);
    }
}
