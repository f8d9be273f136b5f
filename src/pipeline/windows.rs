//! Minute bucketing of a subject's sample stream
//!
//! Each subject has one `MinuteAggregator` with a single ACCUMULATING state.
//! Samples are folded into the open bucket; the first sample that lands in a
//! later minute closes the bucket into an immutable `MinuteRecord`.

use super::types::{bucket_start, MinuteRecord, SignalMap, SignalType, VitalSample};

/// Accumulator for the minute currently being filled
#[derive(Debug, Clone)]
pub struct MinuteBucket {
    pub bucket_start_ms: i64,
    sums: SignalMap<f64>,
    /// Finite values folded per signal (NaN/inf are skipped)
    finite_counts: SignalMap<u32>,
    count: u32,
}

impl MinuteBucket {
    fn open(bucket_start_ms: i64) -> Self {
        Self {
            bucket_start_ms,
            sums: SignalMap::default(),
            finite_counts: SignalMap::default(),
            count: 0,
        }
    }

    fn fold(&mut self, sample: &VitalSample) {
        for signal in SignalType::ALL {
            let value = sample.vitals.get(signal);
            if value.is_finite() {
                self.sums[signal] += value;
                self.finite_counts[signal] += 1;
            }
        }
        self.count += 1;
    }

    /// Samples folded so far
    pub fn count(&self) -> u32 {
        self.count
    }

    fn close(&self, subject_id: &str) -> MinuteRecord {
        let averages = SignalMap::from_fn(|signal| {
            let n = self.finite_counts[signal];
            (n > 0).then(|| self.sums[signal] / n as f64)
        });

        MinuteRecord {
            subject_id: subject_id.to_string(),
            bucket_start_ms: self.bucket_start_ms,
            averages,
            sample_count: self.count,
        }
    }
}

/// Per-subject minute bucketing state machine
#[derive(Debug, Clone)]
pub struct MinuteAggregator {
    subject_id: String,
    current: Option<MinuteBucket>,
}

impl MinuteAggregator {
    pub fn new(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            current: None,
        }
    }

    /// Fold `sample` and return the bucket it closed, if any
    ///
    /// A sample whose minute is older than the open bucket is folded into the
    /// open bucket rather than rejected or backfilled into a closed one.
    pub fn on_sample(&mut self, sample: &VitalSample) -> Option<MinuteRecord> {
        let start = bucket_start(sample.timestamp_ms);

        let bucket = match self.current.as_mut() {
            None => {
                let mut bucket = MinuteBucket::open(start);
                bucket.fold(sample);
                self.current = Some(bucket);
                return None;
            }
            Some(bucket) => bucket,
        };

        if start <= bucket.bucket_start_ms {
            if start < bucket.bucket_start_ms {
                log::debug!(
                    "⏪ Out-of-order sample for {} (bucket {} < open {}), folding into open bucket",
                    self.subject_id,
                    start,
                    bucket.bucket_start_ms
                );
            }
            bucket.fold(sample);
            return None;
        }

        // Buckets are opened with the sample that created them, so count > 0 here
        let closed = bucket.close(&self.subject_id);
        let mut next = MinuteBucket::open(start);
        next.fold(sample);
        self.current = Some(next);
        Some(closed)
    }

    /// Close the open bucket regardless of time (used at shutdown)
    pub fn flush(&mut self) -> Option<MinuteRecord> {
        self.current
            .take()
            .filter(|bucket| bucket.count > 0)
            .map(|bucket| bucket.close(&self.subject_id))
    }

    pub fn current_bucket(&self) -> Option<&MinuteBucket> {
        self.current.as_ref()
    }

    /// Start of the open minute, `None` until the first sample arrives
    pub fn current_bucket_start(&self) -> Option<i64> {
        self.current.as_ref().map(|bucket| bucket.bucket_start_ms)
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::Vitals;

    fn make_sample(timestamp_ms: i64, heart_rate: f64, temperature: f64) -> VitalSample {
        VitalSample::new(
            "patient-1",
            timestamp_ms,
            Vitals {
                temperature,
                heart_rate,
                resp_rate: 16.0,
                systolic_bp: 120.0,
                diastolic_bp: 80.0,
            },
            0.0,
        )
    }

    #[test]
    fn test_first_sample_opens_bucket() {
        let mut agg = MinuteAggregator::new("patient-1");
        assert!(agg.current_bucket().is_none());
        assert_eq!(agg.current_bucket_start(), None);

        assert!(agg.on_sample(&make_sample(12_345, 70.0, 36.6)).is_none());
        assert_eq!(agg.current_bucket_start(), Some(0));

        let bucket = agg.current_bucket().unwrap();
        assert_eq!(bucket.bucket_start_ms, 0);
        assert_eq!(bucket.count(), 1);
    }

    #[test]
    fn test_minute_rollover_closes_bucket() {
        // Test: samples at 0s, 10s, 70s close [0, 60000) with the mean of the first two
        let mut agg = MinuteAggregator::new("patient-1");

        assert!(agg.on_sample(&make_sample(0, 60.0, 36.0)).is_none());
        assert!(agg.on_sample(&make_sample(10_000, 80.0, 37.0)).is_none());
        let record = agg.on_sample(&make_sample(70_000, 100.0, 38.0)).unwrap();

        assert_eq!(record.subject_id, "patient-1");
        assert_eq!(record.bucket_start_ms, 0);
        assert_eq!(record.sample_count, 2);
        assert_eq!(record.averages[SignalType::HeartRate], Some(70.0));
        assert_eq!(record.averages[SignalType::Temperature], Some(36.5));
        assert_eq!(record.averages[SignalType::RespRate], Some(16.0));

        // Third sample opened the next bucket
        let bucket = agg.current_bucket().unwrap();
        assert_eq!(bucket.bucket_start_ms, 60_000);
        assert_eq!(bucket.count(), 1);
    }

    #[test]
    fn test_gap_of_several_minutes_emits_one_record() {
        let mut agg = MinuteAggregator::new("patient-1");
        agg.on_sample(&make_sample(5_000, 70.0, 36.6));

        let record = agg.on_sample(&make_sample(600_000, 72.0, 36.6)).unwrap();
        assert_eq!(record.bucket_start_ms, 0);
        assert_eq!(agg.current_bucket_start(), Some(600_000));
    }

    #[test]
    fn test_out_of_order_sample_folds_into_open_bucket() {
        // Edge case: a late sample from an already-closed minute is not backfilled
        let mut agg = MinuteAggregator::new("patient-1");
        agg.on_sample(&make_sample(10_000, 60.0, 36.6));
        agg.on_sample(&make_sample(65_000, 80.0, 36.6)).unwrap();

        assert!(agg.on_sample(&make_sample(30_000, 100.0, 36.6)).is_none());

        let bucket = agg.current_bucket().unwrap();
        assert_eq!(bucket.bucket_start_ms, 60_000);
        assert_eq!(bucket.count(), 2);

        let record = agg.on_sample(&make_sample(125_000, 70.0, 36.6)).unwrap();
        assert_eq!(record.bucket_start_ms, 60_000);
        assert_eq!(record.averages[SignalType::HeartRate], Some(90.0));
    }

    #[test]
    fn test_non_finite_values_excluded_from_average() {
        let mut agg = MinuteAggregator::new("patient-1");
        agg.on_sample(&make_sample(0, 60.0, f64::NAN));
        agg.on_sample(&make_sample(1_000, f64::INFINITY, f64::NAN));
        agg.on_sample(&make_sample(2_000, 80.0, f64::NAN));

        let record = agg.on_sample(&make_sample(60_000, 70.0, 36.6)).unwrap();
        assert_eq!(record.sample_count, 3);
        assert_eq!(record.averages[SignalType::HeartRate], Some(70.0));
        assert_eq!(record.averages[SignalType::Temperature], None);
    }

    #[test]
    fn test_flush_closes_partial_bucket() {
        let mut agg = MinuteAggregator::new("patient-1");
        assert!(agg.flush().is_none());

        agg.on_sample(&make_sample(61_000, 66.0, 36.6));
        let record = agg.flush().unwrap();
        assert_eq!(record.bucket_start_ms, 60_000);
        assert_eq!(record.sample_count, 1);

        assert!(agg.current_bucket().is_none());
        assert_eq!(agg.current_bucket_start(), None);
        assert!(agg.flush().is_none());
    }
}
