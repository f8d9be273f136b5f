//! Daily per-subject digest of abnormal minutes

use super::thresholds::ThresholdTable;
use super::types::{MinuteRecord, Severity, SignalMap, SignalType};
use chrono::{DateTime, NaiveDate, TimeZone};
use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::Arc;

/// Running counters for one subject over one calendar day
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DigestCounters {
    pub total_minutes: u32,
    /// Minutes where at least one signal average was non-NORMAL
    pub abnormal_minutes: u32,
    /// Signal-minutes at WARNING
    pub warning_count: u32,
    /// Signal-minutes at URGENT
    pub urgent_count: u32,
    pub per_signal_counts: SignalMap<u32>,
}

/// One subject's summary for one finished day
#[derive(Debug, Clone, PartialEq)]
pub struct DailySummary {
    pub subject_id: String,
    pub day: NaiveDate,
    pub counters: DigestCounters,
}

impl DailySummary {
    pub fn subject_line(&self) -> String {
        format!("Daily vitals digest for {} ({})", self.subject_id, self.day)
    }

    /// Plain-text body for the digest email
    pub fn render_body(&self) -> String {
        let c = &self.counters;
        let mut body = String::new();
        let _ = writeln!(body, "Subject: {}", self.subject_id);
        let _ = writeln!(body, "Day: {}", self.day);
        let _ = writeln!(body, "Minutes recorded: {}", c.total_minutes);
        let _ = writeln!(body, "Abnormal minutes: {}", c.abnormal_minutes);
        let _ = writeln!(body, "Warning readings: {}", c.warning_count);
        let _ = writeln!(body, "Urgent readings: {}", c.urgent_count);
        for (signal, count) in c.per_signal_counts.iter().filter(|(_, n)| **n > 0) {
            let _ = writeln!(body, "  {}: {} abnormal minutes", signal.label(), count);
        }
        body
    }
}

/// Per-subject abnormal-minute counters, summarised once per calendar day
pub struct DailyDigestAccumulator {
    thresholds: Arc<ThresholdTable>,
    counters: BTreeMap<String, DigestCounters>,
    last_flush_day: NaiveDate,
}

impl DailyDigestAccumulator {
    /// Start accumulating on `today`; the first summary is due on the next day
    pub fn new(thresholds: Arc<ThresholdTable>, today: NaiveDate) -> Self {
        Self {
            thresholds,
            counters: BTreeMap::new(),
            last_flush_day: today,
        }
    }

    /// Count one closed minute for `subject_id`
    pub fn on_minute_record(&mut self, subject_id: &str, record: &MinuteRecord) {
        let counters = self.counters.entry(subject_id.to_string()).or_default();
        counters.total_minutes += 1;

        let mut abnormal = false;
        for signal in SignalType::ALL {
            // Signals with no finite value in the minute are not evaluated
            let Some(average) = record.averages[signal] else {
                continue;
            };

            match self.thresholds.evaluate(signal, average) {
                Severity::Normal => {}
                Severity::Warning => {
                    counters.warning_count += 1;
                    counters.per_signal_counts[signal] += 1;
                    abnormal = true;
                }
                Severity::Urgent => {
                    counters.urgent_count += 1;
                    counters.per_signal_counts[signal] += 1;
                    abnormal = true;
                }
            }
        }

        if abnormal {
            counters.abnormal_minutes += 1;
        }
    }

    /// Summaries for the finished day if `now` is on a later calendar day
    ///
    /// Emits one summary per tracked subject and clears every counter, at
    /// most once per day no matter how often it is called.
    pub fn flush_if_due<Tz: TimeZone>(&mut self, now: &DateTime<Tz>) -> Vec<DailySummary> {
        let today = now.date_naive();
        if today == self.last_flush_day {
            return Vec::new();
        }

        let day = self.last_flush_day;
        self.last_flush_day = today;

        let summaries: Vec<DailySummary> = std::mem::take(&mut self.counters)
            .into_iter()
            .map(|(subject_id, counters)| DailySummary {
                subject_id,
                day,
                counters,
            })
            .collect();

        log::info!("📅 Daily digest for {}: {} subjects", day, summaries.len());
        summaries
    }

    pub fn counters(&self, subject_id: &str) -> Option<&DigestCounters> {
        self.counters.get(subject_id)
    }

    pub fn tracked_subjects(&self) -> usize {
        self.counters.len()
    }

    pub fn last_flush_day(&self) -> NaiveDate {
        self.last_flush_day
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn record(heart_rate: f64, temperature: Option<f64>) -> MinuteRecord {
        let mut averages = SignalMap::from_fn(|signal| match signal {
            SignalType::Temperature => Some(36.8),
            SignalType::HeartRate => Some(72.0),
            SignalType::RespRate => Some(14.0),
            SignalType::SystolicBp => Some(120.0),
            SignalType::DiastolicBp => Some(80.0),
        });
        averages[SignalType::HeartRate] = Some(heart_rate);
        averages[SignalType::Temperature] = temperature;

        MinuteRecord {
            subject_id: "patient-1".to_string(),
            bucket_start_ms: 0,
            averages,
            sample_count: 300,
        }
    }

    fn accumulator(today: NaiveDate) -> DailyDigestAccumulator {
        DailyDigestAccumulator::new(Arc::new(ThresholdTable::with_defaults()), today)
    }

    #[test]
    fn test_counts_normal_and_abnormal_minutes() {
        let mut digest = accumulator(day(2026, 3, 1));

        digest.on_minute_record("patient-1", &record(72.0, Some(36.8)));
        digest.on_minute_record("patient-1", &record(110.0, Some(36.8))); // warning
        digest.on_minute_record("patient-1", &record(140.0, Some(40.0))); // urgent x2

        let c = digest.counters("patient-1").unwrap();
        assert_eq!(c.total_minutes, 3);
        assert_eq!(c.abnormal_minutes, 2);
        assert_eq!(c.warning_count, 1);
        assert_eq!(c.urgent_count, 2);
        assert_eq!(c.per_signal_counts[SignalType::HeartRate], 2);
        assert_eq!(c.per_signal_counts[SignalType::Temperature], 1);
        assert_eq!(c.per_signal_counts[SignalType::RespRate], 0);
    }

    #[test]
    fn test_missing_average_is_skipped() {
        let mut digest = accumulator(day(2026, 3, 1));
        digest.on_minute_record("patient-1", &record(72.0, None));

        let c = digest.counters("patient-1").unwrap();
        assert_eq!(c.total_minutes, 1);
        assert_eq!(c.abnormal_minutes, 0);
    }

    #[test]
    fn test_flush_on_same_day_is_noop() {
        let mut digest = accumulator(day(2026, 3, 1));
        digest.on_minute_record("patient-1", &record(140.0, Some(36.8)));

        assert!(digest.flush_if_due(&at(2026, 3, 1, 23)).is_empty());
        assert_eq!(digest.tracked_subjects(), 1);
    }

    #[test]
    fn test_flush_twice_on_new_day_emits_once() {
        // Test: two flushes on the same calendar day emit exactly one summary set
        let mut digest = accumulator(day(2026, 3, 1));
        digest.on_minute_record("patient-1", &record(140.0, Some(36.8)));
        digest.on_minute_record("patient-2", &record(72.0, Some(36.8)));

        let first = digest.flush_if_due(&at(2026, 3, 2, 0));
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].subject_id, "patient-1");
        assert_eq!(first[0].day, day(2026, 3, 1));
        assert_eq!(first[0].counters.urgent_count, 1);

        // Counters are empty right after the flush
        assert_eq!(digest.tracked_subjects(), 0);
        assert!(digest.counters("patient-1").is_none());

        let second = digest.flush_if_due(&at(2026, 3, 2, 12));
        assert!(second.is_empty());
        assert_eq!(digest.last_flush_day(), day(2026, 3, 2));
    }

    #[test]
    fn test_flush_with_no_subjects_still_advances_day() {
        let mut digest = accumulator(day(2026, 3, 1));
        assert!(digest.flush_if_due(&at(2026, 3, 5, 8)).is_empty());
        assert_eq!(digest.last_flush_day(), day(2026, 3, 5));
    }

    #[test]
    fn test_thresholds_changes_apply_to_later_minutes() {
        let thresholds = Arc::new(ThresholdTable::with_defaults());
        let mut digest = DailyDigestAccumulator::new(thresholds.clone(), day(2026, 3, 1));

        thresholds.remove_threshold(SignalType::HeartRate);
        digest.on_minute_record("patient-1", &record(140.0, Some(36.8)));

        assert_eq!(digest.counters("patient-1").unwrap().abnormal_minutes, 0);
    }

    #[test]
    fn test_render_body() {
        let mut counters = DigestCounters {
            total_minutes: 1440,
            abnormal_minutes: 12,
            warning_count: 10,
            urgent_count: 2,
            ..DigestCounters::default()
        };
        counters.per_signal_counts[SignalType::HeartRate] = 12;

        let summary = DailySummary {
            subject_id: "patient-1".to_string(),
            day: day(2026, 3, 1),
            counters,
        };

        let body = summary.render_body();
        assert!(body.contains("Abnormal minutes: 12"));
        assert!(body.contains("Heart rate: 12 abnormal minutes"));
        assert!(!body.contains("Temperature"));
        assert!(summary.subject_line().contains("2026-03-01"));
    }
}
