//! Core data types for the vitals pipeline
//!
//! Samples flow in from an external producer, minute records and abnormal
//! events flow out to persistence and notification sinks.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Index, IndexMut};

/// Width of one aggregation bucket in milliseconds
pub const BUCKET_MS: i64 = 60_000;

/// Start of the minute bucket containing `timestamp_ms`
///
/// Uses Euclidean division so timestamps before the epoch still floor
/// towards negative infinity.
pub fn bucket_start(timestamp_ms: i64) -> i64 {
    timestamp_ms.div_euclid(BUCKET_MS) * BUCKET_MS
}

/// Returned when a name matches no `SignalType::as_str` identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownSignal(pub String);

impl fmt::Display for UnknownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown signal type: {}", self.0)
    }
}

impl std::error::Error for UnknownSignal {}

/// One thresholded physiological channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    Temperature,
    HeartRate,
    RespRate,
    SystolicBp,
    DiastolicBp,
}

impl SignalType {
    pub const COUNT: usize = 5;

    pub const ALL: [SignalType; Self::COUNT] = [
        SignalType::Temperature,
        SignalType::HeartRate,
        SignalType::RespRate,
        SignalType::SystolicBp,
        SignalType::DiastolicBp,
    ];

    fn index(self) -> usize {
        self as usize
    }

    /// Stable identifier used in the database and environment variables
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::Temperature => "temperature",
            SignalType::HeartRate => "heart_rate",
            SignalType::RespRate => "resp_rate",
            SignalType::SystolicBp => "systolic_bp",
            SignalType::DiastolicBp => "diastolic_bp",
        }
    }

    /// Human readable label for notification bodies
    pub fn label(&self) -> &'static str {
        match self {
            SignalType::Temperature => "Temperature",
            SignalType::HeartRate => "Heart rate",
            SignalType::RespRate => "Respiratory rate",
            SignalType::SystolicBp => "Systolic BP",
            SignalType::DiastolicBp => "Diastolic BP",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            SignalType::Temperature => "°C",
            SignalType::HeartRate => "bpm",
            SignalType::RespRate => "breaths/min",
            SignalType::SystolicBp | SignalType::DiastolicBp => "mmHg",
        }
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SignalType {
    type Err = UnknownSignal;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|signal| signal.as_str() == s)
            .ok_or_else(|| UnknownSignal(s.to_string()))
    }
}

/// Fixed-size map from every `SignalType` to a value
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SignalMap<T> {
    values: [T; SignalType::COUNT],
}

impl<T> SignalMap<T> {
    pub fn from_fn(mut f: impl FnMut(SignalType) -> T) -> Self {
        Self {
            values: SignalType::ALL.map(&mut f),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (SignalType, &T)> {
        SignalType::ALL.into_iter().zip(self.values.iter())
    }

    pub fn map<U>(&self, mut f: impl FnMut(SignalType, &T) -> U) -> SignalMap<U> {
        SignalMap::from_fn(|signal| f(signal, &self.values[signal.index()]))
    }
}

impl<T> Index<SignalType> for SignalMap<T> {
    type Output = T;

    fn index(&self, signal: SignalType) -> &T {
        &self.values[signal.index()]
    }
}

impl<T> IndexMut<SignalType> for SignalMap<T> {
    fn index_mut(&mut self, signal: SignalType) -> &mut T {
        &mut self.values[signal.index()]
    }
}

/// Vital sign readings carried by one sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vitals {
    pub temperature: f64,
    pub heart_rate: f64,
    pub resp_rate: f64,
    pub systolic_bp: f64,
    pub diastolic_bp: f64,
}

impl Vitals {
    pub fn get(&self, signal: SignalType) -> f64 {
        match signal {
            SignalType::Temperature => self.temperature,
            SignalType::HeartRate => self.heart_rate,
            SignalType::RespRate => self.resp_rate,
            SignalType::SystolicBp => self.systolic_bp,
            SignalType::DiastolicBp => self.diastolic_bp,
        }
    }

    pub fn to_map(&self) -> SignalMap<f64> {
        SignalMap::from_fn(|signal| self.get(signal))
    }
}

/// One immutable reading for one subject
///
/// Produced by an external generator at a fixed cadence. `ecg` is a raw
/// waveform value: buffered and uploaded, never thresholded or averaged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VitalSample {
    pub subject_id: String,
    pub timestamp_ms: i64,
    pub vitals: Vitals,
    pub ecg: f64,
}

impl VitalSample {
    pub fn new(subject_id: impl Into<String>, timestamp_ms: i64, vitals: Vitals, ecg: f64) -> Self {
        Self {
            subject_id: subject_id.into(),
            timestamp_ms,
            vitals,
            ecg,
        }
    }
}

/// Severity tier of a value against its threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Normal,
    Warning,
    Urgent,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Normal => "NORMAL",
            Severity::Warning => "WARNING",
            Severity::Urgent => "URGENT",
        }
    }

    pub fn is_abnormal(&self) -> bool {
        *self != Severity::Normal
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed one-minute summary for one subject
///
/// `averages[signal]` is `None` when the bucket held no finite value for
/// that signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinuteRecord {
    pub subject_id: String,
    pub bucket_start_ms: i64,
    pub averages: SignalMap<Option<f64>>,
    pub sample_count: u32,
}

/// A sample value that evaluated to WARNING or URGENT
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbnormalEvent {
    pub subject_id: String,
    pub timestamp_ms: i64,
    pub signal_type: SignalType,
    pub severity: Severity,
    pub value: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_start_floors_to_minute() {
        assert_eq!(bucket_start(0), 0);
        assert_eq!(bucket_start(59_999), 0);
        assert_eq!(bucket_start(60_000), 60_000);
        assert_eq!(bucket_start(125_500), 120_000);
        // Pre-epoch timestamps floor downwards
        assert_eq!(bucket_start(-1), -60_000);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Normal < Severity::Warning);
        assert!(Severity::Warning < Severity::Urgent);
        assert!(!Severity::Normal.is_abnormal());
        assert!(Severity::Urgent.is_abnormal());
    }

    #[test]
    fn test_signal_type_round_trip_names() {
        for signal in SignalType::ALL {
            assert_eq!(signal.as_str().parse::<SignalType>(), Ok(signal));
        }
        assert_eq!("ecg".parse::<SignalType>(), Err(UnknownSignal("ecg".to_string())));
        // Identifiers are exact, labels do not parse
        assert!("Heart rate".parse::<SignalType>().is_err());
    }

    #[test]
    fn test_signal_map_indexing() {
        let mut map: SignalMap<u32> = SignalMap::default();
        map[SignalType::HeartRate] += 2;
        map[SignalType::DiastolicBp] = 7;

        assert_eq!(map[SignalType::HeartRate], 2);
        assert_eq!(map[SignalType::DiastolicBp], 7);
        assert_eq!(map[SignalType::Temperature], 0);

        let doubled = map.map(|_, v| v * 2);
        assert_eq!(doubled[SignalType::DiastolicBp], 14);
        assert_eq!(map.iter().count(), SignalType::COUNT);
    }

    #[test]
    fn test_vitals_to_map() {
        let vitals = Vitals {
            temperature: 36.6,
            heart_rate: 72.0,
            resp_rate: 14.0,
            systolic_bp: 120.0,
            diastolic_bp: 80.0,
        };
        let map = vitals.to_map();
        assert_eq!(map[SignalType::Temperature], 36.6);
        assert_eq!(map[SignalType::SystolicBp], 120.0);
    }
}
