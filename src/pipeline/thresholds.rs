//! Per-signal severity thresholds
//!
//! The table is read on every sample and replaced rarely (an administrator
//! changing bounds), so it sits behind an `RwLock` and every update swaps a
//! whole `Threshold` record. Readers never see a half-updated band.

use super::types::{Severity, SignalMap, SignalType};
use std::sync::{PoisonError, RwLock};

/// Severity boundaries for one signal type
///
/// Expected ordering is `urgent_low <= warn_low <= warn_high <= urgent_high`.
/// It is not enforced: an inverted band simply produces a degenerate tier,
/// which administrators may use on purpose to disable one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Threshold {
    pub warn_low: f64,
    pub warn_high: f64,
    pub urgent_low: f64,
    pub urgent_high: f64,
}

impl Threshold {
    pub fn new(warn_low: f64, warn_high: f64, urgent_low: f64, urgent_high: f64) -> Self {
        Self {
            warn_low,
            warn_high,
            urgent_low,
            urgent_high,
        }
    }

    /// Classify `value` against this band
    ///
    /// Urgent is tested first with strict inequalities, so a value equal to
    /// `urgent_low` falls through to the warning check. Non-finite values
    /// (sensor dropouts) classify as NORMAL.
    pub fn classify(&self, value: f64) -> Severity {
        if !value.is_finite() {
            Severity::Normal
        } else if value < self.urgent_low || value > self.urgent_high {
            Severity::Urgent
        } else if value < self.warn_low || value > self.warn_high {
            Severity::Warning
        } else {
            Severity::Normal
        }
    }
}

/// Runtime-mutable map from signal type to threshold
#[derive(Debug, Default)]
pub struct ThresholdTable {
    thresholds: RwLock<SignalMap<Option<Threshold>>>,
}

impl ThresholdTable {
    /// Empty table: every signal evaluates NORMAL
    pub fn new() -> Self {
        Self::default()
    }

    /// Adult resting ranges
    pub fn with_defaults() -> Self {
        let table = Self::new();
        table.set_threshold(SignalType::Temperature, Threshold::new(36.0, 37.5, 35.0, 39.0));
        table.set_threshold(SignalType::HeartRate, Threshold::new(60.0, 100.0, 40.0, 130.0));
        table.set_threshold(SignalType::RespRate, Threshold::new(12.0, 20.0, 8.0, 30.0));
        table.set_threshold(SignalType::SystolicBp, Threshold::new(90.0, 140.0, 80.0, 180.0));
        table.set_threshold(SignalType::DiastolicBp, Threshold::new(60.0, 90.0, 50.0, 110.0));
        table
    }

    /// Severity of `value` for `signal`; NORMAL when no threshold is registered
    pub fn evaluate(&self, signal: SignalType, value: f64) -> Severity {
        match self.get_threshold(signal) {
            Some(threshold) => threshold.classify(value),
            None => Severity::Normal,
        }
    }

    /// Every non-NORMAL signal in `values`, with its value
    ///
    /// Takes the read lock once for the whole set. NaN and infinite readings
    /// are skipped; they never become alerts.
    pub fn evaluate_all(&self, values: &SignalMap<f64>) -> Vec<(SignalType, Severity, f64)> {
        let thresholds = self.thresholds.read().unwrap_or_else(PoisonError::into_inner);
        values
            .iter()
            .filter(|(_, value)| value.is_finite())
            .filter_map(|(signal, value)| {
                let severity = thresholds[signal].map_or(Severity::Normal, |t| t.classify(*value));
                severity.is_abnormal().then_some((signal, severity, *value))
            })
            .collect()
    }

    /// Replace the whole threshold record for `signal`
    pub fn set_threshold(&self, signal: SignalType, threshold: Threshold) {
        let mut thresholds = self.thresholds.write().unwrap_or_else(PoisonError::into_inner);
        thresholds[signal] = Some(threshold);
        log::info!("🎚️  Threshold updated for {}: {:?}", signal, threshold);
    }

    pub fn get_threshold(&self, signal: SignalType) -> Option<Threshold> {
        self.thresholds.read().unwrap_or_else(PoisonError::into_inner)[signal]
    }

    /// Stop evaluating `signal`; it reads NORMAL afterwards
    pub fn remove_threshold(&self, signal: SignalType) -> Option<Threshold> {
        let mut thresholds = self.thresholds.write().unwrap_or_else(PoisonError::into_inner);
        thresholds[signal].take()
    }
}
