//! Duplicate alert suppression

use super::types::{Severity, SignalType};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// Identity of an alert for cooldown purposes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CooldownKey {
    pub subject_id: String,
    pub signal_type: SignalType,
    pub severity: Severity,
}

impl CooldownKey {
    pub fn new(subject_id: impl Into<String>, signal_type: SignalType, severity: Severity) -> Self {
        Self {
            subject_id: subject_id.into(),
            signal_type,
            severity,
        }
    }
}

/// Suppresses repeated notifications for the same key within `cooldown_ms`
///
/// Keys are never evicted; their number is bounded by
/// subjects x signal types x severities.
#[derive(Debug)]
pub struct AlertCooldownTracker {
    last_sent: Mutex<HashMap<CooldownKey, i64>>,
    cooldown_ms: AtomicU64,
}

impl AlertCooldownTracker {
    pub fn new(cooldown_ms: u64) -> Self {
        Self {
            last_sent: Mutex::new(HashMap::new()),
            cooldown_ms: AtomicU64::new(cooldown_ms),
        }
    }

    /// Whether a notification for `key` may go out at `now_ms`
    ///
    /// Returns true and stamps `now_ms` when the key is new or its last send
    /// is at least `cooldown_ms` old. False means suppressed.
    pub fn should_send(&self, key: &CooldownKey, now_ms: i64) -> bool {
        let cooldown = self.cooldown_ms() as i64;
        let mut last_sent = self.last_sent.lock().unwrap_or_else(PoisonError::into_inner);

        match last_sent.get(key) {
            Some(&last) if now_ms.saturating_sub(last) < cooldown => false,
            _ => {
                last_sent.insert(key.clone(), now_ms);
                true
            }
        }
    }

    pub fn cooldown_ms(&self) -> u64 {
        self.cooldown_ms.load(Ordering::Relaxed)
    }

    /// Change the interval; applies to the next `should_send` call
    pub fn set_cooldown_ms(&self, cooldown_ms: u64) {
        self.cooldown_ms.store(cooldown_ms, Ordering::Relaxed);
        log::info!("⏱️  Alert cooldown set to {}ms", cooldown_ms);
    }

    pub fn tracked_keys(&self) -> usize {
        self.last_sent.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
